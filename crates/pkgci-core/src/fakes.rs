//! In-memory fakes for the pipeline collaborators (testing only)
//!
//! These let the orchestration be exercised end to end without Python, a
//! network or a real build backend. Each fake records what it was asked to
//! do and can be told to fail for chosen cells.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::builder::PackageBuilder;
use crate::reporting::{CoveragePayload, CoverageUploader};
use crate::runner::{InstallRequest, InstalledPackage, TestCapability, TestRequest, TestRunOutput};
use crate::variant::VariantTag;
use crate::version::ReleaseRef;

/// Version the fake builder emits when nothing was stamped.
pub const DEV_VERSION: &str = "0.0.0.dev0";

/// Builder that writes one wheel and one source archive named after the
/// package and the most recently stamped version.
#[derive(Debug, Default)]
pub struct FakeBuilder {
    package: String,
    extra_files: Vec<String>,
    failing: bool,
    stamped: Mutex<Vec<String>>,
}

impl FakeBuilder {
    pub fn new(package: &str) -> Self {
        Self {
            package: package.to_string(),
            ..Self::default()
        }
    }

    /// Also emit `file_name` into the output directory.
    pub fn with_extra_file(mut self, file_name: &str) -> Self {
        self.extra_files.push(file_name.to_string());
        self
    }

    /// Make `build` fail.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Versions passed to `set_version`, in call order.
    pub fn stamped_versions(&self) -> Vec<String> {
        self.stamped.lock().unwrap().clone()
    }

    fn version(&self) -> String {
        self.stamped
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_else(|| DEV_VERSION.to_string())
    }
}

#[async_trait]
impl PackageBuilder for FakeBuilder {
    async fn set_version(&self, version: &ReleaseRef) -> anyhow::Result<()> {
        self.stamped.lock().unwrap().push(version.to_string());
        Ok(())
    }

    async fn build(&self, out_dir: &Path) -> anyhow::Result<()> {
        if self.failing {
            anyhow::bail!("backend exited with code 1");
        }
        let version = self.version();
        let wheel = format!("{}-{}-py3-none-any.whl", self.package, version);
        let sdist = format!("{}-{}.tar.gz", self.package, version);
        for name in [&wheel, &sdist].into_iter().chain(&self.extra_files) {
            tokio::fs::write(out_dir.join(name), format!("contents of {name}")).await?;
        }
        Ok(())
    }
}

fn cell_key(operating_system: &str, runtime_version: &str, variant: VariantTag) -> String {
    format!("{operating_system}_py{runtime_version}_{variant}")
}

/// Test capability that writes canned report, log and coverage files.
#[derive(Debug, Default)]
pub struct FakeTestCapability {
    failing: Mutex<HashSet<String>>,
    broken_installs: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    without_coverage: Mutex<HashSet<String>>,
    installs: Mutex<Vec<InstallRequest>>,
    runs: Mutex<Vec<TestRequest>>,
}

impl FakeTestCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tests of this cell exit with code 1.
    pub fn fail_cell(&self, operating_system: &str, runtime_version: &str, variant: VariantTag) {
        self.failing
            .lock()
            .unwrap()
            .insert(cell_key(operating_system, runtime_version, variant));
    }

    /// Installing into this cell fails.
    pub fn break_install(
        &self,
        operating_system: &str,
        runtime_version: &str,
        variant: VariantTag,
    ) {
        self.broken_installs
            .lock()
            .unwrap()
            .insert(cell_key(operating_system, runtime_version, variant));
    }

    /// The test run of this cell panics.
    pub fn panic_in(&self, operating_system: &str, runtime_version: &str, variant: VariantTag) {
        self.panicking
            .lock()
            .unwrap()
            .insert(cell_key(operating_system, runtime_version, variant));
    }

    /// The test run of this cell writes no coverage file.
    pub fn omit_coverage(
        &self,
        operating_system: &str,
        runtime_version: &str,
        variant: VariantTag,
    ) {
        self.without_coverage
            .lock()
            .unwrap()
            .insert(cell_key(operating_system, runtime_version, variant));
    }

    pub fn installs(&self) -> Vec<InstallRequest> {
        self.installs.lock().unwrap().clone()
    }

    pub fn runs(&self) -> Vec<TestRequest> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl TestCapability for FakeTestCapability {
    async fn install(&self, request: &InstallRequest) -> anyhow::Result<InstalledPackage> {
        self.installs.lock().unwrap().push(request.clone());
        let key = cell_key(
            &request.operating_system,
            &request.runtime_version,
            request.variant,
        );
        if self.broken_installs.lock().unwrap().contains(&key) {
            anyhow::bail!("pip install failed for {key}");
        }
        if !tokio::fs::try_exists(&request.artifact_path).await? {
            anyhow::bail!("artifact {} is missing", request.artifact_path.display());
        }

        let root: PathBuf = request.work_dir.join("site-packages").join("pkg");
        tokio::fs::create_dir_all(&root).await?;
        Ok(InstalledPackage { root })
    }

    async fn run(&self, request: &TestRequest) -> anyhow::Result<TestRunOutput> {
        self.runs.lock().unwrap().push(request.clone());
        let key = cell_key(
            &request.operating_system,
            &request.runtime_version,
            request.variant,
        );
        if self.panicking.lock().unwrap().contains(&key) {
            panic!("test runner crashed in {key}");
        }

        let exit_code = if self.failing.lock().unwrap().contains(&key) {
            1
        } else {
            0
        };
        let verdict = if exit_code == 0 { "passed" } else { "failed" };
        tokio::fs::write(
            &request.report_path,
            format!("<html><body>{key}: {verdict}</body></html>"),
        )
        .await?;
        tokio::fs::write(&request.log_path, format!("{key} {verdict}\n")).await?;
        if !self.without_coverage.lock().unwrap().contains(&key) {
            tokio::fs::write(
                &request.coverage_path,
                format!("<coverage source=\"{}\"/>", request.coverage_target.display()),
            )
            .await?;
        }

        Ok(TestRunOutput {
            exit_code,
            console: format!("{key}: {verdict}"),
        })
    }
}

/// Coverage uploader that records payloads instead of sending them.
#[derive(Debug, Default)]
pub struct FakeCoverageUploader {
    failing: Mutex<HashSet<String>>,
    uploads: Mutex<Vec<(CoveragePayload, Option<String>)>>,
}

impl FakeCoverageUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject uploads whose payload name is `name`.
    pub fn fail_for(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    /// Accepted uploads with the token they carried.
    pub fn uploads(&self) -> Vec<(CoveragePayload, Option<String>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl CoverageUploader for FakeCoverageUploader {
    async fn upload(&self, payload: &CoveragePayload, token: Option<&str>) -> anyhow::Result<()> {
        if self.failing.lock().unwrap().contains(&payload.name) {
            anyhow::bail!("aggregator rejected {}: 503 Service Unavailable", payload.name);
        }
        self.uploads
            .lock()
            .unwrap()
            .push((payload.clone(), token.map(str::to_string)));
        Ok(())
    }
}
