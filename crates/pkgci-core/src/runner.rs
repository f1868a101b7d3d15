//! Test execution for a single matrix cell.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pkgci_store::ArtifactStore;
use tracing::{debug, warn};

use crate::command::{run_checked, run_command_with_env, Placeholders};
use crate::config::{Parallelism, TestConfig};
use crate::error::ConfigError;
use crate::matrix::MatrixCell;
use crate::variant::VariantTag;

/// `unittest_report_<os>_py<runtime>_<variant>.html`
pub fn report_file_name(
    operating_system: &str,
    runtime_version: &str,
    variant: VariantTag,
) -> String {
    format!("unittest_report_{operating_system}_py{runtime_version}_{variant}.html")
}

/// `pytest_<os>_py<runtime>_<variant>.log`
pub fn log_file_name(operating_system: &str, runtime_version: &str, variant: VariantTag) -> String {
    format!("pytest_{operating_system}_py{runtime_version}_{variant}.log")
}

/// Coverage output file for a cell (not persisted to the store).
pub fn coverage_file_name(
    operating_system: &str,
    runtime_version: &str,
    variant: VariantTag,
) -> String {
    format!("coverage_{operating_system}_py{runtime_version}_{variant}.xml")
}

/// Everything needed to install one artifact for one cell.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub runtime_version: String,
    pub operating_system: String,
    pub variant: VariantTag,

    /// Artifact file fetched from the store
    pub artifact_path: PathBuf,

    /// Private scratch directory of the cell
    pub work_dir: PathBuf,
}

/// Result of installing an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    /// Source directory of the installed package (the coverage target)
    pub root: PathBuf,
}

/// Everything needed to run the tests for one cell.
#[derive(Debug, Clone)]
pub struct TestRequest {
    pub runtime_version: String,
    pub operating_system: String,
    pub variant: VariantTag,
    pub work_dir: PathBuf,
    pub package_root: PathBuf,
    pub parallelism: Parallelism,
    pub report_path: PathBuf,
    pub log_path: PathBuf,

    /// Directory coverage is measured over, taken from the installed package
    pub coverage_target: PathBuf,

    /// Where the coverage payload must be written
    pub coverage_path: PathBuf,

    /// Raw coverage data file inside the cell's work directory. Runs that
    /// combine parallel worker shards only see the shards of this cell.
    pub coverage_data_path: PathBuf,
}

/// Output of a test run as reported by the capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRunOutput {
    pub exit_code: i32,

    /// Console output of the run
    pub console: String,
}

/// The external test capability.
#[async_trait]
pub trait TestCapability: Send + Sync {
    /// Install the artifact into an environment private to the cell.
    async fn install(&self, request: &InstallRequest) -> anyhow::Result<InstalledPackage>;

    /// Run the tests. A non-zero exit code is an outcome, not an error.
    async fn run(&self, request: &TestRequest) -> anyhow::Result<TestRunOutput>;
}

/// Per-cell test outcome handed to the reporting sink.
#[derive(Debug, Clone, Default)]
pub struct TestRunResult {
    /// Human-readable report, if the run produced one
    pub report: Option<Vec<u8>>,

    /// Log file contents (falls back to console output)
    pub log: Option<Vec<u8>>,

    /// Coverage payload, if the run produced one
    pub coverage: Option<Vec<u8>>,

    /// Exit code of the test run; `None` when it never ran
    pub exit_code: Option<i32>,

    /// Error that stopped the cell before or during the run
    pub error: Option<String>,

    pub success: bool,
}

impl TestRunResult {
    /// A cell that failed before the tests produced anything.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Test capability driven by configured command templates.
///
/// Each cell gets its own virtual environment under its work directory, so no
/// two cells share an installed copy of the package.
pub struct CommandTestCapability {
    config: TestConfig,
}

impl CommandTestCapability {
    pub fn new(config: TestConfig) -> Result<Self, ConfigError> {
        if config.package_name.trim().is_empty() {
            return Err(ConfigError::MissingPackageName);
        }
        if config.install_commands.iter().any(|c| c.is_empty()) {
            return Err(ConfigError::EmptyCommand("install"));
        }
        if config.locate_command.is_empty() {
            return Err(ConfigError::EmptyCommand("locate"));
        }
        if config.run_command.is_empty() {
            return Err(ConfigError::EmptyCommand("test"));
        }
        Ok(Self { config })
    }

    fn env_dir(work_dir: &Path) -> PathBuf {
        work_dir.join("venv")
    }

    /// Interpreter inside a virtual environment on this host.
    fn env_python(env_dir: &Path) -> PathBuf {
        if cfg!(windows) {
            env_dir.join("Scripts").join("python.exe")
        } else {
            env_dir.join("bin").join("python")
        }
    }

    fn base_placeholders(
        &self,
        runtime_version: &str,
        operating_system: &str,
        variant: VariantTag,
        work_dir: &Path,
    ) -> Placeholders {
        let env_dir = Self::env_dir(work_dir);
        let runtime_vars = Placeholders::new().with("runtime", runtime_version);
        Placeholders::new()
            .with("runtime", runtime_version)
            .with("os", operating_system)
            .with("variant", variant.as_str())
            .with("package", self.config.package_name.as_str())
            .with("interpreter", runtime_vars.render(&self.config.interpreter))
            .with("env_dir", env_dir.to_string_lossy())
            .with("env_python", Self::env_python(&env_dir).to_string_lossy())
    }
}

#[async_trait]
impl TestCapability for CommandTestCapability {
    async fn install(&self, request: &InstallRequest) -> anyhow::Result<InstalledPackage> {
        let vars = self
            .base_placeholders(
                &request.runtime_version,
                &request.operating_system,
                request.variant,
                &request.work_dir,
            )
            .with("artifact", request.artifact_path.to_string_lossy());

        for template in &self.config.install_commands {
            run_checked(&vars.render_argv(template), Some(&request.work_dir), None).await?;
        }

        // The package location differs per runtime, OS and artifact kind, so
        // ask the installed interpreter instead of guessing.
        let located = run_checked(
            &vars.render_argv(&self.config.locate_command),
            Some(&request.work_dir),
            None,
        )
        .await?;
        let root = located
            .stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .ok_or_else(|| anyhow::anyhow!("locate command printed no package path"))?;
        Ok(InstalledPackage {
            root: PathBuf::from(root),
        })
    }

    async fn run(&self, request: &TestRequest) -> anyhow::Result<TestRunOutput> {
        let vars = self
            .base_placeholders(
                &request.runtime_version,
                &request.operating_system,
                request.variant,
                &request.work_dir,
            )
            .with("package_root", request.package_root.to_string_lossy())
            .with("parallelism", request.parallelism.degree().to_string())
            .with("report", request.report_path.to_string_lossy())
            .with("log", request.log_path.to_string_lossy())
            .with("coverage_target", request.coverage_target.to_string_lossy())
            .with("coverage", request.coverage_path.to_string_lossy())
            .with("coverage_data", request.coverage_data_path.to_string_lossy());

        // Tests run from the shared tests directory, so anything they write
        // relative to it must be redirected into the cell.
        let env = [(
            "COVERAGE_FILE",
            request.coverage_data_path.to_string_lossy().into_owned(),
        )];
        let output = run_command_with_env(
            &vars.render_argv(&self.config.run_command),
            Some(&self.config.tests_dir),
            &env,
            None,
        )
        .await?;
        Ok(TestRunOutput {
            exit_code: output.exit_code,
            console: output.combined(),
        })
    }
}

/// Drives the test capability for one cell: fetch, install, locate, run.
pub struct TestExecutor {
    store: Arc<dyn ArtifactStore>,
    capability: Arc<dyn TestCapability>,
    parallelism: Parallelism,
    timeout: Option<Duration>,
}

impl TestExecutor {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        capability: Arc<dyn TestCapability>,
        parallelism: Parallelism,
    ) -> Self {
        Self {
            store,
            capability,
            parallelism,
            timeout: None,
        }
    }

    /// Bound install plus test run; the cell fails when the limit is hit.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute `cell` inside `work_dir`. Never fails: every problem is folded
    /// into the returned result so sibling cells are unaffected.
    pub async fn execute(
        &self,
        cell: &MatrixCell,
        variant: VariantTag,
        work_dir: &Path,
    ) -> TestRunResult {
        let paths = CellPaths::new(cell, variant, work_dir);
        let attempt = self.try_execute(cell, variant, &paths);
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => Err(anyhow::anyhow!(
                    "cell timed out after {} seconds",
                    limit.as_secs()
                )),
            },
            None => attempt.await,
        };

        match outcome {
            Ok(result) => result,
            Err(e) => {
                let error = format!("{e:#}");
                warn!(cell = %cell.slug(), error = %error, "cell execution failed");
                let log = match read_optional(&paths.log).await {
                    Some(mut log) => {
                        log.extend_from_slice(format!("\n{error}\n").as_bytes());
                        log
                    }
                    None => format!("{error}\n").into_bytes(),
                };
                TestRunResult {
                    report: read_optional(&paths.report).await,
                    log: Some(log),
                    ..TestRunResult::failed(error)
                }
            }
        }
    }

    async fn try_execute(
        &self,
        cell: &MatrixCell,
        variant: VariantTag,
        paths: &CellPaths,
    ) -> anyhow::Result<TestRunResult> {
        tokio::fs::create_dir_all(&paths.work_dir).await?;

        let bytes = self.store.get(&cell.artifact.storage_name).await?;
        let artifact_path = paths.work_dir.join(&cell.artifact.storage_name);
        tokio::fs::write(&artifact_path, &bytes).await?;
        debug!(cell = %cell.slug(), artifact = %artifact_path.display(), "artifact fetched");

        let installed = self
            .capability
            .install(&InstallRequest {
                runtime_version: cell.runtime_version.clone(),
                operating_system: cell.operating_system.clone(),
                variant,
                artifact_path,
                work_dir: paths.work_dir.clone(),
            })
            .await?;
        debug!(cell = %cell.slug(), root = %installed.root.display(), "package installed");

        let output = self
            .capability
            .run(&TestRequest {
                runtime_version: cell.runtime_version.clone(),
                operating_system: cell.operating_system.clone(),
                variant,
                work_dir: paths.work_dir.clone(),
                package_root: installed.root.clone(),
                parallelism: self.parallelism,
                report_path: paths.report.clone(),
                log_path: paths.log.clone(),
                coverage_target: installed.root,
                coverage_path: paths.coverage.clone(),
                coverage_data_path: paths.coverage_data.clone(),
            })
            .await?;

        let log = match read_optional(&paths.log).await {
            Some(log) => Some(log),
            None if !output.console.is_empty() => Some(output.console.into_bytes()),
            None => None,
        };

        Ok(TestRunResult {
            report: read_optional(&paths.report).await,
            log,
            coverage: read_optional(&paths.coverage).await,
            exit_code: Some(output.exit_code),
            error: None,
            success: output.exit_code == 0,
        })
    }
}

struct CellPaths {
    work_dir: PathBuf,
    report: PathBuf,
    log: PathBuf,
    coverage: PathBuf,
    coverage_data: PathBuf,
}

impl CellPaths {
    fn new(cell: &MatrixCell, variant: VariantTag, root: &Path) -> Self {
        let os = &cell.operating_system;
        let runtime = &cell.runtime_version;
        let work_dir = root.join(cell.slug());
        Self {
            report: work_dir.join(report_file_name(os, runtime, variant)),
            log: work_dir.join(log_file_name(os, runtime, variant)),
            coverage: work_dir.join(coverage_file_name(os, runtime, variant)),
            coverage_data: work_dir.join(".coverage"),
            work_dir,
        }
    }
}

async fn read_optional(path: &Path) -> Option<Vec<u8>> {
    tokio::fs::read(path).await.ok()
}
