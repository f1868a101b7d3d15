//! Pipeline configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is a valid
//! configuration for the standard five-runtime, two-OS matrix.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pkgci_store::{validate_name, RetentionPolicy, DEFAULT_RETENTION_DAYS};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactKind;
use crate::error::ConfigError;

/// Degree of test parallelism inside one cell.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Parallelism {
    /// One worker per logical CPU
    #[default]
    Logical,

    /// Fixed worker count
    Fixed(usize),
}

impl Parallelism {
    /// Resolved worker count on this host.
    pub fn degree(&self) -> usize {
        match self {
            Parallelism::Logical => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            Parallelism::Fixed(n) => *n,
        }
    }
}

/// How the package is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Source tree the build runs in
    pub source_dir: PathBuf,

    /// Build command; `{out_dir}` is replaced with the output directory
    pub command: Vec<String>,

    /// Version stamping command; `{version}` is replaced with the release version
    pub version_command: Option<Vec<String>>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            command: argv(&["python", "-m", "build", "--outdir", "{out_dir}"]),
            version_command: Some(argv(&["hatch", "version", "{version}"])),
        }
    }
}

/// How an artifact is installed and tested inside one cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestConfig {
    /// Import name of the package under test
    pub package_name: String,

    /// Directory the tests run from
    pub tests_dir: PathBuf,

    /// Interpreter used to create the per-cell environment
    pub interpreter: String,

    /// Commands run in order to install the artifact into `{env_dir}`
    pub install_commands: Vec<Vec<String>>,

    /// Command printing the installed package's source directory on stdout
    pub locate_command: Vec<String>,

    /// Test command
    pub run_command: Vec<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            package_name: String::new(),
            tests_dir: PathBuf::from("."),
            interpreter: "python{runtime}".to_string(),
            install_commands: vec![
                argv(&["{interpreter}", "-m", "venv", "{env_dir}"]),
                argv(&["{env_python}", "-m", "pip", "install", "{artifact}[test]"]),
            ],
            locate_command: argv(&[
                "{env_python}",
                "-c",
                "import importlib.util, os; print(os.path.dirname(importlib.util.find_spec('{package}').origin))",
            ]),
            run_command: argv(&[
                "{env_python}",
                "-m",
                "pytest",
                "-n",
                "{parallelism}",
                "-p",
                "no:cacheprovider",
                "--html={report}",
                "--self-contained-html",
                "--log-file={log}",
                "--cov={coverage_target}",
                "--cov-report=xml:{coverage}",
            ]),
        }
    }
}

/// Coverage aggregator settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoverageConfig {
    /// Upload endpoint; uploads are skipped when unset
    pub endpoint: Option<String>,

    /// Environment variable holding the upload token
    pub token_env: String,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token_env: "COVERAGE_TOKEN".to_string(),
        }
    }
}

impl CoverageConfig {
    /// Read the upload token from the configured environment variable.
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env).ok().filter(|t| !t.is_empty())
    }
}

/// Artifact store location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".pkgci/store"),
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Runtime versions to test (ordered, de-duplicated on expansion)
    pub runtime_versions: Vec<String>,

    /// Operating system labels to test
    pub operating_systems: Vec<String>,

    /// Artifact kinds; fixed at wheel + source archive
    pub artifact_kinds: Vec<ArtifactKind>,

    /// Advisory retention for stored blobs
    pub retention_days: u32,

    /// Test parallelism inside each cell
    pub parallelism: Parallelism,

    /// Upper bound on concurrently running cells (unbounded when unset)
    pub max_parallel_cells: Option<usize>,

    /// Build stage timeout; no timeout when unset
    pub build_timeout_secs: Option<u64>,

    /// Per-cell timeout covering install and test; no timeout when unset
    pub cell_timeout_secs: Option<u64>,

    /// Coverage upload timeout; no timeout when unset
    pub upload_timeout_secs: Option<u64>,

    /// Scratch directory for build output and per-cell work trees
    pub work_dir: PathBuf,

    pub build: BuildConfig,
    pub test: TestConfig,
    pub coverage: CoverageConfig,
    pub store: StoreConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            runtime_versions: argv(&["3.9", "3.10", "3.11", "3.12", "3.13"]),
            operating_systems: argv(&["ubuntu-latest", "windows-latest"]),
            artifact_kinds: ArtifactKind::ALL.to_vec(),
            retention_days: DEFAULT_RETENTION_DAYS,
            parallelism: Parallelism::Logical,
            max_parallel_cells: None,
            build_timeout_secs: None,
            cell_timeout_secs: None,
            upload_timeout_secs: None,
            work_dir: PathBuf::from(".pkgci/work"),
            build: BuildConfig::default(),
            test: TestConfig::default(),
            coverage: CoverageConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Check the invariants the orchestrator relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime_versions.iter().all(|v| v.trim().is_empty()) {
            return Err(ConfigError::EmptyRuntimeVersions);
        }
        if self.operating_systems.iter().all(|o| o.trim().is_empty()) {
            return Err(ConfigError::EmptyOperatingSystems);
        }

        // Labels end up in store names and cell directory names.
        check_labels("runtime_versions", &self.runtime_versions)?;
        check_labels("operating_systems", &self.operating_systems)?;

        let mut kinds = self.artifact_kinds.clone();
        kinds.sort();
        if kinds != ArtifactKind::ALL {
            return Err(ConfigError::ArtifactKinds(self.artifact_kinds.clone()));
        }

        if self.parallelism == Parallelism::Fixed(0) {
            return Err(ConfigError::InvalidParallelism);
        }
        if self.max_parallel_cells == Some(0) {
            return Err(ConfigError::InvalidMaxParallelCells);
        }
        if self.build.command.is_empty() {
            return Err(ConfigError::EmptyCommand("build"));
        }
        Ok(())
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::days(self.retention_days)
    }

    pub fn build_timeout(&self) -> Option<Duration> {
        self.build_timeout_secs.map(Duration::from_secs)
    }

    pub fn cell_timeout(&self) -> Option<Duration> {
        self.cell_timeout_secs.map(Duration::from_secs)
    }

    pub fn upload_timeout(&self) -> Option<Duration> {
        self.upload_timeout_secs.map(Duration::from_secs)
    }
}

fn check_labels(field: &'static str, labels: &[String]) -> Result<(), ConfigError> {
    for label in labels.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        if validate_name(label).is_err() {
            return Err(ConfigError::InvalidLabel {
                field,
                label: label.to_string(),
            });
        }
    }
    Ok(())
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}
