//! Error taxonomy for pipeline orchestration.
//!
//! Only run-aborting failures are errors. Everything that goes wrong inside a
//! single matrix cell is recorded on that cell's `CellOutcome` instead.

use std::path::PathBuf;

use pkgci_store::StoreError;

use crate::artifact::ArtifactKind;

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("runtime_versions must not be empty")]
    EmptyRuntimeVersions,

    #[error("operating_systems must not be empty")]
    EmptyOperatingSystems,

    #[error("artifact_kinds must be exactly [wheel, source_archive], got {0:?}")]
    ArtifactKinds(Vec<ArtifactKind>),

    #[error("{field} entry {label:?} must be a single path component")]
    InvalidLabel { field: &'static str, label: String },

    #[error("parallelism must be at least 1")]
    InvalidParallelism,

    #[error("max_parallel_cells must be at least 1")]
    InvalidMaxParallelCells,

    #[error("{0} command must not be empty")]
    EmptyCommand(&'static str),

    #[error("test.package_name must be set")]
    MissingPackageName,
}

/// Run-aborting pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("version stamping failed: {0}")]
    SetVersion(String),

    #[error("build failed: {0}")]
    Build(String),

    #[error("expected exactly one {kind} artifact, found {}: {found:?}", found.len())]
    ArtifactCount {
        kind: ArtifactKind,
        found: Vec<String>,
    },

    #[error("{stage} timed out after {secs} seconds")]
    Timeout { stage: &'static str, secs: u64 },

    #[error("failed to store artifact {name}: {source}")]
    StoreArtifact {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_count_error_lists_files() {
        let err = PipelineError::ArtifactCount {
            kind: ArtifactKind::Wheel,
            found: vec!["a.whl".to_string(), "b.whl".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("exactly one wheel"));
        assert!(msg.contains("found 2"));
        assert!(msg.contains("b.whl"));
    }

    #[test]
    fn test_config_error_converts() {
        let err: PipelineError = ConfigError::EmptyRuntimeVersions.into();
        assert!(err.to_string().contains("runtime_versions"));
    }

    #[test]
    fn test_timeout_error_display() {
        let err = PipelineError::Timeout {
            stage: "build",
            secs: 30,
        };
        assert_eq!(err.to_string(), "build timed out after 30 seconds");
    }
}
