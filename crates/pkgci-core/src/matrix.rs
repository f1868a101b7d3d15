//! Test matrix expansion.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::artifact::{ArtifactDescriptor, ArtifactPair};
use crate::error::ConfigError;

/// One (runtime version, operating system, artifact) combination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MatrixCell {
    /// Position in expansion order (0-based)
    pub index: usize,

    pub runtime_version: String,

    pub operating_system: String,

    /// Shared, read-only for the whole run
    pub artifact: Arc<ArtifactDescriptor>,
}

impl MatrixCell {
    /// Stable identifier, also used as the cell's work directory name.
    pub fn slug(&self) -> String {
        format!(
            "{}_py{}_{}",
            self.operating_system, self.runtime_version, self.artifact.kind
        )
    }
}

/// Trim entries, drop blanks and keep the first occurrence of each value.
pub fn dedupe(values: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.to_string()))
        .map(str::to_string)
        .collect()
}

/// Full cross-product of runtimes × operating systems × both artifacts.
///
/// Order is runtime-major, then operating system, then wheel before source
/// archive. Produces exactly `|runtimes| × |systems| × 2` distinct cells.
pub fn expand(
    runtime_versions: &[String],
    operating_systems: &[String],
    artifacts: &ArtifactPair,
) -> Result<Vec<MatrixCell>, ConfigError> {
    let runtimes = dedupe(runtime_versions);
    if runtimes.is_empty() {
        return Err(ConfigError::EmptyRuntimeVersions);
    }
    let systems = dedupe(operating_systems);
    if systems.is_empty() {
        return Err(ConfigError::EmptyOperatingSystems);
    }

    let mut cells = Vec::with_capacity(runtimes.len() * systems.len() * 2);
    for runtime in &runtimes {
        for os in &systems {
            for artifact in artifacts.iter() {
                cells.push(MatrixCell {
                    index: cells.len(),
                    runtime_version: runtime.clone(),
                    operating_system: os.clone(),
                    artifact: Arc::clone(artifact),
                });
            }
        }
    }
    Ok(cells)
}
