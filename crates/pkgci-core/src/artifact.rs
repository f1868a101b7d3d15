//! Built artifacts and their descriptors.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pkgci_store::BlobManifest;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Packaging format of a built artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Binary wheel (`*.whl`)
    Wheel,

    /// Source distribution (`*.tar.gz`)
    SourceArchive,
}

impl ArtifactKind {
    /// Both kinds, in matrix order.
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Wheel, ArtifactKind::SourceArchive];

    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::Wheel => "wheel",
            ArtifactKind::SourceArchive => "source_archive",
        }
    }

    /// File suffix the build capability uses for this kind.
    pub fn suffix(&self) -> &'static str {
        match self {
            ArtifactKind::Wheel => ".whl",
            ArtifactKind::SourceArchive => ".tar.gz",
        }
    }

    /// Classify a file emitted by the build. Unrelated files yield `None`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| name.ends_with(k.suffix()))
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An artifact file sitting in the build output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArtifact {
    pub kind: ArtifactKind,
    pub file_name: String,
    pub path: PathBuf,
}

/// The two files one build must produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    pub wheel: BuiltArtifact,
    pub source_archive: BuiltArtifact,
}

impl BuildOutput {
    /// Scan `out_dir` and require exactly one artifact of each kind.
    ///
    /// Files that are neither wheels nor source archives are ignored.
    pub fn collect(out_dir: &Path) -> Result<Self> {
        let mut wheels = Vec::new();
        let mut archives = Vec::new();

        for entry in std::fs::read_dir(out_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(kind) = ArtifactKind::from_file_name(&file_name) else {
                continue;
            };
            let artifact = BuiltArtifact {
                kind,
                file_name,
                path: entry.path(),
            };
            match kind {
                ArtifactKind::Wheel => wheels.push(artifact),
                ArtifactKind::SourceArchive => archives.push(artifact),
            }
        }

        Ok(Self {
            wheel: exactly_one(ArtifactKind::Wheel, wheels)?,
            source_archive: exactly_one(ArtifactKind::SourceArchive, archives)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuiltArtifact> {
        [&self.wheel, &self.source_archive].into_iter()
    }
}

fn exactly_one(kind: ArtifactKind, mut found: Vec<BuiltArtifact>) -> Result<BuiltArtifact> {
    if found.len() == 1 {
        return Ok(found.remove(0));
    }
    let mut names: Vec<String> = found.into_iter().map(|a| a.file_name).collect();
    names.sort();
    Err(PipelineError::ArtifactCount { kind, found: names })
}

/// A stored artifact, as seen by the test matrix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ArtifactDescriptor {
    /// Packaging format
    pub kind: ArtifactKind,

    /// Name the artifact is stored under (the built file name)
    pub storage_name: String,

    /// SHA-256 of the stored bytes
    pub digest: String,

    /// Size in bytes
    pub size_bytes: u64,
}

impl ArtifactDescriptor {
    pub fn from_manifest(kind: ArtifactKind, manifest: &BlobManifest) -> Self {
        Self {
            kind,
            storage_name: manifest.name.clone(),
            digest: manifest.digest.to_string(),
            size_bytes: manifest.size_bytes,
        }
    }
}

/// The two stored artifacts of a build, shared read-only by every cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactPair {
    pub wheel: Arc<ArtifactDescriptor>,
    pub source_archive: Arc<ArtifactDescriptor>,
}

impl ArtifactPair {
    pub fn new(wheel: ArtifactDescriptor, source_archive: ArtifactDescriptor) -> Self {
        Self {
            wheel: Arc::new(wheel),
            source_archive: Arc::new(source_archive),
        }
    }

    /// Pair built from bare storage names, for planning without a store.
    pub fn from_names(wheel: &str, source_archive: &str) -> Self {
        let describe = |kind, name: &str| ArtifactDescriptor {
            kind,
            storage_name: name.to_string(),
            digest: String::new(),
            size_bytes: 0,
        };
        Self::new(
            describe(ArtifactKind::Wheel, wheel),
            describe(ArtifactKind::SourceArchive, source_archive),
        )
    }

    /// Wheel first, then the source archive.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ArtifactDescriptor>> {
        [&self.wheel, &self.source_archive].into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_file_name() {
        assert_eq!(
            ArtifactKind::from_file_name("pkg-1.0-py3-none-any.whl"),
            Some(ArtifactKind::Wheel)
        );
        assert_eq!(
            ArtifactKind::from_file_name("pkg-1.0.tar.gz"),
            Some(ArtifactKind::SourceArchive)
        );
        assert_eq!(ArtifactKind::from_file_name("pkg-1.0.zip"), None);
        assert_eq!(ArtifactKind::from_file_name("build.log"), None);
    }

    #[test]
    fn test_collect_exactly_one_each() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pkg-1.0-py3-none-any.whl"), b"w").unwrap();
        std::fs::write(dir.path().join("pkg-1.0.tar.gz"), b"s").unwrap();
        std::fs::write(dir.path().join("README.txt"), b"ignored").unwrap();

        let out = BuildOutput::collect(dir.path()).unwrap();
        assert_eq!(out.wheel.file_name, "pkg-1.0-py3-none-any.whl");
        assert_eq!(out.source_archive.file_name, "pkg-1.0.tar.gz");
        assert_eq!(out.iter().count(), 2);
    }

    #[test]
    fn test_collect_missing_wheel_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pkg-1.0.tar.gz"), b"s").unwrap();

        match BuildOutput::collect(dir.path()) {
            Err(PipelineError::ArtifactCount { kind, found }) => {
                assert_eq!(kind, ArtifactKind::Wheel);
                assert!(found.is_empty());
            }
            other => panic!("expected ArtifactCount, got {other:?}"),
        }
    }

    #[test]
    fn test_collect_two_archives_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pkg-1.0-py3-none-any.whl"), b"w").unwrap();
        std::fs::write(dir.path().join("pkg-1.0.tar.gz"), b"s").unwrap();
        std::fs::write(dir.path().join("pkg-1.1.tar.gz"), b"s").unwrap();

        match BuildOutput::collect(dir.path()) {
            Err(PipelineError::ArtifactCount { kind, found }) => {
                assert_eq!(kind, ArtifactKind::SourceArchive);
                assert_eq!(found, vec!["pkg-1.0.tar.gz", "pkg-1.1.tar.gz"]);
            }
            other => panic!("expected ArtifactCount, got {other:?}"),
        }
    }

    #[test]
    fn test_pair_iterates_wheel_first() {
        let pair = ArtifactPair::from_names("a.whl", "a.tar.gz");
        let kinds: Vec<_> = pair.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ArtifactKind::Wheel, ArtifactKind::SourceArchive]);
    }
}
