use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::storage_traits::{
    validate_name, ArtifactStore, BlobManifest, RetentionPolicy, StoreResult,
};

/// Filesystem-backed artifact store.
///
/// Layout: `<root>/blobs/<name>` plus `<root>/manifests/<name>.json`.
///
/// Both files are written to a temp file in the target directory and then
/// renamed into place, so a reader in another process sees either nothing or
/// the complete blob. The manifest is written last and is what makes a blob
/// visible.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    blobs_dir: PathBuf,
    manifests_dir: PathBuf,
    retention: RetentionPolicy,
}

impl FsArtifactStore {
    /// Open (or create) a store rooted at `root` with the default retention.
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        Self::with_retention(root, RetentionPolicy::default())
    }

    /// Open (or create) a store rooted at `root`.
    pub fn with_retention(root: impl AsRef<Path>, retention: RetentionPolicy) -> StoreResult<Self> {
        let blobs_dir = root.as_ref().join("blobs");
        let manifests_dir = root.as_ref().join("manifests");
        fs::create_dir_all(&blobs_dir)?;
        fs::create_dir_all(&manifests_dir)?;
        Ok(Self {
            blobs_dir,
            manifests_dir,
            retention,
        })
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.blobs_dir.join(name)
    }

    fn manifest_path(&self, name: &str) -> PathBuf {
        self.manifests_dir.join(format!("{name}.json"))
    }

    fn put_sync(&self, name: &str, data: &[u8]) -> StoreResult<BlobManifest> {
        validate_name(name)?;

        let manifest_path = self.manifest_path(name);
        if manifest_path.exists() {
            return Err(StoreError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let manifest = BlobManifest::new(name, data, self.retention);
        let encoded = serde_json::to_vec_pretty(&manifest)?;

        let blob_path = self.blob_path(name);
        match write_atomic(&self.blobs_dir, &blob_path, data, name) {
            // A blob without a manifest was never stored.
            Err(StoreError::AlreadyExists { .. }) if !manifest_path.exists() => {
                warn!(name = %name, "replacing orphaned blob");
                remove_if_present(&blob_path)?;
                write_atomic(&self.blobs_dir, &blob_path, data, name)?;
            }
            other => other?,
        }

        if let Err(e) = write_atomic(&self.manifests_dir, &manifest_path, &encoded, name) {
            if !matches!(e, StoreError::AlreadyExists { .. }) {
                remove_if_present(&blob_path).ok();
            }
            return Err(e);
        }

        debug!(
            name = %name,
            digest = %manifest.digest.short(),
            size = manifest.size_bytes,
            "stored artifact"
        );
        Ok(manifest)
    }

    fn manifest_sync(&self, name: &str) -> StoreResult<BlobManifest> {
        validate_name(name)?;
        let raw = fs::read(self.manifest_path(name)).map_err(|e| not_found_or_io(e, name))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn get_sync(&self, name: &str) -> StoreResult<Vec<u8>> {
        let manifest = self.manifest_sync(name)?;
        let data = fs::read(self.blob_path(name)).map_err(|e| not_found_or_io(e, name))?;
        manifest.verify(&data)?;
        Ok(data)
    }

    fn prune_sync(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        let mut pruned = Vec::new();
        for entry in fs::read_dir(&self.manifests_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let manifest: BlobManifest = match fs::read(&path)
                .map_err(StoreError::from)
                .and_then(|raw| serde_json::from_slice(&raw).map_err(StoreError::from))
            {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable manifest");
                    continue;
                }
            };
            if !manifest.is_expired(now) {
                continue;
            }
            // Manifest first: once it is gone the blob is invisible to readers.
            fs::remove_file(&path)?;
            remove_if_present(&self.blob_path(&manifest.name))?;
            pruned.push(manifest.name);
        }
        pruned.sort();
        Ok(pruned)
    }

    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(FsArtifactStore) -> StoreResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

fn write_atomic(dir: &Path, dest: &Path, data: &[u8], name: &str) -> StoreResult<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(dest).map_err(|e| {
        if e.error.kind() == ErrorKind::AlreadyExists {
            StoreError::AlreadyExists {
                name: name.to_string(),
            }
        } else {
            StoreError::Io(e.error)
        }
    })?;
    Ok(())
}

fn remove_if_present(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn not_found_or_io(e: std::io::Error, name: &str) -> StoreError {
    if e.kind() == ErrorKind::NotFound {
        StoreError::NotFound {
            name: name.to_string(),
        }
    } else {
        StoreError::Io(e)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, name: &str, data: &[u8]) -> StoreResult<BlobManifest> {
        let name = name.to_string();
        let data = data.to_vec();
        self.blocking(move |s| s.put_sync(&name, &data)).await
    }

    async fn get(&self, name: &str) -> StoreResult<Vec<u8>> {
        let name = name.to_string();
        self.blocking(move |s| s.get_sync(&name)).await
    }

    async fn manifest(&self, name: &str) -> StoreResult<BlobManifest> {
        let name = name.to_string();
        self.blocking(move |s| s.manifest_sync(&name)).await
    }

    async fn contains(&self, name: &str) -> StoreResult<bool> {
        match self.manifest(name).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        self.blocking(move |s| s.prune_sync(now)).await
    }
}
