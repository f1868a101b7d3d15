//! In-memory fake for the artifact store (testing only)
//!
//! `MemoryArtifactStore` satisfies the `ArtifactStore` contract without
//! touching the filesystem, and can be told to fail puts for chosen names so
//! callers can exercise their best-effort paths.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::storage_traits::*;

/// In-memory store backed by a `HashMap<name, (manifest, bytes)>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    blobs: Mutex<HashMap<String, (BlobManifest, Vec<u8>)>>,
    failing_puts: Mutex<HashSet<String>>,
    retention: RetentionPolicy,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: RetentionPolicy) -> Self {
        Self {
            retention,
            ..Self::default()
        }
    }

    /// Make every future `put` of `name` fail with an IO error.
    pub fn fail_puts_for(&self, name: &str) {
        self.failing_puts.lock().unwrap().insert(name.to_string());
    }

    /// Names currently stored, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.blobs.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, name: &str, data: &[u8]) -> StoreResult<BlobManifest> {
        validate_name(name)?;
        if self.failing_puts.lock().unwrap().contains(name) {
            return Err(StoreError::Io(std::io::Error::other(format!(
                "injected put failure for {name}"
            ))));
        }
        let mut blobs = self.blobs.lock().unwrap();
        if blobs.contains_key(name) {
            return Err(StoreError::AlreadyExists {
                name: name.to_string(),
            });
        }
        let manifest = BlobManifest::new(name, data, self.retention);
        blobs.insert(name.to_string(), (manifest.clone(), data.to_vec()));
        Ok(manifest)
    }

    async fn get(&self, name: &str) -> StoreResult<Vec<u8>> {
        let blobs = self.blobs.lock().unwrap();
        let (manifest, data) = blobs.get(name).ok_or_else(|| StoreError::NotFound {
            name: name.to_string(),
        })?;
        manifest.verify(data)?;
        Ok(data.clone())
    }

    async fn manifest(&self, name: &str) -> StoreResult<BlobManifest> {
        let blobs = self.blobs.lock().unwrap();
        blobs
            .get(name)
            .map(|(m, _)| m.clone())
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
            })
    }

    async fn contains(&self, name: &str) -> StoreResult<bool> {
        Ok(self.blobs.lock().unwrap().contains_key(name))
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        let mut blobs = self.blobs.lock().unwrap();
        let mut pruned: Vec<String> = blobs
            .iter()
            .filter(|(_, (m, _))| m.is_expired(now))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &pruned {
            blobs.remove(name);
        }
        pruned.sort();
        Ok(pruned)
    }
}
