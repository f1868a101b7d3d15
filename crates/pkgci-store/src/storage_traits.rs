//! Storage trait definitions for pkgci
//!
//! The artifact store is the only channel that carries bytes from the build
//! stage to the test cells, and from the test cells to whoever inspects the
//! run afterwards. Implementations must tolerate `get` running in a different
//! process (or on a different machine sharing the root) than `put`.
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// Result type for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Retention applied when nothing else is configured.
pub const DEFAULT_RETENTION_DAYS: u32 = 5;

// ---------------------------------------------------------------------------
// BlobDigest
// ---------------------------------------------------------------------------

/// SHA-256 digest of a stored blob (lowercase hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobDigest(String);

impl BlobDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        BlobDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for BlobDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// Advisory retention window for stored blobs.
///
/// Expiry is recorded on the manifest; `get` still serves expired blobs and
/// only `prune_expired` removes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub days: u32,
}

impl RetentionPolicy {
    pub fn days(days: u32) -> Self {
        Self { days }
    }

    /// Expiry timestamp for a blob stored at `stored_at`.
    pub fn expires_at(&self, stored_at: DateTime<Utc>) -> DateTime<Utc> {
        stored_at + Duration::days(i64::from(self.days))
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::days(DEFAULT_RETENTION_DAYS)
    }
}

// ---------------------------------------------------------------------------
// BlobManifest
// ---------------------------------------------------------------------------

/// Metadata recorded alongside every stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobManifest {
    /// Name the blob was stored under
    pub name: String,
    /// Digest of the bytes at put time
    pub digest: BlobDigest,
    /// Size in bytes
    pub size_bytes: u64,
    /// When the blob was stored
    pub stored_at: DateTime<Utc>,
    /// When the blob becomes eligible for pruning
    pub expires_at: DateTime<Utc>,
}

impl BlobManifest {
    /// Build the manifest for `data` stored now under `name`.
    pub fn new(name: &str, data: &[u8], retention: RetentionPolicy) -> Self {
        let stored_at = Utc::now();
        Self {
            name: name.to_string(),
            digest: BlobDigest::from_bytes(data),
            size_bytes: data.len() as u64,
            stored_at,
            expires_at: retention.expires_at(stored_at),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Check `data` against the recorded digest.
    pub fn verify(&self, data: &[u8]) -> StoreResult<()> {
        let actual = BlobDigest::from_bytes(data);
        if actual != self.digest {
            return Err(StoreError::Corrupt {
                name: self.name.clone(),
                expected: self.digest.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }
}

/// Reject names that are not a single plain path component.
pub fn validate_name(name: &str) -> StoreResult<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(StoreError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ArtifactStore
// ---------------------------------------------------------------------------

/// Write-once named blob store.
///
/// Guarantees:
/// - `get(name)` after a successful `put(name, data)` returns exactly `data`.
/// - A second `put` of the same name fails with `StoreError::AlreadyExists`.
/// - Bytes that no longer match their manifest surface as `StoreError::Corrupt`.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `data` under `name`.
    async fn put(&self, name: &str, data: &[u8]) -> StoreResult<BlobManifest>;

    /// Retrieve the bytes stored under `name`.
    async fn get(&self, name: &str) -> StoreResult<Vec<u8>>;

    /// Manifest recorded for `name`.
    async fn manifest(&self, name: &str) -> StoreResult<BlobManifest>;

    /// Whether a blob exists under `name`.
    async fn contains(&self, name: &str) -> StoreResult<bool>;

    /// Remove every blob whose retention window has elapsed at `now`.
    /// Returns the pruned names.
    async fn prune_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>>;

    /// Persist the contents of a file under `name`.
    async fn put_file(&self, name: &str, path: &Path) -> StoreResult<BlobManifest> {
        let data = tokio::fs::read(path).await?;
        self.put(name, &data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name_accepts_artifact_filenames() {
        assert!(validate_name("sdc11073-2.3.1-py3-none-any.whl").is_ok());
        assert!(validate_name("sdc11073-2.3.1.tar.gz").is_ok());
        assert!(validate_name("unittest_report_ubuntu-latest_py3.12_wheel.html").is_ok());
    }

    #[test]
    fn test_validate_name_rejects_paths() {
        for bad in ["", ".", "..", "dist/pkg.whl", "..\\pkg.whl", "a\0b"] {
            assert!(
                matches!(validate_name(bad), Err(StoreError::InvalidName { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_retention_expiry() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.days, 5);

        let manifest = BlobManifest::new("a.log", b"log", policy);
        assert!(!manifest.is_expired(manifest.stored_at));
        assert!(manifest.is_expired(manifest.stored_at + Duration::days(5)));
    }

    #[test]
    fn test_manifest_verify_detects_tampering() {
        let manifest = BlobManifest::new("a.whl", b"original", RetentionPolicy::default());
        assert!(manifest.verify(b"original").is_ok());
        assert!(matches!(
            manifest.verify(b"tampered"),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_digest_short() {
        let d = BlobDigest::from_bytes(b"hello");
        assert_eq!(d.as_str().len(), 64);
        assert_eq!(d.short().len(), 12);
        assert!(d.as_str().starts_with(d.short()));
    }
}
