//! pkgci-store: named artifact storage for pkgci
//!
//! Carries built packages from the build stage to every test cell, and the
//! per-cell reports and logs out of the run.
//!
//! ## Key Components
//!
//! - `ArtifactStore`: write-once, digest-verified put/get by name
//! - `FsArtifactStore`: filesystem backend safe to share between processes
//! - `fakes::MemoryArtifactStore`: in-memory backend for tests

mod error;
pub mod fakes;
pub mod fs;
pub mod storage_traits;

pub use error::StoreError;
pub use fs::FsArtifactStore;
pub use storage_traits::{
    validate_name, ArtifactStore, BlobDigest, BlobManifest, RetentionPolicy, StoreResult,
    DEFAULT_RETENTION_DAYS,
};
