//! Error types for pkgci-store

use thiserror::Error;

/// Errors that can occur while storing or retrieving named artifacts
#[derive(Error, Debug)]
pub enum StoreError {
    /// No blob has been stored under this name
    #[error("artifact not found: {name}")]
    NotFound { name: String },

    /// Names are write-once; a second put was attempted
    #[error("artifact already exists: {name}")]
    AlreadyExists { name: String },

    /// Stored bytes no longer match the digest recorded at put time
    #[error("artifact {name} is corrupt: expected digest {expected}, got {actual}")]
    Corrupt {
        name: String,
        expected: String,
        actual: String,
    },

    /// Name is empty, contains a path separator, or is a relative component
    #[error("invalid artifact name: {name:?}")]
    InvalidName { name: String },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest (de)serialization error
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_error_mentions_both_digests() {
        let err = StoreError::Corrupt {
            name: "pkg-1.0.0.tar.gz".to_string(),
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("pkg-1.0.0.tar.gz"));
        assert!(msg.contains("abc123"));
        assert!(msg.contains("def456"));
    }

    #[test]
    fn test_not_found_display() {
        let err = StoreError::NotFound {
            name: "missing.whl".to_string(),
        };
        assert!(err.to_string().contains("artifact not found"));
    }
}
