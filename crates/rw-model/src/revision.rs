//! Immutable, content-hashed snapshots of a stored value.

use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Structural metadata of a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionConfig {
    /// Path of the node that owns the revision.
    pub path: String,
    /// Hash of the revision this one was derived from.
    pub parent_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An immutable snapshot of a value at a path.
///
/// The hash is the lowercase hex SHA-256 of the value's JSON encoding, so
/// two revisions with identical content always carry identical hashes.
/// Cloning a revision is cheap: data and config are shared.
pub struct Revision<T> {
    data: Arc<T>,
    hash: Arc<str>,
    config: Arc<RevisionConfig>,
}

impl<T> Clone for Revision<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            hash: Arc::clone(&self.hash),
            config: Arc::clone(&self.config),
        }
    }
}

impl<T: Serialize> Revision<T> {
    /// Creates a revision of `data` at `path`, derived from `parent`.
    pub fn new(path: impl Into<String>, data: T, parent: Option<&Revision<T>>) -> StoreResult<Self> {
        let hash = content_hash(&data)?;
        Ok(Self {
            data: Arc::new(data),
            hash: hash.into(),
            config: Arc::new(RevisionConfig {
                path: path.into(),
                parent_hash: parent.map(|p| p.hash().to_string()),
                created_at: Utc::now(),
            }),
        })
    }
}

impl<T> Revision<T> {
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Shared handle to the data, for callers that outlive the revision.
    pub fn data_arc(&self) -> Arc<T> {
        Arc::clone(&self.data)
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn config(&self) -> &RevisionConfig {
        &self.config
    }

    pub fn path(&self) -> &str {
        &self.config.path
    }

    /// True when both revisions carry the same content.
    pub fn same_content(&self, other: &Revision<T>) -> bool {
        self.hash == other.hash
    }
}

impl<T: fmt::Debug> fmt::Debug for Revision<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Revision")
            .field("path", &self.config.path)
            .field("hash", &self.hash)
            .field("parent_hash", &self.config.parent_hash)
            .field("data", &self.data)
            .finish()
    }
}

/// Computes the content fingerprint of a value.
pub fn content_hash<T: Serialize>(data: &T) -> StoreResult<String> {
    let encoded = serde_json::to_vec(data)?;
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash of an optional revision, for comparing branch heads.
pub(crate) fn hash_of<T>(revision: Option<&Revision<T>>) -> Option<&str> {
    revision.map(|r| r.hash())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, Clone, Serialize)]
    struct Sample {
        name: String,
        vlan: u32,
    }

    fn sample(vlan: u32) -> Sample {
        Sample {
            name: "olt".to_string(),
            vlan,
        }
    }

    #[test]
    fn test_hash_tracks_content() {
        let a = Revision::new("/devices/a", sample(100), None).unwrap();
        let b = Revision::new("/devices/b", sample(100), None).unwrap();
        let c = Revision::new("/devices/a", sample(200), Some(&a)).unwrap();

        assert!(a.same_content(&b));
        assert!(!a.same_content(&c));
        assert_eq!(a.hash().len(), 64);
        assert_eq!(c.config().parent_hash.as_deref(), Some(a.hash()));
    }

    #[test]
    fn test_clone_shares_data() {
        let a = Revision::new("/devices/a", sample(1), None).unwrap();
        let b = a.clone();
        assert!(Arc::ptr_eq(&a.data_arc(), &b.data_arc()));
    }
}
