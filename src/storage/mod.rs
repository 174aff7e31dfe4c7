pub mod cached_store;
pub mod descriptor;
pub mod file_store;

pub use cached_store::CachedDescriptorStore;
pub use descriptor::{ProfileRecord, StoredDescriptors, PROFILE_SCHEMA_VERSION};
pub use file_store::FileDescriptorStore;

use crate::common::Result;
use crate::core::face::Embedding;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Reference embeddings enrolled for one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceProfile {
    pub profile_id: String,
    pub embeddings: Vec<Embedding>,
    #[serde(default)]
    pub qualities: Option<Vec<f32>>,
    /// Element-wise mean of the best samples, if one was stored.
    #[serde(default)]
    pub canonical: Option<Embedding>,
}

impl ReferenceProfile {
    pub fn new(profile_id: impl Into<String>, embeddings: Vec<Embedding>) -> Self {
        Self {
            profile_id: profile_id.into(),
            embeddings,
            qualities: None,
            canonical: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty() && self.canonical.is_none()
    }

    /// Every embedding a live sample may be matched against.
    pub fn references(&self) -> Vec<Embedding> {
        let mut references = self.embeddings.clone();
        if let Some(canonical) = &self.canonical {
            references.push(canonical.clone());
        }
        references
    }

    /// Hex SHA-256 over the reference values, recorded in audit reports.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.profile_id.as_bytes());
        for embedding in self.references() {
            hasher.update((embedding.len() as u64).to_le_bytes());
            for value in embedding {
                hasher.update(value.to_le_bytes());
            }
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

/// Persistent reference storage. Implementations may be remote, cached, or both;
/// callers only assume calls are asynchronous and fail explicitly.
#[async_trait]
pub trait DescriptorStore: Send + Sync {
    /// `None` when nothing is enrolled for `profile_id`.
    async fn load(&self, profile_id: &str) -> Result<Option<ReferenceProfile>>;

    /// Adds embeddings to a profile, creating it if needed. `qualities` may be empty.
    async fn append(&self, profile_id: &str, embeddings: &[Embedding], qualities: &[f32]) -> Result<()>;

    /// Replaces the whole profile.
    async fn replace(&self, profile: &ReferenceProfile) -> Result<()>;

    async fn replace_canonical(&self, profile_id: &str, canonical: &[f32]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_include_canonical() {
        let mut profile = ReferenceProfile::new("alice", vec![vec![1.0, 2.0]]);
        assert_eq!(profile.references().len(), 1);
        profile.canonical = Some(vec![1.5, 2.5]);
        assert_eq!(profile.references().len(), 2);
    }

    #[test]
    fn digest_is_stable_and_value_sensitive() {
        let a = ReferenceProfile::new("alice", vec![vec![1.0, 2.0]]);
        let b = ReferenceProfile::new("alice", vec![vec![1.0, 2.0001]]);
        assert_eq!(a.digest(), a.clone().digest());
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }
}
