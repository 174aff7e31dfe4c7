use crate::common::Result;
use crate::core::face::Embedding;
use crate::storage::{DescriptorStore, ReferenceProfile};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Read-through cache in front of a (usually remote) store. Entries may be stale
/// until invalidated; sessions load once at start so that is acceptable.
pub struct CachedDescriptorStore<S> {
    remote: S,
    cache: RwLock<HashMap<String, ReferenceProfile>>,
}

impl<S: DescriptorStore> CachedDescriptorStore<S> {
    pub fn new(remote: S) -> Self {
        Self {
            remote,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn invalidate(&self, profile_id: &str) {
        self.cache.write().await.remove(profile_id);
    }

    pub async fn cached_profiles(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[async_trait]
impl<S: DescriptorStore> DescriptorStore for CachedDescriptorStore<S> {
    async fn load(&self, profile_id: &str) -> Result<Option<ReferenceProfile>> {
        if let Some(profile) = self.cache.read().await.get(profile_id) {
            tracing::debug!("Profile cache hit for {}", profile_id);
            return Ok(Some(profile.clone()));
        }

        let loaded = self.remote.load(profile_id).await?;
        if let Some(profile) = &loaded {
            self.cache.write().await.insert(profile_id.to_string(), profile.clone());
        }
        Ok(loaded)
    }

    async fn append(&self, profile_id: &str, embeddings: &[Embedding], qualities: &[f32]) -> Result<()> {
        self.remote.append(profile_id, embeddings, qualities).await?;
        self.invalidate(profile_id).await;
        Ok(())
    }

    async fn replace(&self, profile: &ReferenceProfile) -> Result<()> {
        self.remote.replace(profile).await?;
        self.cache.write().await.insert(profile.profile_id.clone(), profile.clone());
        Ok(())
    }

    async fn replace_canonical(&self, profile_id: &str, canonical: &[f32]) -> Result<()> {
        self.remote.replace_canonical(profile_id, canonical).await?;
        if let Some(profile) = self.cache.write().await.get_mut(profile_id) {
            profile.canonical = Some(canonical.to_vec());
        }
        Ok(())
    }
}
