use crate::common::error::{FaceProofError, Result};
use crate::core::face::Embedding;
use crate::storage::descriptor::{ProfileRecord, StoredDescriptors, PROFILE_SCHEMA_VERSION};
use crate::storage::{DescriptorStore, ReferenceProfile};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;

/// One JSON file per profile under a directory.
pub struct FileDescriptorStore {
    dir: PathBuf,
}

impl FileDescriptorStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, profile_id: &str) -> Result<PathBuf> {
        let valid = !profile_id.is_empty()
            && !profile_id.starts_with('.')
            && profile_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
        if !valid {
            return Err(FaceProofError::Storage(format!("Invalid profile id: {:?}", profile_id)));
        }
        Ok(self.dir.join(format!("{}.json", profile_id)))
    }

    async fn read_record(&self, profile_id: &str) -> Result<Option<ProfileRecord>> {
        let path = self.path_for(profile_id)?;
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: ProfileRecord = serde_json::from_slice(&data)
            .map_err(|e| FaceProofError::CorruptDescriptor(format!("{}: {}", path.display(), e)))?;
        Ok(Some(record))
    }

    async fn write_record(&self, record: &ProfileRecord) -> Result<()> {
        let path = self.path_for(&record.profile_id)?;
        let tmp = path.with_extension("json.tmp");
        let encoded = serde_json::to_vec_pretty(record)?;
        fs::write(&tmp, encoded).await?;
        fs::rename(&tmp, &path).await?;
        tracing::debug!("Wrote profile {} to {}", record.profile_id, path.display());
        Ok(())
    }
}

#[async_trait]
impl DescriptorStore for FileDescriptorStore {
    async fn load(&self, profile_id: &str) -> Result<Option<ReferenceProfile>> {
        let Some(record) = self.read_record(profile_id).await? else {
            return Ok(None);
        };
        let profile = record.into_profile()?;
        if profile.is_empty() {
            return Ok(None);
        }
        Ok(Some(profile))
    }

    async fn append(&self, profile_id: &str, embeddings: &[Embedding], qualities: &[f32]) -> Result<()> {
        let mut profile = match self.read_record(profile_id).await? {
            Some(record) => record.into_profile()?,
            None => ReferenceProfile::new(profile_id, Vec::new()),
        };

        let had_embeddings = !profile.embeddings.is_empty();
        profile.embeddings.extend(embeddings.iter().cloned());

        profile.qualities = match (profile.qualities.take(), qualities.len() == embeddings.len()) {
            (Some(mut existing), true) => {
                existing.extend_from_slice(qualities);
                Some(existing)
            }
            (None, true) if !had_embeddings && !qualities.is_empty() => Some(qualities.to_vec()),
            _ => None,
        };

        self.write_record(&ProfileRecord::from_profile(&profile)).await
    }

    async fn replace(&self, profile: &ReferenceProfile) -> Result<()> {
        self.write_record(&ProfileRecord::from_profile(profile)).await
    }

    async fn replace_canonical(&self, profile_id: &str, canonical: &[f32]) -> Result<()> {
        let mut record = self
            .read_record(profile_id)
            .await?
            .ok_or_else(|| FaceProofError::NoReferenceProfile(profile_id.to_string()))?;

        // Normalize legacy payloads on the way through
        let embeddings = record.descriptors.normalize()?;
        record.descriptors = StoredDescriptors::Multiple(embeddings);
        record.canonical = Some(canonical.to_vec());
        record.version = PROFILE_SCHEMA_VERSION;
        record.updated_at = Utc::now();

        self.write_record(&record).await
    }
}
