use crate::common::error::{FaceProofError, Result};
use crate::core::face::Embedding;
use crate::storage::ReferenceProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PROFILE_SCHEMA_VERSION: u32 = 1;

/// Descriptor payloads as they appear in stored data. Older writers stored a
/// bare array, an array of arrays, or either of those encoded as a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredDescriptors {
    Multiple(Vec<Embedding>),
    Single(Embedding),
    Encoded(String),
}

impl StoredDescriptors {
    /// Resolves any stored shape into a list of embeddings.
    pub fn normalize(self) -> Result<Vec<Embedding>> {
        let embeddings = match self {
            StoredDescriptors::Multiple(embeddings) => embeddings,
            StoredDescriptors::Single(embedding) => vec![embedding],
            StoredDescriptors::Encoded(raw) => {
                let inner: StoredDescriptors = serde_json::from_str(&raw)
                    .map_err(|e| FaceProofError::CorruptDescriptor(format!("encoded descriptor: {}", e)))?;
                if let StoredDescriptors::Encoded(_) = inner {
                    return Err(FaceProofError::CorruptDescriptor("descriptor encoded more than once".into()));
                }
                inner.normalize()?
            }
        };

        for (index, embedding) in embeddings.iter().enumerate() {
            if embedding.is_empty() {
                return Err(FaceProofError::CorruptDescriptor(format!("embedding {} is empty", index)));
            }
            if embedding.iter().any(|v| !v.is_finite()) {
                return Err(FaceProofError::CorruptDescriptor(format!(
                    "embedding {} contains non-finite values", index
                )));
            }
        }

        Ok(embeddings)
    }
}

fn legacy_version() -> u32 {
    0
}

/// On-disk form of a [`ReferenceProfile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRecord {
    #[serde(default = "legacy_version")]
    pub version: u32,
    pub profile_id: String,
    pub descriptors: StoredDescriptors,
    #[serde(default)]
    pub qualities: Option<Vec<f32>>,
    #[serde(default)]
    pub canonical: Option<Embedding>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ProfileRecord {
    pub fn from_profile(profile: &ReferenceProfile) -> Self {
        Self {
            version: PROFILE_SCHEMA_VERSION,
            profile_id: profile.profile_id.clone(),
            descriptors: StoredDescriptors::Multiple(profile.embeddings.clone()),
            qualities: profile.qualities.clone(),
            canonical: profile.canonical.clone(),
            updated_at: Utc::now(),
        }
    }

    pub fn into_profile(self) -> Result<ReferenceProfile> {
        if self.version > PROFILE_SCHEMA_VERSION {
            return Err(FaceProofError::CorruptDescriptor(format!(
                "profile {} has unsupported schema version {}", self.profile_id, self.version
            )));
        }

        let embeddings = self.descriptors.normalize()?;
        let qualities = match self.qualities {
            Some(q) if q.len() == embeddings.len() => Some(q),
            Some(q) => {
                tracing::warn!(
                    "Profile {} has {} qualities for {} embeddings, ignoring qualities",
                    self.profile_id, q.len(), embeddings.len()
                );
                None
            }
            None => None,
        };

        Ok(ReferenceProfile {
            profile_id: self.profile_id,
            embeddings,
            qualities,
            canonical: self.canonical,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<Vec<Embedding>> {
        serde_json::from_str::<StoredDescriptors>(raw)?.normalize()
    }

    #[test]
    fn accepts_single_and_multiple_shapes() {
        assert_eq!(parse("[0.5, 1.5]").unwrap(), vec![vec![0.5, 1.5]]);
        assert_eq!(parse("[[0.5, 1.5], [2.0, 3.0]]").unwrap(), vec![vec![0.5, 1.5], vec![2.0, 3.0]]);
    }

    #[test]
    fn accepts_json_string_encoding() {
        assert_eq!(parse(r#""[[1.0, 2.0]]""#).unwrap(), vec![vec![1.0, 2.0]]);
        assert_eq!(parse(r#""[1.0, 2.0]""#).unwrap(), vec![vec![1.0, 2.0]]);
    }

    #[test]
    fn rejects_garbage_string() {
        assert!(matches!(parse(r#""not json""#), Err(FaceProofError::CorruptDescriptor(_))));
    }

    #[test]
    fn rejects_empty_inner_embedding() {
        assert!(matches!(parse("[[1.0], []]"), Err(FaceProofError::CorruptDescriptor(_))));
    }

    #[test]
    fn record_drops_misaligned_qualities() {
        let record = ProfileRecord {
            version: 1,
            profile_id: "bob".into(),
            descriptors: StoredDescriptors::Multiple(vec![vec![1.0], vec![2.0]]),
            qualities: Some(vec![0.9]),
            canonical: None,
            updated_at: Utc::now(),
        };
        let profile = record.into_profile().unwrap();
        assert_eq!(profile.embeddings.len(), 2);
        assert!(profile.qualities.is_none());
    }

    #[test]
    fn record_written_by_current_version_reads_back() {
        let mut profile = ReferenceProfile::new("carol", vec![vec![0.1, 0.2, 0.3]]);
        profile.qualities = Some(vec![0.8]);
        profile.canonical = Some(vec![0.1, 0.2, 0.3]);

        let json = serde_json::to_string(&ProfileRecord::from_profile(&profile)).unwrap();
        let read: ProfileRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(read.version, PROFILE_SCHEMA_VERSION);
        assert_eq!(read.into_profile().unwrap(), profile);
    }

    #[test]
    fn legacy_record_without_version_is_accepted() {
        let read: ProfileRecord =
            serde_json::from_str(r#"{"profile_id": "dave", "descriptors": [0.25, 0.75]}"#).unwrap();
        assert_eq!(read.version, 0);
        assert_eq!(read.into_profile().unwrap().embeddings, vec![vec![0.25, 0.75]]);
    }
}
