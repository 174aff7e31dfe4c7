use crate::camera::{acquire_with_backoff, BackoffPolicy, Camera};
use crate::common::config::{Config, EnrollmentConfig};
use crate::common::{FaceProofError, Result};
use crate::core::face::Embedding;
use crate::core::lighting::LightingAssessor;
use crate::core::provider::ProviderHandle;
use crate::core::quality::{calculate_embedding_consistency, QualityAssessor};
use crate::storage::{DescriptorStore, ReferenceProfile};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentSample {
    pub embedding: Embedding,
    pub quality: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnrollMode {
    /// Discard any previous samples for the profile.
    #[default]
    Replace,
    Append,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleRejection {
    Capture(String),
    Provider(String),
    NoFace,
    MultipleFaces(usize),
    LowQuality { score: f32, hints: Vec<String> },
    NoEmbedding,
}

impl fmt::Display for SampleRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capture(e) => write!(f, "capture failed: {}", e),
            Self::Provider(e) => write!(f, "face provider error: {}", e),
            Self::NoFace => write!(f, "no face detected"),
            Self::MultipleFaces(n) => write!(f, "{} faces in view, only you should be visible", n),
            Self::LowQuality { score, hints } if hints.is_empty() => write!(f, "quality {:.2} too low", score),
            Self::LowQuality { score, hints } => write!(f, "quality {:.2} too low: {}", score, hints.join("; ")),
            Self::NoEmbedding => write!(f, "could not extract a face descriptor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentReport {
    pub profile_id: String,
    pub accepted: usize,
    pub rejected: usize,
    pub mean_quality: f32,
    /// Pairwise agreement of the accepted samples, see [`calculate_embedding_consistency`].
    pub consistency: f32,
    pub canonical_stored: bool,
}

/// Registers a reference profile from live captures. Storage is all-or-nothing:
/// nothing is written unless at least `min_samples` samples were accepted.
pub struct Enroller {
    provider: Arc<ProviderHandle>,
    store: Arc<dyn DescriptorStore>,
    quality: QualityAssessor,
    lighting: LightingAssessor,
    backoff: BackoffPolicy,
    config: EnrollmentConfig,
}

impl Enroller {
    pub fn new(provider: Arc<ProviderHandle>, store: Arc<dyn DescriptorStore>, config: &Config) -> Self {
        Self {
            provider,
            store,
            quality: QualityAssessor::new(config.quality.clone()),
            lighting: LightingAssessor::new(config.lighting.clone()),
            backoff: BackoffPolicy::from_config(&config.camera),
            config: config.enrollment.clone(),
        }
    }

    /// Captures samples from `camera` and stores them. At most `max_samples` frames
    /// are captured; capturing stops early once `target_samples` are accepted.
    pub async fn enroll(&self, profile_id: &str, camera: &mut dyn Camera, mode: EnrollMode) -> Result<EnrollmentReport> {
        self.provider.ensure_initialized().await?;
        if !camera.is_open() {
            acquire_with_backoff(camera, &self.backoff).await?;
        }

        tracing::info!(
            "Enrolling {}: target {} samples, at most {} captures",
            profile_id, self.config.target_samples, self.config.max_samples
        );

        let delay = Duration::from_millis(self.config.sample_delay_ms);
        let mut samples = Vec::new();
        let mut rejected = 0;

        for attempt in 0..self.config.max_samples {
            if samples.len() >= self.config.target_samples {
                break;
            }
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }

            match self.capture_sample(camera).await {
                Ok(sample) => {
                    samples.push(sample);
                    tracing::info!(
                        "Captured sample {}/{} with quality {:.2}",
                        samples.len(), self.config.target_samples, samples[samples.len() - 1].quality
                    );
                }
                Err(reason) => {
                    rejected += 1;
                    tracing::info!("Sample {} rejected: {}", attempt + 1, reason);
                }
            }
        }

        camera.release();

        let mut report = self.enroll_samples(profile_id, &samples, mode).await?;
        report.rejected = rejected;
        Ok(report)
    }

    async fn capture_sample(&self, camera: &mut dyn Camera) -> std::result::Result<EnrollmentSample, SampleRejection> {
        let frame = camera.capture().await.map_err(|e| SampleRejection::Capture(e.to_string()))?;

        let lighting = self.lighting.assess(&frame);
        if !lighting.is_adequate {
            tracing::debug!("Lighting {:.1}: {}", lighting.level, lighting.message);
        }

        let faces = self
            .provider
            .detect_faces(&frame)
            .await
            .map_err(|e| SampleRejection::Provider(e.to_string()))?;
        let face = match faces.as_slice() {
            [] => return Err(SampleRejection::NoFace),
            [face] => face,
            many => return Err(SampleRejection::MultipleFaces(many.len())),
        };

        let quality = self.quality.assess_face(frame.width() as f32, frame.height() as f32, face);
        if !quality.meets(self.config.min_sample_quality) {
            let mut hints = quality.suggestions();
            if !lighting.is_adequate {
                hints.push(lighting.message);
            }
            return Err(SampleRejection::LowQuality { score: quality.overall, hints });
        }

        let embedding = self
            .provider
            .get_embedding(&frame, self.config.min_detection_confidence)
            .await
            .map_err(|e| SampleRejection::Provider(e.to_string()))?
            .ok_or(SampleRejection::NoEmbedding)?;

        Ok(EnrollmentSample { embedding, quality: quality.overall })
    }

    /// Persists already-collected samples. Fails with `InsufficientSamples`, writing
    /// nothing, when fewer than `min_samples` are supplied.
    pub async fn enroll_samples(
        &self,
        profile_id: &str,
        samples: &[EnrollmentSample],
        mode: EnrollMode,
    ) -> Result<EnrollmentReport> {
        if samples.len() < self.config.min_samples {
            tracing::warn!(
                "Enrollment of {} aborted: {} of {} required samples",
                profile_id, samples.len(), self.config.min_samples
            );
            return Err(FaceProofError::InsufficientSamples {
                got: samples.len(),
                required: self.config.min_samples,
            });
        }

        let samples = &samples[..samples.len().min(self.config.max_samples)];
        let embeddings: Vec<Embedding> = samples.iter().map(|s| s.embedding.clone()).collect();
        let qualities: Vec<f32> = samples.iter().map(|s| s.quality).collect();

        let canonical_stored = match mode {
            EnrollMode::Replace => {
                // Samples, qualities and canonical land in one write
                let mut profile = ReferenceProfile::new(profile_id, embeddings.clone());
                profile.qualities = Some(qualities.clone());
                if self.config.store_canonical {
                    profile.canonical = canonical_embedding(samples, self.config.canonical_top_k);
                }
                self.store.replace(&profile).await?;
                profile.canonical.is_some()
            }
            EnrollMode::Append => {
                self.store.append(profile_id, &embeddings, &qualities).await?;
                let mut stored = false;
                if self.config.store_canonical {
                    let pool = self.stored_samples(profile_id).await?;
                    if let Some(canonical) = canonical_embedding(&pool, self.config.canonical_top_k) {
                        self.store.replace_canonical(profile_id, &canonical).await?;
                        stored = true;
                    }
                }
                stored
            }
        };

        let report = EnrollmentReport {
            profile_id: profile_id.to_string(),
            accepted: samples.len(),
            rejected: 0,
            mean_quality: qualities.iter().sum::<f32>() / qualities.len() as f32,
            consistency: calculate_embedding_consistency(&embeddings),
            canonical_stored,
        };

        tracing::info!(
            "Enrolled {} with {} samples (mean quality {:.2}, consistency {:.2})",
            profile_id, report.accepted, report.mean_quality, report.consistency
        );
        Ok(report)
    }

    async fn stored_samples(&self, profile_id: &str) -> Result<Vec<EnrollmentSample>> {
        let profile = self
            .store
            .load(profile_id)
            .await?
            .ok_or_else(|| FaceProofError::NoReferenceProfile(profile_id.to_string()))?;

        // Samples without a recorded quality rank equally
        let qualities = profile.qualities.unwrap_or_else(|| vec![1.0; profile.embeddings.len()]);
        Ok(profile
            .embeddings
            .into_iter()
            .zip(qualities)
            .map(|(embedding, quality)| EnrollmentSample { embedding, quality })
            .collect())
    }
}

/// Element-wise mean of the `top_k` best samples by quality. Only samples with the
/// same length as the best one take part.
pub fn canonical_embedding(samples: &[EnrollmentSample], top_k: usize) -> Option<Embedding> {
    let mut ranked: Vec<&EnrollmentSample> = samples.iter().collect();
    ranked.sort_by(|a, b| b.quality.total_cmp(&a.quality));

    let len = ranked.first()?.embedding.len();
    let chosen: Vec<&Embedding> = ranked
        .iter()
        .map(|s| &s.embedding)
        .filter(|e| e.len() == len)
        .take(top_k.max(1))
        .collect();

    let mut mean = vec![0.0f32; len];
    for embedding in &chosen {
        for (acc, &value) in mean.iter_mut().zip(embedding.iter()) {
            *acc += value;
        }
    }
    let count = chosen.len() as f32;
    mean.iter_mut().for_each(|v| *v /= count);
    Some(mean)
}
