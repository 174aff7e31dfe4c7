use crate::camera::{acquire_with_backoff, BackoffPolicy, Camera};
use crate::common::config::{Config, SupervisorConfig};
use crate::common::{FaceProofError, Result};
use crate::core::face::{Embedding, Frame};
use crate::core::lighting::LightingAssessor;
use crate::core::provider::ProviderHandle;
use crate::core::quality::QualityAssessor;
use crate::core::similarity::SimilarityEngine;
use crate::session::clock::Clock;
use crate::storage::DescriptorStore;
use crate::supervisor::snapshot::SupervisionSnapshot;
use crate::supervisor::verdict::{compute_verdict, SupervisionVerdict, VerdictPolicy};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPlan {
    pub count: usize,
    pub interval: Duration,
}

impl SnapshotPlan {
    /// Clamps `requested` into the configured bounds and spreads the captures
    /// evenly over `duration`. The first capture happens at offset zero.
    pub fn new(duration: Duration, requested: usize, config: &SupervisorConfig) -> Self {
        let count = requested.clamp(config.min_snapshots, config.max_snapshots.max(config.min_snapshots));
        let interval = duration / count.max(1) as u32;
        Self { count, interval }
    }

    pub fn offset(&self, index: usize) -> Duration {
        self.interval * index as u32
    }
}

/// Takes scheduled snapshots through a timed assessment and aggregates them into
/// a verdict. Independent of any verification session running alongside it.
pub struct SnapshotSupervisor {
    profile_id: String,
    provider: Arc<ProviderHandle>,
    store: Arc<dyn DescriptorStore>,
    camera: Box<dyn Camera>,
    clock: Arc<dyn Clock>,
    engine: SimilarityEngine,
    lighting: LightingAssessor,
    quality: QualityAssessor,
    backoff: BackoffPolicy,
    config: SupervisorConfig,
    policy: VerdictPolicy,
    references: Vec<Embedding>,
    reference_digest: Option<String>,
    plan: Option<SnapshotPlan>,
    started_at: Option<Instant>,
    snapshots: Vec<SupervisionSnapshot>,
    active: bool,
}

impl SnapshotSupervisor {
    pub fn new(
        profile_id: impl Into<String>,
        provider: Arc<ProviderHandle>,
        store: Arc<dyn DescriptorStore>,
        camera: Box<dyn Camera>,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            profile_id: profile_id.into(),
            provider,
            store,
            camera,
            clock,
            engine: SimilarityEngine::new(config.similarity.metric, config.supervisor.thresholds),
            lighting: LightingAssessor::new(config.lighting.clone()),
            quality: QualityAssessor::new(config.quality.clone()),
            backoff: BackoffPolicy::from_config(&config.camera),
            policy: VerdictPolicy::from(&config.supervisor),
            config: config.supervisor.clone(),
            references: Vec::new(),
            reference_digest: None,
            plan: None,
            started_at: None,
            snapshots: Vec::new(),
            active: false,
        }
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    pub fn plan(&self) -> Option<SnapshotPlan> {
        self.plan
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn reference_digest(&self) -> Option<&str> {
        self.reference_digest.as_deref()
    }

    pub async fn start(&mut self, duration: Duration, requested_snapshots: usize) -> Result<SnapshotPlan> {
        if self.active || self.plan.is_some() {
            return Err(FaceProofError::InvalidState(format!(
                "Supervisor for {} was already started",
                self.profile_id
            )));
        }

        acquire_with_backoff(self.camera.as_mut(), &self.backoff).await?;
        if let Err(e) = self.load_dependencies().await {
            self.camera.release();
            return Err(e);
        }

        let plan = SnapshotPlan::new(duration, requested_snapshots, &self.config);
        tracing::info!(
            "Supervising {} with {} snapshots every {:.1}s",
            self.profile_id,
            plan.count,
            plan.interval.as_secs_f32()
        );

        self.plan = Some(plan);
        self.started_at = Some(self.clock.now());
        self.active = true;
        Ok(plan)
    }

    async fn load_dependencies(&mut self) -> Result<()> {
        self.provider.ensure_initialized().await?;
        let profile = self
            .store
            .load(&self.profile_id)
            .await?
            .ok_or_else(|| FaceProofError::NoReferenceProfile(self.profile_id.clone()))?;
        self.references = profile.references();
        self.reference_digest = Some(profile.digest());
        Ok(())
    }

    /// When the next scheduled capture is due, or `None` once the schedule is done.
    pub fn next_due(&self) -> Option<Instant> {
        let (plan, started_at) = (self.plan?, self.started_at?);
        let index = self.snapshots.len();
        (self.active && index < plan.count).then(|| started_at + plan.offset(index))
    }

    /// Takes the next snapshot if it is due. Returns its index.
    pub async fn tick(&mut self) -> Option<usize> {
        let due = self.next_due()?;
        if self.clock.now() < due {
            return None;
        }

        let index = self.snapshots.len();
        let snapshot = self.capture_snapshot(index).await;
        tracing::debug!(
            "Snapshot {}: face={} multiple={} verified={} quality={:?}",
            index, snapshot.has_face, snapshot.has_multiple_faces, snapshot.face_verified, snapshot.face_quality
        );
        self.snapshots.push(snapshot);

        if self.next_due().is_none() {
            tracing::info!("All {} snapshots taken for {}", self.snapshots.len(), self.profile_id);
            self.camera.release();
        }
        Some(index)
    }

    async fn capture_snapshot(&mut self, index: usize) -> SupervisionSnapshot {
        let taken_at = Utc::now();

        let frame = match self.camera.capture().await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Snapshot {} capture failed: {}", index, e);
                return SupervisionSnapshot::failed(index, taken_at, None, e.to_string());
            }
        };

        let faces = match self.provider.detect_faces(&frame).await {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!("Snapshot {} detection failed: {}", index, e);
                return SupervisionSnapshot::failed(index, taken_at, Some(frame), e.to_string());
            }
        };

        let lighting = self.lighting.assess(&frame);
        let has_multiple_faces = faces.len() > 1;
        let face_quality = match faces.as_slice() {
            [face] => Some(self.quality.assess_face(frame.width() as f32, frame.height() as f32, face).overall),
            _ => None,
        };

        let embedding = self.embedding(&frame, index).await;
        let outcome = embedding
            .as_ref()
            .and_then(|e| self.engine.best_match(e, self.references.as_slice(), lighting.is_adequate));

        SupervisionSnapshot {
            index,
            taken_at,
            // The embedding pass uses a lower confidence floor than detection
            has_face: !faces.is_empty() || embedding.is_some(),
            has_multiple_faces,
            face_count: faces.len(),
            face_boxes: faces.iter().map(|f| f.bbox).collect(),
            face_quality,
            face_verified: outcome.map_or(false, |o| o.matched),
            similarity: outcome.map(|o| o.similarity),
            lighting_level: Some(lighting.level),
            error: None,
            image: Some(frame),
        }
    }

    async fn embedding(&self, frame: &Frame, index: usize) -> Option<Embedding> {
        match self.provider.get_embedding(frame, self.config.min_detection_confidence).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!("Snapshot {} embedding failed: {}", index, e);
                None
            }
        }
    }

    /// Releases the camera and cancels the remaining schedule. Idempotent.
    pub fn stop(&mut self) {
        if self.active {
            tracing::info!(
                "Supervisor for {} stopped after {} snapshots",
                self.profile_id,
                self.snapshots.len()
            );
        }
        self.active = false;
        self.camera.release();
    }

    /// Follows the schedule until every snapshot is taken or `cancel` fires.
    pub async fn run(&mut self, cancel: CancellationToken) {
        while let Some(due) = self.next_due() {
            let delay = due.saturating_duration_since(self.clock.now());
            let cancelled = tokio::select! {
                _ = cancel.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                break;
            }

            let cancelled = tokio::select! {
                _ = cancel.cancelled() => true,
                _ = self.tick() => false,
            };
            if cancelled {
                break;
            }
        }
        self.stop();
    }

    /// Same verdict for the same snapshot set, however often it is called.
    pub fn verify_test_integrity(&self) -> SupervisionVerdict {
        let verdict = compute_verdict(&self.snapshots, &self.policy);
        tracing::info!(
            "Integrity verdict for {}: verified={} no_face={} multiple={} mismatch={}",
            self.profile_id,
            verdict.verified,
            verdict.violations.no_face_detected,
            verdict.violations.multiple_faces_detected,
            verdict.violations.identity_mismatch
        );
        verdict
    }

    pub fn snapshots(&self) -> &[SupervisionSnapshot] {
        &self.snapshots
    }
}

impl Drop for SnapshotSupervisor {
    fn drop(&mut self) {
        self.camera.release();
    }
}
