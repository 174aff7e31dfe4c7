use crate::camera::{acquire_with_backoff, BackoffPolicy, Camera};
use crate::common::config::{Config, SessionConfig};
use crate::common::{FaceProofError, Result};
use crate::core::face::Embedding;
use crate::core::lighting::{LightingAssessment, LightingAssessor};
use crate::core::provider::ProviderHandle;
use crate::core::quality::{FaceQuality, QualityAssessor};
use crate::core::similarity::{MatchOutcome, SimilarityEngine};
use crate::session::clock::Clock;
use crate::session::history::{AttemptHistory, VerificationAttempt};
use crate::session::state::{CheckFailure, SessionEvent, SessionState, SessionStatus};
use crate::storage::DescriptorStore;
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

/// What a single [`VerificationSession::tick`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing was due, or the session is not running.
    Idle,
    Verified(MatchOutcome),
    /// A check failed and the warning window opened.
    Warning(CheckFailure),
    /// A retry inside the warning window failed; the window stays open.
    RetryFailed(CheckFailure),
    /// A retry succeeded inside the window.
    Recovered(MatchOutcome),
    /// The window closed without a successful retry; back to normal cadence.
    WindowExpired,
    Failed(String),
}

struct CheckReport {
    result: std::result::Result<MatchOutcome, CheckFailure>,
    lighting: Option<LightingAssessment>,
    quality: Option<FaceQuality>,
}

/// Periodic identity verification for one candidate.
///
/// The session is driven by [`tick`](Self::tick), which acts only when a check or
/// a deadline is due according to the injected [`Clock`]. [`run`](Self::run)
/// wraps it in a sleep loop for production use.
pub struct VerificationSession {
    profile_id: String,
    provider: Arc<ProviderHandle>,
    store: Arc<dyn DescriptorStore>,
    camera: Box<dyn Camera>,
    clock: Arc<dyn Clock>,
    engine: SimilarityEngine,
    lighting: LightingAssessor,
    quality: QualityAssessor,
    backoff: BackoffPolicy,
    config: SessionConfig,
    state: SessionState,
    references: Vec<Embedding>,
    consecutive_failures: u32,
    history: AttemptHistory,
    next_check: Option<Instant>,
    events: UnboundedSender<SessionEvent>,
}

impl VerificationSession {
    pub fn new(
        profile_id: impl Into<String>,
        provider: Arc<ProviderHandle>,
        store: Arc<dyn DescriptorStore>,
        camera: Box<dyn Camera>,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> (Self, UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let session = Self {
            profile_id: profile_id.into(),
            provider,
            store,
            camera,
            clock,
            engine: SimilarityEngine::from_config(&config.similarity),
            lighting: LightingAssessor::new(config.lighting.clone()),
            quality: QualityAssessor::new(config.quality.clone()),
            backoff: BackoffPolicy::from_config(&config.camera),
            config: config.session.clone(),
            state: SessionState::Idle,
            references: Vec::new(),
            consecutive_failures: 0,
            history: AttemptHistory::new(config.session.history_size),
            next_check: None,
            events,
        };
        (session, receiver)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn history(&self) -> &AttemptHistory {
        &self.history
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    /// Acquires the camera, initializes the provider and loads the reference
    /// profile. On error the session is `Failed` and never enters `Monitoring`.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(FaceProofError::InvalidState(format!(
                "Session for {} cannot start from {:?}",
                self.profile_id, self.state
            )));
        }

        self.transition(SessionState::Initializing);
        if let Err(e) = self.initialize().await {
            self.fail(format!("Initialization failed: {}", e));
            return Err(e);
        }

        self.transition(SessionState::Monitoring);
        // First check runs right away
        self.next_check = Some(self.clock.now());
        Ok(())
    }

    async fn initialize(&mut self) -> Result<()> {
        acquire_with_backoff(self.camera.as_mut(), &self.backoff).await?;
        self.provider.ensure_initialized().await?;

        let profile = self
            .store
            .load(&self.profile_id)
            .await?
            .ok_or_else(|| FaceProofError::NoReferenceProfile(self.profile_id.clone()))?;
        self.references = profile.references();
        tracing::info!(
            "Loaded reference profile {} ({} references, digest {})",
            self.profile_id,
            self.references.len(),
            profile.digest()
        );

        // Make sure frames actually flow before monitoring begins
        self.camera.capture().await?;
        Ok(())
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_wakeup(&self) -> Option<Instant> {
        match &self.state {
            SessionState::Monitoring => self.next_check,
            SessionState::Warning { deadline } => Some(self.next_check.map_or(*deadline, |n| n.min(*deadline))),
            _ => None,
        }
    }

    pub async fn tick(&mut self) -> TickOutcome {
        let now = self.clock.now();

        match self.state.clone() {
            SessionState::Monitoring => {
                if self.next_check.map_or(true, |due| now < due) {
                    return TickOutcome::Idle;
                }
                let report = self.check_once().await;
                let finished = self.clock.now();
                self.on_monitoring_result(report, finished)
            }
            SessionState::Warning { deadline } => {
                if now >= deadline {
                    return self.expire_window(now);
                }
                if self.next_check.map_or(true, |due| now < due) {
                    return TickOutcome::Idle;
                }
                let report = self.check_once().await;
                let finished = self.clock.now();
                if finished >= deadline {
                    tracing::debug!("Retry for {} finished after the warning deadline, discarding it", self.profile_id);
                    return self.expire_window(finished);
                }
                self.on_retry_result(report, finished)
            }
            _ => TickOutcome::Idle,
        }
    }

    fn on_monitoring_result(&mut self, report: CheckReport, finished: Instant) -> TickOutcome {
        match &report.result {
            Ok(outcome) => {
                self.consecutive_failures = 0;
                self.next_check = Some(finished + self.check_interval());
                // Positive feedback is sampled so the candidate is not nagged on every check
                if rand::thread_rng().gen_bool(self.config.success_feedback_probability) {
                    self.emit(SessionEvent::StatusChanged(SessionStatus::Success));
                    self.emit(SessionEvent::Success);
                }
                TickOutcome::Verified(*outcome)
            }
            Err(failure) => {
                self.consecutive_failures += 1;
                tracing::warn!(
                    "Verification check failed for {} ({}/{}): {}",
                    self.profile_id, self.consecutive_failures, self.config.max_consecutive_failures, failure
                );

                // The budget is only settled when the window closes
                let deadline = finished + Duration::from_millis(self.config.warning_window_ms);
                self.next_check = Some(finished + self.retry_interval());
                self.transition(SessionState::Warning { deadline });
                self.emit_failure_feedback(failure, &report);
                TickOutcome::Warning(failure.clone())
            }
        }
    }

    fn on_retry_result(&mut self, report: CheckReport, finished: Instant) -> TickOutcome {
        match &report.result {
            Ok(outcome) => {
                tracing::info!("Verification recovered for {}", self.profile_id);
                self.consecutive_failures = 0;
                self.next_check = Some(finished + self.check_interval());
                self.emit(SessionEvent::StatusChanged(SessionStatus::Success));
                self.emit(SessionEvent::Success);
                self.transition(SessionState::Monitoring);
                TickOutcome::Recovered(*outcome)
            }
            Err(failure) => {
                tracing::debug!("Retry failed for {}: {}", self.profile_id, failure);
                self.next_check = Some(finished + self.retry_interval());
                self.emit_failure_feedback(failure, &report);
                TickOutcome::RetryFailed(failure.clone())
            }
        }
    }

    fn expire_window(&mut self, now: Instant) -> TickOutcome {
        self.consecutive_failures += 1;
        tracing::warn!(
            "Warning window expired for {} ({}/{})",
            self.profile_id, self.consecutive_failures, self.config.max_consecutive_failures
        );

        if self.consecutive_failures >= self.config.max_consecutive_failures {
            let reason = format!(
                "Identity not re-verified within {} ms after {} consecutive failures",
                self.config.warning_window_ms, self.consecutive_failures
            );
            self.fail(reason.clone());
            return TickOutcome::Failed(reason);
        }

        self.next_check = Some(now + self.check_interval());
        self.transition(SessionState::Monitoring);
        TickOutcome::WindowExpired
    }

    async fn check_once(&mut self) -> CheckReport {
        let mut report = CheckReport { result: Err(CheckFailure::NoFace), lighting: None, quality: None };
        report.result = self.run_check(&mut report).await;

        let similarity = match &report.result {
            Ok(outcome) => Some(outcome.similarity),
            Err(CheckFailure::Mismatch { similarity, .. } | CheckFailure::SuddenDrop { similarity, .. }) => Some(*similarity),
            Err(_) => None,
        };
        self.history.record(VerificationAttempt {
            timestamp: Utc::now(),
            similarity,
            matched: report.result.is_ok(),
            lighting_level: report.lighting.as_ref().map(|l| l.level),
            error: report.result.as_ref().err().map(ToString::to_string),
        });

        report
    }

    async fn run_check(&mut self, report: &mut CheckReport) -> std::result::Result<MatchOutcome, CheckFailure> {
        let frame = self.camera.capture().await.map_err(|e| CheckFailure::Capture(e.to_string()))?;

        let lighting = self.lighting.assess(&frame);
        let lighting_adequate = lighting.is_adequate;
        report.lighting = Some(lighting);

        let faces = self
            .provider
            .detect_faces(&frame)
            .await
            .map_err(|e| CheckFailure::Provider(e.to_string()))?;
        match faces.len() {
            0 => return Err(CheckFailure::NoFace),
            1 => {}
            n => return Err(CheckFailure::MultipleFaces(n)),
        }
        report.quality = Some(self.quality.assess_face(frame.width() as f32, frame.height() as f32, &faces[0]));

        let embedding = self
            .provider
            .get_embedding(&frame, self.config.min_detection_confidence)
            .await
            .map_err(|e| CheckFailure::Provider(e.to_string()))?
            .ok_or(CheckFailure::NoEmbedding)?;

        let outcome = self
            .engine
            .best_match(&embedding, self.references.as_slice(), lighting_adequate)
            .ok_or(CheckFailure::NoEmbedding)?;
        tracing::debug!(
            "Check for {}: score={:.4} similarity={:.4} threshold={:.4} reference={}",
            self.profile_id, outcome.score, outcome.similarity, outcome.threshold, outcome.reference_index
        );

        if !outcome.matched {
            return Err(CheckFailure::Mismatch { similarity: outcome.similarity, threshold: outcome.threshold });
        }
        if let Some(baseline) = self.history.sudden_drop(outcome.similarity, self.config.sudden_drop_ratio) {
            return Err(CheckFailure::SuddenDrop { similarity: outcome.similarity, baseline });
        }
        Ok(outcome)
    }

    /// Releases the camera and stops scheduling. Idempotent; a failed session
    /// keeps its failure state.
    pub fn stop(&mut self) {
        self.camera.release();
        self.next_check = None;
        if !matches!(self.state, SessionState::Failed { .. } | SessionState::Stopped) {
            tracing::info!("Verification session for {} stopped", self.profile_id);
            self.transition(SessionState::Stopped);
        }
    }

    /// Starts the session if needed, then ticks until it fails or `cancel` fires.
    /// A check in flight at cancellation is dropped.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        if self.state == SessionState::Idle {
            self.start().await?;
        }

        while let Some(wakeup) = self.next_wakeup() {
            let delay = wakeup.saturating_duration_since(self.clock.now());
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
        Ok(())
    }

    fn check_interval(&self) -> Duration {
        Duration::from_millis(self.config.check_interval_ms)
    }

    fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.config.retry_interval_ms)
    }

    fn transition(&mut self, state: SessionState) {
        let previous_status = self.state.status();
        tracing::debug!("Session {}: {:?} -> {:?}", self.profile_id, self.state, state);
        self.state = state;

        let status = self.state.status();
        if status != previous_status {
            self.emit(SessionEvent::StatusChanged(status));
        }
    }

    fn fail(&mut self, reason: String) {
        if matches!(self.state, SessionState::Failed { .. }) {
            return;
        }
        tracing::error!("Verification session for {} failed: {}", self.profile_id, reason);
        self.camera.release();
        self.next_check = None;
        self.transition(SessionState::Failed { reason: reason.clone() });
        self.emit(SessionEvent::Failure { reason });
    }

    fn emit_failure_feedback(&self, failure: &CheckFailure, report: &CheckReport) {
        if matches!(failure, CheckFailure::MultipleFaces(_)) {
            self.emit(SessionEvent::MultipleFaces);
        }
        self.emit(SessionEvent::Guidance(failure.guidance(report.lighting.as_ref(), report.quality.as_ref())));
    }

    fn emit(&self, event: SessionEvent) {
        // The receiver may have been dropped; events are advisory
        let _ = self.events.send(event);
    }
}

impl Drop for VerificationSession {
    fn drop(&mut self) {
        self.camera.release();
    }
}
