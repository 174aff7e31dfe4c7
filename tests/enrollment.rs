mod common;

use assert_matches::assert_matches;
use common::*;
use face_proctor::core::EnrollmentSample;
use face_proctor::session::{ManualClock, SessionState, TickOutcome, VerificationSession};
use async_trait::async_trait;
use face_proctor::core::face::Embedding;
use face_proctor::storage::{DescriptorStore, FileDescriptorStore, ReferenceProfile};
use face_proctor::{EnrollMode, Enroller, FaceProofError, Result};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::tempdir;
use tracing_test::traced_test;

fn samples(n: usize) -> Vec<EnrollmentSample> {
    (0..n)
        .map(|i| EnrollmentSample { embedding: genuine(), quality: 0.6 + i as f32 * 0.05 })
        .collect()
}

/// Memory store whose writes can be made to fail.
#[derive(Default)]
struct FailingStore {
    inner: MemoryStore,
    fail_replace: bool,
    fail_canonical: bool,
}

#[async_trait]
impl DescriptorStore for FailingStore {
    async fn load(&self, profile_id: &str) -> Result<Option<ReferenceProfile>> {
        self.inner.load(profile_id).await
    }

    async fn append(&self, profile_id: &str, embeddings: &[Embedding], qualities: &[f32]) -> Result<()> {
        self.inner.append(profile_id, embeddings, qualities).await
    }

    async fn replace(&self, profile: &ReferenceProfile) -> Result<()> {
        if self.fail_replace {
            return Err(FaceProofError::Storage("network down".into()));
        }
        self.inner.replace(profile).await
    }

    async fn replace_canonical(&self, profile_id: &str, canonical: &[f32]) -> Result<()> {
        if self.fail_canonical {
            return Err(FaceProofError::Storage("network down".into()));
        }
        self.inner.replace_canonical(profile_id, canonical).await
    }
}

fn enroller(provider: ScriptedProvider, store: Arc<MemoryStore>) -> Enroller {
    Enroller::new(handle(Arc::new(provider)), store, &test_config())
}

#[tokio::test]
async fn too_few_samples_store_nothing() {
    let store = Arc::new(MemoryStore::default());
    let enroller = enroller(ScriptedProvider::always(Step::NoFace), store.clone());

    let err = enroller.enroll_samples("bob", &samples(2), EnrollMode::Replace).await.unwrap_err();

    assert_matches!(err, FaceProofError::InsufficientSamples { got: 2, required: 3 });
    assert!(store.get("bob").is_none());
}

#[tokio::test]
async fn minimum_samples_store_a_profile() {
    let store = Arc::new(MemoryStore::default());
    let enroller = enroller(ScriptedProvider::always(Step::NoFace), store.clone());

    let report = enroller.enroll_samples("bob", &samples(3), EnrollMode::Replace).await.unwrap();

    assert_eq!(report.accepted, 3);
    assert!(report.canonical_stored);
    let profile = store.get("bob").unwrap();
    assert_eq!(profile.embeddings.len(), 3);
    assert_eq!(profile.qualities.as_ref().map(Vec::len), Some(3));
    assert_eq!(profile.canonical, Some(genuine()));
}

#[tokio::test]
async fn replace_discards_previous_samples() {
    let store = Arc::new(MemoryStore::with_profile("bob", vec![impostor(), impostor()]));
    let enroller = enroller(ScriptedProvider::always(Step::NoFace), store.clone());

    enroller.enroll_samples("bob", &samples(3), EnrollMode::Replace).await.unwrap();
    assert!(!store.get("bob").unwrap().embeddings.contains(&impostor()));
}

#[tokio::test]
async fn append_keeps_previous_samples() {
    let store = Arc::new(MemoryStore::with_profile("bob", vec![impostor()]));
    let enroller = enroller(ScriptedProvider::always(Step::NoFace), store.clone());

    enroller.enroll_samples("bob", &samples(3), EnrollMode::Append).await.unwrap();
    let profile = store.get("bob").unwrap();
    assert_eq!(profile.embeddings.len(), 4);
    assert!(profile.canonical.is_some());
}

#[tokio::test]
async fn replace_writes_profile_and_canonical_together() {
    let store = Arc::new(FailingStore { fail_canonical: true, ..Default::default() });
    let enroller = Enroller::new(handle(Arc::new(ScriptedProvider::always(Step::NoFace))), store.clone(), &test_config());

    let report = enroller.enroll_samples("bob", &samples(3), EnrollMode::Replace).await.unwrap();

    assert!(report.canonical_stored);
    assert_eq!(store.inner.get("bob").unwrap().canonical, Some(genuine()));
}

#[tokio::test]
async fn failed_replace_leaves_previous_profile_untouched() {
    let store = Arc::new(FailingStore {
        inner: MemoryStore::with_profile("bob", vec![impostor()]),
        fail_replace: true,
        ..Default::default()
    });
    let enroller = Enroller::new(handle(Arc::new(ScriptedProvider::always(Step::NoFace))), store.clone(), &test_config());

    let err = enroller.enroll_samples("bob", &samples(3), EnrollMode::Replace).await.unwrap_err();

    assert_matches!(err, FaceProofError::Storage(_));
    let profile = store.inner.get("bob").unwrap();
    assert_eq!(profile.embeddings, vec![impostor()]);
    assert_eq!(profile.canonical, None);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn provider_errors_are_not_reported_as_capture_failures() {
    let provider = ScriptedProvider::new(vec![Step::ProviderError], Step::Face(genuine()));
    let store = Arc::new(MemoryStore::default());
    let (mut camera, _) = FakeCamera::new();

    let report = enroller(provider, store).enroll("frank", camera.as_mut(), EnrollMode::Replace).await.unwrap();

    assert_eq!(report.rejected, 1);
    assert!(logs_contain("Sample 1 rejected: face provider error"));
    assert!(!logs_contain("capture failed"));
}

#[tokio::test(start_paused = true)]
async fn live_enrollment_skips_unusable_frames() {
    let provider = ScriptedProvider::new(
        vec![
            Step::NoFace,
            Step::Faces(2, genuine()),
            Step::PoorFace(genuine()),
        ],
        Step::Face(genuine()),
    );
    let store = Arc::new(MemoryStore::default());
    let enroller = enroller(provider, store.clone());
    let (mut camera, probe) = FakeCamera::new();

    let started = tokio::time::Instant::now();
    let report = enroller.enroll("carol", camera.as_mut(), EnrollMode::Replace).await.unwrap();

    assert_eq!(report.accepted, 5);
    assert_eq!(report.rejected, 3);
    assert!((report.mean_quality - 1.0).abs() < 1e-4);
    assert_eq!(store.get("carol").unwrap().embeddings.len(), 5);

    // One-second pause between each of the 8 captures
    assert_eq!(probe.captures.load(Ordering::SeqCst), 8);
    assert!(started.elapsed() >= std::time::Duration::from_secs(7));
    assert!(!probe.is_open());
}

#[tokio::test(start_paused = true)]
async fn live_enrollment_without_faces_fails_cleanly() {
    let store = Arc::new(MemoryStore::default());
    let enroller = enroller(ScriptedProvider::always(Step::NoFace), store.clone());
    let (mut camera, probe) = FakeCamera::new();

    let err = enroller.enroll("dave", camera.as_mut(), EnrollMode::Replace).await.unwrap_err();

    assert_matches!(err, FaceProofError::InsufficientSamples { got: 0, .. });
    assert!(store.get("dave").is_none());
    assert_eq!(probe.captures.load(Ordering::SeqCst), 10);
    assert!(!probe.is_open());
}

#[tokio::test(start_paused = true)]
async fn enrolled_profile_verifies_through_file_store() {
    let dir = tempdir().unwrap();
    let store: Arc<dyn DescriptorStore> = Arc::new(FileDescriptorStore::open(dir.path()).await.unwrap());
    let provider = Arc::new(ScriptedProvider::always(Step::Face(genuine())));
    let config = test_config();

    let (mut camera, _) = FakeCamera::new();
    Enroller::new(handle(provider.clone()), store.clone(), &config)
        .enroll("erin", camera.as_mut(), EnrollMode::Replace)
        .await
        .unwrap();
    assert_eq!(store.load("erin").await.unwrap().unwrap().embeddings.len(), 5);

    let (camera, _) = FakeCamera::new();
    let (mut session, _events) = VerificationSession::new(
        "erin",
        handle(provider),
        store,
        camera,
        &config,
        Arc::new(ManualClock::new()),
    );
    session.start().await.unwrap();
    assert_matches!(session.tick().await, TickOutcome::Verified(_));
    assert_eq!(session.state(), &SessionState::Monitoring);
}
