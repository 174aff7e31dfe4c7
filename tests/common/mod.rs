#![allow(dead_code)]

use async_trait::async_trait;
use face_proctor::camera::Camera;
use face_proctor::core::face::{Blendshapes, DetectedFace, Embedding, FaceBox, Frame};
use face_proctor::session::ManualClock;
use face_proctor::storage::{DescriptorStore, ReferenceProfile};
use face_proctor::{Config, FaceProofError, FaceProvider, ProviderHandle, Result};
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

pub fn genuine() -> Embedding {
    vec![0.6, 0.8, 0.0, 0.0]
}

pub fn impostor() -> Embedding {
    vec![0.0, 0.0, 0.6, 0.8]
}

/// Euclidean distance 0.4 from [`genuine`]: still a match, but similarity only 0.6.
pub fn drifted() -> Embedding {
    vec![0.6, 0.8, 0.4, 0.0]
}

/// Deterministic config: no probabilistic feedback.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.session.success_feedback_probability = 0.0;
    config
}

/// What the provider sees in the next frame.
#[derive(Debug, Clone)]
pub enum Step {
    Face(Embedding),
    /// A face so badly framed that quality scoring rejects it.
    PoorFace(Embedding),
    NoFace,
    Faces(usize, Embedding),
    /// A face whose embedding takes `Duration` of clock time to compute.
    SlowFace(Embedding, Duration),
    /// The model runtime fails on this frame.
    ProviderError,
}

fn centered_face() -> DetectedFace {
    let (cx, cy) = (FRAME_WIDTH as f32 / 2.0, FRAME_HEIGHT as f32 / 2.0);
    DetectedFace::from_box(FaceBox { x1: cx - 90.0, y1: cy - 108.0, x2: cx + 90.0, y2: cy + 108.0, confidence: 0.95 })
}

fn poor_face() -> DetectedFace {
    let mut face = DetectedFace::from_box(FaceBox { x1: 0.0, y1: 0.0, x2: 40.0, y2: 40.0, confidence: 0.9 });
    face.blendshapes = Some(Blendshapes { smile: 1.0, jaw_open: 1.0, blink: 1.0 });
    face
}

/// Plays back a script of frames; falls back to `fallback` once the script is exhausted.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    current: Mutex<Step>,
    fallback: Step,
    init_ok: bool,
    clock: Option<Arc<ManualClock>>,
    pub init_calls: AtomicUsize,
    pub detect_calls: AtomicUsize,
    pub embed_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>, fallback: Step) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            current: Mutex::new(Step::NoFace),
            fallback,
            init_ok: true,
            clock: None,
            init_calls: AtomicUsize::new(0),
            detect_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
        }
    }

    pub fn always(step: Step) -> Self {
        Self::new(Vec::new(), step)
    }

    pub fn failing_init() -> Self {
        Self { init_ok: false, ..Self::always(Step::NoFace) }
    }

    pub fn with_clock(mut self, clock: Arc<ManualClock>) -> Self {
        self.clock = Some(clock);
        self
    }
}

#[async_trait]
impl FaceProvider for ScriptedProvider {
    async fn initialize(&self) -> Result<bool> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.init_ok)
    }

    async fn detect_faces(&self, _frame: &Frame) -> Result<Vec<DetectedFace>> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front().unwrap_or_else(|| self.fallback.clone());
        *self.current.lock().unwrap() = step.clone();

        Ok(match step {
            Step::ProviderError => return Err(FaceProofError::Model("inference failed".into())),
            Step::Face(_) | Step::SlowFace(..) => vec![centered_face()],
            Step::PoorFace(_) => vec![poor_face()],
            Step::NoFace => vec![],
            Step::Faces(n, _) => (0..n)
                .map(|i| {
                    let mut face = centered_face();
                    face.bbox.x1 += i as f32 * 200.0 - 200.0;
                    face.bbox.x2 += i as f32 * 200.0 - 200.0;
                    face
                })
                .collect(),
        })
    }

    async fn get_embedding(&self, _frame: &Frame, _min_confidence: f32) -> Result<Option<Embedding>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.current.lock().unwrap().clone();
        Ok(match step {
            Step::Face(e) | Step::PoorFace(e) | Step::Faces(_, e) => Some(e),
            Step::SlowFace(e, took) => {
                if let Some(clock) = &self.clock {
                    clock.advance(took);
                }
                Some(e)
            }
            Step::NoFace => None,
            Step::ProviderError => return Err(FaceProofError::Model("inference failed".into())),
        })
    }
}

pub fn handle(provider: Arc<ScriptedProvider>) -> Arc<ProviderHandle> {
    Arc::new(ProviderHandle::new(provider))
}

/// Observable camera state shared between a test and its [`FakeCamera`].
#[derive(Default)]
pub struct CameraProbe {
    pub opens: AtomicUsize,
    pub releases: AtomicUsize,
    pub captures: AtomicUsize,
    pub is_open: AtomicBool,
    pub failing_opens: AtomicUsize,
    pub failing_captures: AtomicBool,
}

impl CameraProbe {
    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}

pub struct FakeCamera {
    probe: Arc<CameraProbe>,
}

impl FakeCamera {
    pub fn new() -> (Box<dyn Camera>, Arc<CameraProbe>) {
        let probe = Arc::new(CameraProbe::default());
        (Box::new(Self { probe: probe.clone() }), probe)
    }
}

#[async_trait]
impl Camera for FakeCamera {
    async fn open(&mut self) -> Result<()> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        let failing = self.probe.failing_opens.load(Ordering::SeqCst);
        if failing > 0 {
            self.probe.failing_opens.store(failing - 1, Ordering::SeqCst);
            return Err(FaceProofError::CameraPermission("device busy".into()));
        }
        self.probe.is_open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn capture(&mut self) -> Result<Frame> {
        if !self.probe.is_open() {
            return Err(FaceProofError::Camera("Camera is not open".into()));
        }
        self.probe.captures.fetch_add(1, Ordering::SeqCst);
        if self.probe.failing_captures.load(Ordering::SeqCst) {
            return Err(FaceProofError::Camera("frame timeout".into()));
        }
        // Mid-gray frame: adequate lighting
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, Rgb([128, 128, 128]))))
    }

    fn release(&mut self) {
        if self.probe.is_open.swap(false, Ordering::SeqCst) {
            self.probe.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.probe.is_open()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    profiles: Mutex<HashMap<String, ReferenceProfile>>,
}

impl MemoryStore {
    pub fn with_profile(profile_id: &str, embeddings: Vec<Embedding>) -> Self {
        let store = Self::default();
        store
            .profiles
            .lock()
            .unwrap()
            .insert(profile_id.to_string(), ReferenceProfile::new(profile_id, embeddings));
        store
    }

    pub fn get(&self, profile_id: &str) -> Option<ReferenceProfile> {
        self.profiles.lock().unwrap().get(profile_id).cloned()
    }
}

#[async_trait]
impl DescriptorStore for MemoryStore {
    async fn load(&self, profile_id: &str) -> Result<Option<ReferenceProfile>> {
        Ok(self.get(profile_id).filter(|p| !p.is_empty()))
    }

    async fn append(&self, profile_id: &str, embeddings: &[Embedding], qualities: &[f32]) -> Result<()> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .entry(profile_id.to_string())
            .or_insert_with(|| ReferenceProfile::new(profile_id, Vec::new()));
        profile.embeddings.extend(embeddings.iter().cloned());
        profile.qualities.get_or_insert_with(Vec::new).extend_from_slice(qualities);
        Ok(())
    }

    async fn replace(&self, profile: &ReferenceProfile) -> Result<()> {
        self.profiles.lock().unwrap().insert(profile.profile_id.clone(), profile.clone());
        Ok(())
    }

    async fn replace_canonical(&self, profile_id: &str, canonical: &[f32]) -> Result<()> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .get_mut(profile_id)
            .ok_or_else(|| FaceProofError::NoReferenceProfile(profile_id.to_string()))?;
        profile.canonical = Some(canonical.to_vec());
        Ok(())
    }
}
