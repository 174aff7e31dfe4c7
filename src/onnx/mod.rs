//! ONNX Runtime face provider: YOLOv8-face detection plus an ArcFace-style
//! recognizer. Inference runs on the blocking pool.

pub mod detector;
pub mod recognizer;

pub use detector::FaceDetector;
pub use recognizer::FaceRecognizer;

use crate::common::config::ModelConfig;
use crate::common::{FaceProofError, Result};
use crate::core::face::{DetectedFace, Embedding, Frame};
use crate::core::provider::FaceProvider;
use async_trait::async_trait;
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder};
use std::path::Path;
use std::sync::{Arc, OnceLock};

pub(crate) fn build_session(environment: &Arc<Environment>, model_path: &Path, optimization_level: u32) -> Result<Session> {
    if !model_path.exists() {
        return Err(FaceProofError::Model(format!("Model not found: {}", model_path.display())));
    }
    tracing::info!("Loading model from {}", model_path.display());

    let opt_level = match optimization_level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    };

    let session = SessionBuilder::new(environment)?
        .with_optimization_level(opt_level)?
        .with_model_from_file(model_path)?;
    Ok(session)
}

struct Models {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl Models {
    fn load(config: &ModelConfig) -> Result<Self> {
        let environment = Arc::new(Environment::builder().with_name("face_proctor").build()?);
        Ok(Self {
            detector: FaceDetector::new(config, &environment)?,
            recognizer: FaceRecognizer::new(config, &environment)?,
        })
    }
}

pub struct OnnxFaceProvider {
    config: ModelConfig,
    models: OnceLock<Arc<Models>>,
}

impl OnnxFaceProvider {
    pub fn new(config: ModelConfig) -> Self {
        Self { config, models: OnceLock::new() }
    }

    fn models(&self) -> Result<Arc<Models>> {
        self.models
            .get()
            .cloned()
            .ok_or_else(|| FaceProofError::Model("ONNX models are not loaded".into()))
    }
}

#[async_trait]
impl FaceProvider for OnnxFaceProvider {
    async fn initialize(&self) -> Result<bool> {
        if self.models.get().is_some() {
            return Ok(true);
        }

        let config = self.config.clone();
        let models = tokio::task::spawn_blocking(move || Models::load(&config))
            .await
            .map_err(|e| FaceProofError::Model(format!("Model loading task failed: {}", e)))??;

        // A concurrent initializer may have won; either copy is equivalent
        let _ = self.models.set(Arc::new(models));
        Ok(true)
    }

    async fn detect_faces(&self, frame: &Frame) -> Result<Vec<DetectedFace>> {
        let models = self.models()?;
        let frame = frame.clone();
        let min_confidence = self.config.detection_confidence;

        tokio::task::spawn_blocking(move || models.detector.detect(&frame, min_confidence))
            .await
            .map_err(|e| FaceProofError::Model(format!("Detection task failed: {}", e)))?
    }

    async fn get_embedding(&self, frame: &Frame, min_confidence: f32) -> Result<Option<Embedding>> {
        let models = self.models()?;
        let frame = frame.clone();

        tokio::task::spawn_blocking(move || {
            let faces = models.detector.detect(&frame, min_confidence)?;
            // Detections come back sorted by confidence
            let Some(face) = faces.first() else {
                return Ok(None);
            };
            models.recognizer.embed(&frame, &face.bbox).map(Some)
        })
        .await
        .map_err(|e| FaceProofError::Model(format!("Embedding task failed: {}", e)))?
    }
}
