use crate::common::error::{FaceProofError, Result};
use crate::core::face::{DetectedFace, Embedding, Frame};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Face landmark/embedding runtime. Treated as a black box by the rest of the crate.
#[async_trait]
pub trait FaceProvider: Send + Sync {
    /// Loads models. Returns `Ok(false)` when the runtime is unusable.
    async fn initialize(&self) -> Result<bool>;

    async fn detect_faces(&self, frame: &Frame) -> Result<Vec<DetectedFace>>;

    /// Embedding of the most confident face at or above `min_confidence`.
    async fn get_embedding(&self, frame: &Frame, min_confidence: f32) -> Result<Option<Embedding>>;
}

/// Process-wide provider with its initialization state. Construct once and share
/// the `Arc` with every session, supervisor and enroller.
pub struct ProviderHandle {
    provider: Arc<dyn FaceProvider>,
    ready: OnceCell<()>,
}

impl ProviderHandle {
    pub fn new(provider: Arc<dyn FaceProvider>) -> Self {
        Self { provider, ready: OnceCell::new() }
    }

    /// Idempotent. A failed initialization is not cached, so a later call tries again.
    pub async fn ensure_initialized(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                tracing::info!("Initializing face provider");
                match self.provider.initialize().await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(FaceProofError::Model("Face provider failed to initialize".into())),
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.ready.initialized()
    }

    pub async fn detect_faces(&self, frame: &Frame) -> Result<Vec<DetectedFace>> {
        self.ensure_initialized().await?;
        self.provider.detect_faces(frame).await
    }

    pub async fn get_embedding(&self, frame: &Frame, min_confidence: f32) -> Result<Option<Embedding>> {
        self.ensure_initialized().await?;
        self.provider.get_embedding(frame, min_confidence).await
    }
}
