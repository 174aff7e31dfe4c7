use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaceProofError {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Camera permission denied: {0}")]
    CameraPermission(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("No reference profile enrolled for: {0}")]
    NoReferenceProfile(String),

    #[error("Corrupt stored descriptor: {0}")]
    CorruptDescriptor(String),

    #[error("Embedding length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("Not enough enrollment samples: got {got}, need at least {required}")]
    InsufficientSamples { got: usize, required: usize },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "onnx")]
    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FaceProofError>;
