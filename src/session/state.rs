use crate::core::lighting::LightingAssessment;
use crate::core::quality::FaceQuality;
use serde::Serialize;
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Initializing,
    Monitoring,
    /// Re-verification window; a retry must succeed before `deadline`.
    Warning { deadline: Instant },
    Failed { reason: String },
    Stopped,
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Idle | Self::Initializing | Self::Stopped => SessionStatus::Pending,
            Self::Monitoring => SessionStatus::Verifying,
            Self::Warning { .. } => SessionStatus::Warning,
            Self::Failed { .. } => SessionStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Stopped)
    }
}

/// Coarse status reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Verifying,
    Success,
    Warning,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Verifying => "verifying",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged(SessionStatus),
    Success,
    /// Terminal. Sent at most once per session.
    Failure { reason: String },
    MultipleFaces,
    Guidance(String),
}

/// Why a single check did not verify the candidate. These are recoverable.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckFailure {
    Capture(String),
    Provider(String),
    NoFace,
    MultipleFaces(usize),
    NoEmbedding,
    Mismatch { similarity: f32, threshold: f32 },
    SuddenDrop { similarity: f32, baseline: f32 },
}

impl CheckFailure {
    /// User-facing hint for this failure, refined by the frame's lighting and
    /// the face's quality when available.
    pub fn guidance(&self, lighting: Option<&LightingAssessment>, quality: Option<&FaceQuality>) -> String {
        let mut hint = match self {
            Self::Capture(_) => "Camera frame unavailable, check that your camera is connected".to_string(),
            Self::Provider(_) => "Face analysis is temporarily unavailable".to_string(),
            Self::NoFace => "No face detected, please look at the camera".to_string(),
            Self::MultipleFaces(n) => format!("{} faces detected, only the candidate may be visible", n),
            Self::NoEmbedding => "Face not clear enough, move closer to the camera".to_string(),
            Self::Mismatch { .. } | Self::SuddenDrop { .. } => {
                "Identity could not be confirmed, face the camera directly".to_string()
            }
        };

        if let Some(lighting) = lighting.filter(|l| !l.is_adequate) {
            hint.push_str(". ");
            hint.push_str(&lighting.message);
        }
        if let Some(suggestion) = quality.and_then(|q| q.suggestions().into_iter().next()) {
            hint.push_str(". ");
            hint.push_str(&suggestion);
        }
        hint
    }
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capture(e) => write!(f, "capture failed: {}", e),
            Self::Provider(e) => write!(f, "face provider error: {}", e),
            Self::NoFace => write!(f, "no face detected"),
            Self::MultipleFaces(n) => write!(f, "{} faces detected", n),
            Self::NoEmbedding => write!(f, "no face descriptor could be extracted"),
            Self::Mismatch { similarity, threshold } => {
                write!(f, "face mismatch (similarity {:.3}, threshold {:.3})", similarity, threshold)
            }
            Self::SuddenDrop { similarity, baseline } => {
                write!(f, "sudden similarity drop ({:.3} against recent {:.3})", similarity, baseline)
            }
        }
    }
}
