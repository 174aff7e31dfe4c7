use crate::core::face::{FaceBox, Frame};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One scheduled capture and what was found in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisionSnapshot {
    #[serde(skip)]
    pub image: Option<Frame>,
    pub index: usize,
    pub taken_at: DateTime<Utc>,
    pub has_face: bool,
    pub has_multiple_faces: bool,
    pub face_count: usize,
    #[serde(default)]
    pub face_boxes: Vec<FaceBox>,
    /// Only scored when exactly one face is visible.
    pub face_quality: Option<f32>,
    pub face_verified: bool,
    pub similarity: Option<f32>,
    pub lighting_level: Option<f32>,
    pub error: Option<String>,
}

impl SupervisionSnapshot {
    /// A capture that could not be analysed. All flags are false.
    pub fn failed(index: usize, taken_at: DateTime<Utc>, image: Option<Frame>, error: impl Into<String>) -> Self {
        Self {
            image,
            index,
            taken_at,
            has_face: false,
            has_multiple_faces: false,
            face_count: 0,
            face_boxes: Vec::new(),
            face_quality: None,
            face_verified: false,
            similarity: None,
            lighting_level: None,
            error: Some(error.into()),
        }
    }

    /// Counts toward the identity-mismatch ratio.
    pub fn is_identity_eligible(&self) -> bool {
        self.has_face && !self.has_multiple_faces
    }
}
