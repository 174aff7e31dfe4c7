use crate::common::config::QualityConfig;
use crate::core::face::{DetectedFace, Embedding, Frame};
use crate::core::similarity::cosine_similarity;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceQuality {
    pub centering: f32,
    pub size: f32,
    pub rotation: f32,
    pub expression: f32,
    /// Weighted combination of the sub-scores, clipped to `[0, 1]`.
    pub overall: f32,
}

impl FaceQuality {
    pub fn meets(&self, min_quality: f32) -> bool {
        self.overall >= min_quality
    }

    pub fn assessment(&self) -> String {
        let level = if self.overall >= 0.8 {
            "Excellent"
        } else if self.overall >= 0.7 {
            "Good"
        } else if self.overall >= 0.6 {
            "Acceptable"
        } else if self.overall >= 0.5 {
            "Poor"
        } else {
            "Very Poor"
        };

        format!("Quality: {} (score: {:.2})", level, self.overall)
    }

    /// Actionable hints for the weakest sub-scores.
    pub fn suggestions(&self) -> Vec<String> {
        let mut suggestions = Vec::new();

        if self.centering < 0.7 {
            suggestions.push("Center your face in the camera view".to_string());
        }
        if self.size < 0.7 {
            suggestions.push("Adjust your distance so your face fills about half the frame".to_string());
        }
        if self.rotation < 0.7 {
            suggestions.push("Keep your head level and look straight at the camera".to_string());
        }
        if self.expression < 0.7 {
            suggestions.push("Keep a neutral expression with your eyes open".to_string());
        }

        suggestions
    }
}

pub struct QualityAssessor {
    config: QualityConfig,
}

impl QualityAssessor {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Scores the first detected face, or `None` when no face was found.
    pub fn assess_face_quality(&self, frame: &Frame, faces: &[DetectedFace]) -> Option<FaceQuality> {
        let face = faces.first()?;
        Some(self.assess_face(frame.width() as f32, frame.height() as f32, face))
    }

    pub fn assess_face(&self, frame_width: f32, frame_height: f32, face: &DetectedFace) -> FaceQuality {
        let centering = centering_score(frame_width, frame_height, face);
        let size = self.size_score(frame_height, face);
        let rotation = self.rotation_score(face);
        let expression = expression_score(face);

        let c = &self.config;
        let total_weight = c.centering_weight + c.size_weight + c.rotation_weight + c.expression_weight;
        let weighted = centering * c.centering_weight
            + size * c.size_weight
            + rotation * c.rotation_weight
            + expression * c.expression_weight;
        let overall = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        FaceQuality { centering, size, rotation, expression, overall }
    }

    fn size_score(&self, frame_height: f32, face: &DetectedFace) -> f32 {
        if frame_height <= 0.0 {
            return 0.0;
        }
        let ratio = face.bbox.height() / frame_height;
        let (min, max) = (self.config.ideal_size_min, self.config.ideal_size_max);

        if ratio < min {
            (ratio / min).clamp(0.0, 1.0)
        } else if ratio > max {
            (1.0 - (ratio - max) / (1.0 - max)).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }

    fn rotation_score(&self, face: &DetectedFace) -> f32 {
        // Providers without landmarks give no evidence of tilt
        let Some(keypoints) = face.keypoints else {
            return 1.0;
        };

        let dx = (keypoints.right_eye.x - keypoints.left_eye.x).abs();
        let dy = (keypoints.right_eye.y - keypoints.left_eye.y).abs();
        if dx == 0.0 && dy == 0.0 {
            return 0.0;
        }
        let angle = dy.atan2(dx).to_degrees();
        let max = self.config.max_rotation_degrees;
        1.0 - angle.min(max) / max
    }
}

fn centering_score(frame_width: f32, frame_height: f32, face: &DetectedFace) -> f32 {
    if frame_width <= 0.0 || frame_height <= 0.0 {
        return 0.0;
    }
    let center = face.bbox.center();
    let half_w = frame_width / 2.0;
    let half_h = frame_height / 2.0;

    let x_offset = ((center.x - half_w).abs() / half_w).min(1.0);
    let y_offset = ((center.y - half_h).abs() / half_h).min(1.0);
    1.0 - (x_offset + y_offset) / 2.0
}

fn expression_score(face: &DetectedFace) -> f32 {
    let Some(shapes) = face.blendshapes else {
        return 1.0;
    };
    let penalty = shapes.smile.clamp(0.0, 1.0) * 0.4
        + shapes.jaw_open.clamp(0.0, 1.0) * 0.3
        + shapes.blink.clamp(0.0, 1.0) * 0.3;
    (1.0 - penalty).clamp(0.0, 1.0)
}

/// How well a set of enrollment embeddings agree with each other. Some variation
/// is wanted (different angles of the same person), too much means mixed identities.
pub fn calculate_embedding_consistency(embeddings: &[Embedding]) -> f32 {
    let mut similarities = Vec::new();
    for i in 0..embeddings.len() {
        for j in i + 1..embeddings.len() {
            if let Ok(similarity) = cosine_similarity(&embeddings[i], &embeddings[j]) {
                similarities.push(similarity);
            }
        }
    }

    if similarities.is_empty() {
        return 0.8;
    }

    let avg_similarity = similarities.iter().sum::<f32>() / similarities.len() as f32;
    let variance = similarities
        .iter()
        .map(|s| (s - avg_similarity).powi(2))
        .sum::<f32>()
        / similarities.len() as f32;

    let ideal_similarity = 0.82;
    let ideal_variance = 0.005;

    let similarity_score = 1.0 - (avg_similarity - ideal_similarity).abs() * 2.0;
    let variance_score = if variance < 0.001 || variance > 0.02 {
        0.7
    } else {
        1.0 - (variance - ideal_variance).abs() * 10.0
    };

    (similarity_score * 0.7 + variance_score * 0.3).clamp(0.0, 1.0)
}
