use crate::common::config::SupervisorConfig;
use crate::supervisor::snapshot::SupervisionSnapshot;
use serde::{Deserialize, Serialize};

/// Aggregation limits, taken from the `[supervisor]` config section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerdictPolicy {
    pub low_quality_floor: f32,
    pub high_quality_floor: f32,
    pub max_no_face_fraction: f32,
    pub max_multiple_faces: usize,
    pub identity_mismatch_tolerance: f32,
}

impl From<&SupervisorConfig> for VerdictPolicy {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            low_quality_floor: config.low_quality_floor,
            high_quality_floor: config.high_quality_floor,
            max_no_face_fraction: config.max_no_face_fraction,
            max_multiple_faces: config.max_multiple_faces,
            identity_mismatch_tolerance: config.identity_mismatch_tolerance,
        }
    }
}

impl Default for VerdictPolicy {
    fn default() -> Self {
        Self::from(&SupervisorConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violations {
    pub no_face_detected: usize,
    pub multiple_faces_detected: usize,
    pub identity_mismatch: bool,
    pub low_quality_faces: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub total_snapshots: usize,
    /// Mean over the snapshots that were quality-scored.
    pub average_quality: f32,
    pub high_quality: usize,
    pub medium_quality: usize,
    pub low_quality: usize,
    /// Single-face snapshots, the population for the mismatch ratio.
    pub identity_checked: usize,
    pub identity_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisionVerdict {
    pub verified: bool,
    pub violations: Violations,
    pub quality_metrics: QualityMetrics,
}

/// Pure function of the snapshot set. An empty set is never verified.
pub fn compute_verdict(snapshots: &[SupervisionSnapshot], policy: &VerdictPolicy) -> SupervisionVerdict {
    let total = snapshots.len();

    let no_face_detected = snapshots.iter().filter(|s| !s.has_face).count();
    let multiple_faces_detected = snapshots.iter().filter(|s| s.has_multiple_faces).count();

    let eligible: Vec<&SupervisionSnapshot> = snapshots.iter().filter(|s| s.is_identity_eligible()).collect();
    let identity_failed = eligible.iter().filter(|s| !s.face_verified).count();
    let identity_mismatch = !eligible.is_empty()
        && identity_failed as f32 / eligible.len() as f32 > policy.identity_mismatch_tolerance;

    let scores: Vec<f32> = snapshots.iter().filter_map(|s| s.face_quality).collect();
    let low_quality = scores.iter().filter(|&&q| q < policy.low_quality_floor).count();
    let high_quality = scores.iter().filter(|&&q| q >= policy.high_quality_floor).count();
    let medium_quality = scores.len() - low_quality - high_quality;
    let average_quality = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f32>() / scores.len() as f32
    };

    let verified = total > 0
        && (no_face_detected as f32 / total as f32) < policy.max_no_face_fraction
        && multiple_faces_detected < policy.max_multiple_faces
        && !identity_mismatch;

    SupervisionVerdict {
        verified,
        violations: Violations {
            no_face_detected,
            multiple_faces_detected,
            identity_mismatch,
            low_quality_faces: low_quality,
        },
        quality_metrics: QualityMetrics {
            total_snapshots: total,
            average_quality,
            high_quality,
            medium_quality,
            low_quality,
            identity_checked: eligible.len(),
            identity_failed,
        },
    }
}
