pub mod enrollment;
pub mod face;
pub mod lighting;
pub mod provider;
pub mod quality;
pub mod similarity;

pub use enrollment::{EnrollMode, Enroller, EnrollmentReport, EnrollmentSample};
pub use face::{Blendshapes, DetectedFace, Embedding, FaceBox, Frame, Keypoints, Point};
pub use lighting::{LightingAssessment, LightingAssessor, LightingBand};
pub use provider::{FaceProvider, ProviderHandle};
pub use quality::{calculate_embedding_consistency, FaceQuality, QualityAssessor};
pub use similarity::{cosine_similarity, euclidean_distance, MatchOutcome, MatchThresholds, Metric, SimilarityEngine};
