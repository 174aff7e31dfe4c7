use crate::common::error::{FaceProofError, Result};
use crate::core::similarity::{MatchThresholds, Metric};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "configs/face-proctor.toml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub lighting: LightingConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CameraConfig {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub warmup_frames: u32,
    pub warmup_delay_ms: u64,
    /// Attempts made to open the camera before giving up.
    pub acquire_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            warmup_frames: 2,
            warmup_delay_ms: 50,
            acquire_attempts: 5,
            backoff_base_ms: 500,
            backoff_cap_ms: 8000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub detector_path: PathBuf,
    pub recognizer_path: PathBuf,
    pub detection_confidence: f32,
    pub detector_input_width: u32,
    pub detector_input_height: u32,
    pub recognizer_input_size: u32,
    pub normalization_value: f32,
    pub optimization_level: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector_path: PathBuf::from("models/yolov8n-face.onnx"),
            recognizer_path: PathBuf::from("models/arcface.onnx"),
            detection_confidence: 0.5,
            detector_input_width: 640,
            detector_input_height: 640,
            recognizer_input_size: 112,
            normalization_value: 127.5,
            optimization_level: 3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LightingConfig {
    /// Every n-th pixel is sampled for luminance.
    pub sample_stride: usize,
    pub too_dark_below: f32,
    pub dim_below: f32,
    pub too_bright_above: f32,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            sample_stride: 20,
            too_dark_below: 15.0,
            dim_below: 30.0,
            too_bright_above: 90.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct QualityConfig {
    pub centering_weight: f32,
    pub size_weight: f32,
    pub rotation_weight: f32,
    pub expression_weight: f32,
    /// Ideal face height as a fraction of frame height.
    pub ideal_size_min: f32,
    pub ideal_size_max: f32,
    pub max_rotation_degrees: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            centering_weight: 0.3,
            size_weight: 0.3,
            rotation_weight: 0.2,
            expression_weight: 0.2,
            ideal_size_min: 0.3,
            ideal_size_max: 0.6,
            max_rotation_degrees: 15.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SimilarityConfig {
    pub metric: Metric,
    pub thresholds: MatchThresholds,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            metric: Metric::Euclidean,
            thresholds: MatchThresholds {
                adequate_lighting: 0.5,
                poor_lighting: 0.6,
                length_mismatch: 0.75,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub check_interval_ms: u64,
    pub warning_window_ms: u64,
    pub retry_interval_ms: u64,
    pub max_consecutive_failures: u32,
    pub history_size: usize,
    /// A score below this fraction of the recent average counts as a sudden drop.
    pub sudden_drop_ratio: f32,
    pub success_feedback_probability: f64,
    pub min_detection_confidence: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 15_000,
            warning_window_ms: 10_000,
            retry_interval_ms: 1_000,
            max_consecutive_failures: 3,
            history_size: 10,
            sudden_drop_ratio: 0.8,
            success_feedback_probability: 0.3,
            min_detection_confidence: 0.5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SupervisorConfig {
    pub min_snapshots: usize,
    pub max_snapshots: usize,
    pub thresholds: MatchThresholds,
    pub min_detection_confidence: f32,
    pub low_quality_floor: f32,
    pub high_quality_floor: f32,
    pub max_no_face_fraction: f32,
    pub max_multiple_faces: usize,
    pub identity_mismatch_tolerance: f32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            min_snapshots: 10,
            max_snapshots: 20,
            thresholds: MatchThresholds {
                adequate_lighting: 0.55,
                poor_lighting: 0.65,
                length_mismatch: 0.8,
            },
            min_detection_confidence: 0.3,
            low_quality_floor: 0.5,
            high_quality_floor: 0.75,
            max_no_face_fraction: 0.3,
            max_multiple_faces: 3,
            identity_mismatch_tolerance: 0.3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EnrollmentConfig {
    pub min_samples: usize,
    pub target_samples: usize,
    pub max_samples: usize,
    pub sample_delay_ms: u64,
    pub min_sample_quality: f32,
    pub min_detection_confidence: f32,
    pub store_canonical: bool,
    pub canonical_top_k: usize,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            min_samples: 3,
            target_samples: 5,
            max_samples: 10,
            sample_delay_ms: 1_000,
            min_sample_quality: 0.5,
            min_detection_confidence: 0.5,
            store_canonical: true,
            canonical_top_k: 5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub profiles_dir: Option<PathBuf>,
    pub snapshots_dir: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from_path(Path::new(DEFAULT_CONFIG_PATH))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FaceProofError::Config(format!(
                "Config file not found: {}", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| FaceProofError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Falls back to built-in defaults when no file exists at `path`.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load_from_path(path);
        }
        tracing::warn!("No config at {}, using defaults", path.display());
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(invalid(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(invalid(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }
        if self.camera.acquire_attempts == 0 {
            return Err(invalid("Camera acquire_attempts must be at least 1".to_string()));
        }

        check_unit("models.detection_confidence", self.models.detection_confidence)?;
        if self.models.recognizer_input_size == 0 || self.models.recognizer_input_size > 1024 {
            return Err(invalid(format!(
                "Recognizer input size must be between 1 and 1024, got {}",
                self.models.recognizer_input_size
            )));
        }

        if self.lighting.sample_stride == 0 {
            return Err(invalid("Lighting sample_stride must be at least 1".to_string()));
        }
        if !(self.lighting.too_dark_below <= self.lighting.dim_below
            && self.lighting.dim_below < self.lighting.too_bright_above)
        {
            return Err(invalid(format!(
                "Lighting bands must be ordered: too_dark {} <= dim {} < too_bright {}",
                self.lighting.too_dark_below, self.lighting.dim_below, self.lighting.too_bright_above
            )));
        }

        let weights = self.quality.centering_weight
            + self.quality.size_weight
            + self.quality.rotation_weight
            + self.quality.expression_weight;
        if weights <= 0.0 {
            return Err(invalid("Quality weights must sum to a positive value".to_string()));
        }
        if !(0.0 < self.quality.ideal_size_min && self.quality.ideal_size_min < self.quality.ideal_size_max
            && self.quality.ideal_size_max < 1.0)
        {
            return Err(invalid("Quality ideal size band must satisfy 0 < min < max < 1".to_string()));
        }
        if self.quality.max_rotation_degrees <= 0.0 {
            return Err(invalid("Quality max_rotation_degrees must be positive".to_string()));
        }

        self.similarity.thresholds.validate(self.similarity.metric, "similarity")?;
        self.supervisor.thresholds.validate(self.similarity.metric, "supervisor")?;
        let (session, supervisor) = (&self.similarity.thresholds, &self.supervisor.thresholds);
        let lenient_enough = [
            (supervisor.adequate_lighting, session.adequate_lighting),
            (supervisor.poor_lighting, session.poor_lighting),
            (supervisor.length_mismatch, session.length_mismatch),
        ]
        .into_iter()
        .all(|(lenient, strict)| self.similarity.metric.at_least_as_lenient(lenient, strict));
        if !lenient_enough {
            return Err(invalid(
                "Supervisor thresholds must be at least as lenient as the similarity thresholds".to_string(),
            ));
        }

        if self.session.max_consecutive_failures == 0 {
            return Err(invalid("Session max_consecutive_failures must be at least 1".to_string()));
        }
        if self.session.history_size < 3 {
            return Err(invalid("Session history_size must be at least 3".to_string()));
        }
        if self.session.retry_interval_ms == 0 || self.session.check_interval_ms == 0 {
            return Err(invalid("Session intervals must be non-zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.session.success_feedback_probability) {
            return Err(invalid(format!(
                "Success feedback probability must be between 0.0 and 1.0, got {}",
                self.session.success_feedback_probability
            )));
        }
        check_unit("session.sudden_drop_ratio", self.session.sudden_drop_ratio)?;

        if self.supervisor.min_snapshots == 0 || self.supervisor.min_snapshots > self.supervisor.max_snapshots {
            return Err(invalid(format!(
                "Supervisor snapshot bounds invalid: min {} max {}",
                self.supervisor.min_snapshots, self.supervisor.max_snapshots
            )));
        }
        check_unit("supervisor.low_quality_floor", self.supervisor.low_quality_floor)?;
        check_unit("supervisor.high_quality_floor", self.supervisor.high_quality_floor)?;
        check_unit("supervisor.max_no_face_fraction", self.supervisor.max_no_face_fraction)?;
        check_unit("supervisor.identity_mismatch_tolerance", self.supervisor.identity_mismatch_tolerance)?;

        if self.enrollment.min_samples == 0
            || self.enrollment.min_samples > self.enrollment.target_samples
            || self.enrollment.target_samples > self.enrollment.max_samples
        {
            return Err(invalid(format!(
                "Enrollment sample counts must satisfy 1 <= min {} <= target {} <= max {}",
                self.enrollment.min_samples, self.enrollment.target_samples, self.enrollment.max_samples
            )));
        }
        check_unit("enrollment.min_sample_quality", self.enrollment.min_sample_quality)?;
        if self.enrollment.canonical_top_k == 0 {
            return Err(invalid("Enrollment canonical_top_k must be at least 1".to_string()));
        }

        Ok(())
    }
}

fn invalid(message: String) -> FaceProofError {
    FaceProofError::Config(message)
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(format!("{} must be between 0.0 and 1.0, got {}", name, value)));
    }
    Ok(())
}
