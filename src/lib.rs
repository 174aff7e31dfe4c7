// Core modules
pub mod camera;
pub mod common;
pub mod core;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod session;
pub mod storage;
pub mod supervisor;

// Re-export commonly used types
pub use camera::{acquire_with_backoff, BackoffPolicy, Camera};
pub use common::{Config, DevMode, FaceProofError, Result};
pub use core::{
    DetectedFace, EnrollMode, Enroller, EnrollmentReport, FaceProvider, LightingAssessor, ProviderHandle,
    QualityAssessor, SimilarityEngine,
};
pub use session::{Clock, ManualClock, SessionEvent, SessionState, SessionStatus, SystemClock, VerificationSession};
pub use storage::{CachedDescriptorStore, DescriptorStore, FileDescriptorStore, ReferenceProfile};
pub use supervisor::{DirectorySnapshotSink, SnapshotSink, SnapshotSupervisor, SupervisionReport, SupervisionVerdict};
