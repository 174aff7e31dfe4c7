pub mod scheduler;
pub mod sink;
pub mod snapshot;
pub mod verdict;

pub use scheduler::{SnapshotPlan, SnapshotSupervisor};
pub use sink::{DirectorySnapshotSink, SnapshotSink, SupervisionReport};
pub use snapshot::SupervisionSnapshot;
pub use verdict::{compute_verdict, QualityMetrics, SupervisionVerdict, VerdictPolicy, Violations};
