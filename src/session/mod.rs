pub mod clock;
pub mod history;
pub mod state;
pub mod verification;

pub use clock::{Clock, ManualClock, SystemClock};
pub use history::{AttemptHistory, VerificationAttempt};
pub use state::{CheckFailure, SessionEvent, SessionState, SessionStatus};
pub use verification::{TickOutcome, VerificationSession};
