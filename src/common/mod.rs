pub mod config;
pub mod dev_mode;
pub mod error;

pub use config::Config;
pub use dev_mode::DevMode;
pub use error::{FaceProofError, Result};
