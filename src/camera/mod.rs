#[cfg(feature = "v4l-camera")]
pub mod v4l2;

#[cfg(feature = "v4l-camera")]
pub use v4l2::V4lCamera;

use crate::common::config::CameraConfig;
use crate::common::{FaceProofError, Result};
use crate::core::face::Frame;
use async_trait::async_trait;
use std::time::Duration;

/// Video capture primitive. Implementations must make `release` cheap and idempotent.
#[async_trait]
pub trait Camera: Send {
    async fn open(&mut self) -> Result<()>;

    async fn capture(&mut self) -> Result<Frame>;

    fn release(&mut self);

    fn is_open(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            attempts: config.acquire_attempts.max(1),
            base: Duration::from_millis(config.backoff_base_ms),
            cap: Duration::from_millis(config.backoff_cap_ms),
        }
    }

    /// Delay after the `retry`-th failed attempt (0-based): base * 2^retry, capped.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Opens the camera, retrying with capped exponential backoff. The last error is
/// returned once all attempts are used.
pub async fn acquire_with_backoff(camera: &mut dyn Camera, policy: &BackoffPolicy) -> Result<()> {
    let mut last_error = None;

    for attempt in 0..policy.attempts {
        match camera.open().await {
            Ok(()) => {
                if attempt > 0 {
                    tracing::info!("Camera acquired after {} attempts", attempt + 1);
                }
                return Ok(());
            }
            Err(e) => {
                tracing::warn!("Camera acquisition attempt {}/{} failed: {}", attempt + 1, policy.attempts, e);
                last_error = Some(e);
                if attempt + 1 < policy.attempts {
                    tokio::time::sleep(policy.delay(attempt)).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| FaceProofError::Camera("Camera could not be acquired".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    struct FlakyCamera {
        failures_left: u32,
        opens: u32,
        open: bool,
    }

    #[async_trait]
    impl Camera for FlakyCamera {
        async fn open(&mut self) -> Result<()> {
            self.opens += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(FaceProofError::CameraPermission("denied".into()));
            }
            self.open = true;
            Ok(())
        }

        async fn capture(&mut self) -> Result<Frame> {
            Ok(DynamicImage::ImageRgb8(RgbImage::new(4, 4)))
        }

        fn release(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    fn policy() -> BackoffPolicy {
        BackoffPolicy::from_config(&CameraConfig::default())
    }

    #[test]
    fn delay_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.delay(0), Duration::from_millis(500));
        assert_eq!(p.delay(1), Duration::from_millis(1000));
        assert_eq!(p.delay(3), Duration::from_millis(4000));
        assert_eq!(p.delay(4), Duration::from_millis(8000));
        assert_eq!(p.delay(10), Duration::from_millis(8000));
        assert_eq!(p.delay(40), Duration::from_millis(8000));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_within_budget() {
        let mut camera = FlakyCamera { failures_left: 2, opens: 0, open: false };
        let started = tokio::time::Instant::now();

        acquire_with_backoff(&mut camera, &policy()).await.unwrap();

        assert!(camera.is_open());
        assert_eq!(camera.opens, 3);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(1500) && waited < Duration::from_millis(1600), "{:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_bounded_attempts() {
        let mut camera = FlakyCamera { failures_left: 100, opens: 0, open: false };

        let err = acquire_with_backoff(&mut camera, &policy()).await.unwrap_err();

        assert!(matches!(err, FaceProofError::CameraPermission(_)));
        assert_eq!(camera.opens, 5);
    }
}
