//! Capture sources.
//!
//! This module provides the sensor side of a capture cycle:
//! - Synthetic `stub://` camera (development and tests)
//! - USB/CSI cameras through V4L2 (feature: ingest-v4l2)
//!
//! Sources are blocking and not reentrant. They are opened on the capture
//! arbiter's worker thread and never leave it; every other component asks the
//! arbiter for frames instead of touching a source.

pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::config::CameraSettings;
use crate::frame::RawFrame;

pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// A physical or simulated camera.
pub trait CaptureSource {
    /// Open the device. Called once before the first capture.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next frame is available and return it.
    fn capture_frame(&mut self) -> Result<RawFrame>;

    /// Whether the most recent device operation succeeded.
    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> CaptureStats;
}

/// Statistics for a capture source.
#[derive(Clone, Debug)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub device: String,
}

/// Open the configured camera. `stub://` devices are synthetic.
pub fn open_source(settings: &CameraSettings) -> Result<Box<dyn CaptureSource>> {
    if settings.device.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(settings.clone())));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Source::new(settings.clone())))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(anyhow::anyhow!(
            "camera device '{}' requires the ingest-v4l2 feature",
            settings.device
        ))
    }
}
