use anyhow::Result;

use crate::detect::result::DetectionOutput;
use crate::frame::RawFrame;

/// Detector backend trait.
///
/// Backends are stateful and not reentrant. The capture arbiter is the only
/// caller and invokes `detect` from its worker thread, one frame at a time.
pub trait DetectorBackend {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Confidence and box values are passed through from the model; boxes are
    /// rounded to integer pixels of the input frame.
    fn detect(&mut self, frame: &RawFrame) -> Result<DetectionOutput>;

    /// Optional warm-up hook, run once before the first cycle.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
