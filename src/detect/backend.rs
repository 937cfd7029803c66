use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Person detector backend.
///
/// One instance is created per building and is driven from that building's
/// worker thread only, so implementations may keep per-stream state.
/// Returned detections must already be restricted to people and filtered by
/// the backend's confidence threshold.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
