use anyhow::Result;

use crate::detect::result::Detection;
use crate::ingest::Frame;

/// Detector backend trait.
///
/// The detection model is an external capability; this trait is the seam the
/// daemon drives. An empty result means no capture is produced for the frame.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
