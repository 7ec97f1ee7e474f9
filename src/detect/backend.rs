use anyhow::Result;

use crate::decode::DecodedFrame;
use crate::detect::result::Detection;

/// What a backend can report about a frame.
///
/// The assessment pipeline only consumes labelled object detections.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    ObjectDetection,
    Classification,
}

/// Object detector backend trait.
///
/// Backends are created once at process start and shared by every request
/// through a `DetectorHandle`, which serializes calls (`detect` takes
/// `&mut self`).
///
/// Implementations must:
/// - Treat the frame as read-only and ephemeral (no copies kept past `detect`)
/// - Not write to disk or make network requests during `detect`
/// - Return detections in the order the model emits them
/// - Return `Ok(vec![])` for a frame with nothing in it
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Run detection on a frame.
    ///
    /// Backends that can filter by confidence should drop detections below
    /// `confidence_threshold`; the handle re-applies the threshold regardless.
    fn detect(&mut self, frame: &DecodedFrame, confidence_threshold: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
