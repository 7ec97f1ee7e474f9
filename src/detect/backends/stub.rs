use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::decode::DecodedFrame;
use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::Detection;

/// Scripted backend for tests and dry runs.
///
/// Returns the same detections for every frame (or fails with a fixed
/// message) and counts how often it was invoked. It does not apply the
/// confidence threshold; that is left to the handle.
pub struct StubBackend {
    script: Script,
    calls: Arc<AtomicUsize>,
}

enum Script {
    Detections(Vec<Detection>),
    Failure(String),
}

impl StubBackend {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            script: Script::Detections(detections),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A backend whose every inference call fails.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            script: Script::Failure(message.into()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter; stays valid after the stub is moved into a handle.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::ObjectDetection)
    }

    fn detect(&mut self, _frame: &DecodedFrame, _confidence_threshold: f32) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Detections(detections) => Ok(detections.clone()),
            Script::Failure(message) => Err(anyhow!("{}", message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn stub_replays_script_and_counts_calls() {
        let frame = DecodedFrame::from_rgb(RgbImage::new(2, 2));
        let mut backend = StubBackend::new(vec![Detection::new("cup", 0.4)]);
        let calls = backend.call_counter();

        let first = backend.detect(&frame, 0.5).unwrap();
        let second = backend.detect(&frame, 0.5).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].label, "cup");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stub_reports_object_detection_only() {
        let backend = StubBackend::default();
        assert!(backend.supports(DetectionCapability::ObjectDetection));
        assert!(!backend.supports(DetectionCapability::Classification));
    }

    #[test]
    fn failing_stub_reports_error() {
        let frame = DecodedFrame::from_rgb(RgbImage::new(1, 1));
        let mut backend = StubBackend::failing("accelerator lost");
        let err = backend.detect(&frame, 0.5).unwrap_err();
        assert_eq!(err.to_string(), "accelerator lost");
        assert_eq!(backend.call_counter().load(Ordering::SeqCst), 1);
    }
}
