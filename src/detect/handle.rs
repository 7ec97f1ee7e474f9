use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;
use crate::decode::DecodedFrame;
use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::Detection;
use crate::error::AssessError;

/// Process-wide detector handle.
///
/// Built once at startup, either around a loaded backend or in the
/// unavailable state recording why loading failed. Loading is never retried;
/// an unavailable handle answers every `detect` with `BackendUnavailable`.
///
/// Calls into the backend go through a single-slot `Mutex` gate because
/// `DetectorBackend::detect` takes `&mut self`.
pub struct DetectorHandle {
    state: BackendState,
}

enum BackendState {
    Ready {
        name: &'static str,
        backend: Mutex<Box<dyn DetectorBackend>>,
    },
    Unavailable {
        reason: String,
    },
}

impl DetectorHandle {
    pub fn ready<B: DetectorBackend + 'static>(backend: B) -> Self {
        Self {
            state: BackendState::Ready {
                name: backend.name(),
                backend: Mutex::new(Box::new(backend)),
            },
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: BackendState::Unavailable {
                reason: reason.into(),
            },
        }
    }

    /// Run a backend initialiser and its warm-up, recording failure as unavailability.
    ///
    /// Backends that cannot do object detection are rejected before warm-up.
    pub fn load<B, F>(init: F) -> Self
    where
        B: DetectorBackend + 'static,
        F: FnOnce() -> Result<B>,
    {
        let loaded = init().and_then(|mut backend| {
            if !backend.supports(DetectionCapability::ObjectDetection) {
                return Err(anyhow!(
                    "detector backend '{}' does not support object detection",
                    backend.name()
                ));
            }
            backend.warm_up()?;
            Ok(backend)
        });
        match loaded {
            Ok(backend) => {
                log::info!("detector backend '{}' ready", backend.name());
                Self::ready(backend)
            }
            Err(err) => {
                log::error!("detector backend failed to load: {:#}", err);
                Self::unavailable(format!("{:#}", err))
            }
        }
    }

    /// Build the handle described by the service configuration.
    pub fn from_settings(settings: &DetectorSettings) -> Self {
        match &settings.model_path {
            Some(path) => load_model(path, settings),
            None => {
                log::warn!("no detector model configured; every frame will report SAFE");
                Self::unavailable("no detector model configured")
            }
        }
    }

    /// Readiness query for the health endpoint.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, BackendState::Ready { .. })
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        match &self.state {
            BackendState::Ready { name, .. } => Some(*name),
            BackendState::Unavailable { .. } => None,
        }
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.state {
            BackendState::Ready { .. } => None,
            BackendState::Unavailable { reason } => Some(reason),
        }
    }

    /// Run detection and enforce the confidence threshold.
    ///
    /// Detections below the threshold, with a non-finite confidence, or with an
    /// empty label are dropped; the rest keep emission order.
    pub fn detect(
        &self,
        frame: &DecodedFrame,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, AssessError> {
        let backend = match &self.state {
            BackendState::Ready { backend, .. } => backend,
            BackendState::Unavailable { .. } => return Err(AssessError::BackendUnavailable),
        };

        // A backend that panicked earlier leaves the gate poisoned; its state is
        // still usable for the next frame.
        let mut guard = backend.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            guard.detect(frame, confidence_threshold)
        }));
        drop(guard);

        let detections = match outcome {
            Ok(Ok(detections)) => detections,
            Ok(Err(err)) => return Err(AssessError::InferenceError(format!("{:#}", err))),
            Err(_) => {
                return Err(AssessError::InferenceError(
                    "detector backend panicked".to_string(),
                ))
            }
        };

        Ok(detections
            .into_iter()
            .filter(|d| !d.label.is_empty())
            .filter(|d| d.confidence.is_finite() && d.confidence >= confidence_threshold)
            .map(|mut d| {
                d.confidence = d.confidence.clamp(0.0, 1.0);
                d
            })
            .collect())
    }
}

impl std::fmt::Debug for DetectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.state {
            BackendState::Ready { name, .. } => {
                f.debug_struct("DetectorHandle").field("backend", name).finish()
            }
            BackendState::Unavailable { reason } => f
                .debug_struct("DetectorHandle")
                .field("unavailable", reason)
                .finish(),
        }
    }
}

#[cfg(feature = "backend-tract")]
fn load_model(path: &Path, settings: &DetectorSettings) -> DetectorHandle {
    use crate::detect::backends::TractBackend;

    let input_size = settings.input_size;
    let iou_threshold = settings.iou_threshold;
    DetectorHandle::load(|| Ok(TractBackend::new(path, input_size)?.with_iou_threshold(iou_threshold)))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(path: &Path, _settings: &DetectorSettings) -> DetectorHandle {
    log::error!(
        "detector model {} configured but this build has no inference backend (enable backend-tract)",
        path.display()
    );
    DetectorHandle::unavailable("built without an inference backend")
}
