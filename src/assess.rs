//! Frame assessment orchestrator.
//!
//! Sequences decode, detect and resolve for one frame and turns any stage
//! failure into a SAFE result with an explanatory message. Exactly one
//! `AssessmentResult` is produced per call; nothing escapes as an error.
//!
//! Stages run `Init -> Decoding -> Detecting -> Resolved`, stopping at the
//! first failure. `Resolved` cannot fail.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::decode::decode_payload;
use crate::detect::DetectorHandle;
use crate::error::AssessError;
use crate::policy::{resolve, ObjectEntry, ThreatLevel, ThreatPolicyTable, Verdict};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Init,
    Decoding,
    Detecting,
    Resolved,
}

/// Response record for one frame.
///
/// `objects` and `count` are always present; `label` and `error` are omitted
/// when empty so callers parse a single schema for success and failure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub threat: ThreatLevel,
    pub objects: Vec<ObjectEntry>,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AssessmentResult {
    pub fn from_verdict(verdict: Verdict) -> Self {
        let label = match verdict.level {
            ThreatLevel::Safe => None,
            _ => verdict.driving_label.map(|label| label.to_uppercase()),
        };
        Self {
            threat: verdict.level,
            count: verdict.objects.len(),
            objects: verdict.objects,
            label,
            error: None,
        }
    }

    /// Safe default for a failed stage.
    pub fn from_error(err: &AssessError) -> Self {
        Self {
            threat: ThreatLevel::Safe,
            objects: Vec::new(),
            count: 0,
            label: err.label().map(str::to_string),
            error: Some(err.error_message()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Orchestrator with its process-wide dependencies injected.
#[derive(Clone, Debug)]
pub struct Assessor {
    detector: Arc<DetectorHandle>,
    policy: Arc<ThreatPolicyTable>,
    confidence_threshold: f32,
}

impl Assessor {
    pub fn new(detector: Arc<DetectorHandle>, policy: Arc<ThreatPolicyTable>) -> Self {
        Self {
            detector,
            policy,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    /// Override the default confidence threshold.
    ///
    /// The threshold must be a finite value within [0, 1]; anything else would
    /// silently discard every detection.
    pub fn with_threshold(mut self, threshold: f32) -> Result<Self> {
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "confidence threshold must be within [0, 1], got {}",
                threshold
            ));
        }
        self.confidence_threshold = threshold;
        Ok(self)
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Whether the detector backend loaded at startup.
    pub fn is_ready(&self) -> bool {
        self.detector.is_ready()
    }

    /// Assess one frame payload. Never fails.
    pub fn assess(&self, payload: Option<&str>) -> AssessmentResult {
        match self.run(payload) {
            Ok(verdict) => {
                let result = AssessmentResult::from_verdict(verdict);
                log::info!(
                    "frame assessed: threat={} objects={}",
                    result.threat,
                    result.count
                );
                result
            }
            Err(err) => AssessmentResult::from_error(&err),
        }
    }

    fn run(&self, payload: Option<&str>) -> std::result::Result<Verdict, AssessError> {
        let payload = payload
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| self.fail(Stage::Init, AssessError::NoData))?;
        // Backend state is fixed for the process lifetime; skip decoding work
        // that could never reach a detector.
        if !self.detector.is_ready() {
            return Err(self.fail(Stage::Init, AssessError::BackendUnavailable));
        }

        self.enter(Stage::Decoding);
        let frame = decode_payload(payload).map_err(|err| self.fail(Stage::Decoding, err))?;

        self.enter(Stage::Detecting);
        let detections = self
            .detector
            .detect(&frame, self.confidence_threshold)
            .map_err(|err| self.fail(Stage::Detecting, err))?;
        drop(frame);

        self.enter(Stage::Resolved);
        Ok(resolve(&detections, &self.policy))
    }

    fn enter(&self, stage: Stage) {
        log::debug!("frame assessment entering {:?}", stage);
    }

    fn fail(&self, stage: Stage, err: AssessError) -> AssessError {
        log::warn!("frame assessment stopped at {:?}: {}", stage, err);
        err
    }
}
