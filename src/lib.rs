//! Frame threat assessment.
//!
//! This crate takes one encoded video frame, runs an object detector over it
//! and reduces the detections to a single threat level for an operator
//! display: SAFE, CAUTION or DANGER.
//!
//! # Pipeline
//!
//! 1. **Decode** (`decode`): data-URL or bare base-64 payload to RGB8 pixels.
//! 2. **Detect** (`detect`): a `DetectorBackend` behind a process-wide
//!    `DetectorHandle`, with the confidence threshold enforced.
//! 3. **Resolve** (`policy`): label to level lookup, maximum over the frame,
//!    full inventory kept.
//! 4. **Assess** (`assess`): sequences the stages; any failure yields a SAFE
//!    result with an `error` message instead of an error.
//!
//! The detector handle and policy table are built once at startup and
//! injected into the `Assessor`; no request state outlives its request.
//!
//! # Module Structure
//!
//! - `api`: HTTP front (`/api/analyze`, `/api/health`)
//! - `config`: service configuration (file + environment)
//! - `error`: stage failure taxonomy

pub mod api;
pub mod assess;
pub mod config;
pub mod decode;
pub mod detect;
pub mod error;
pub mod policy;

pub use assess::{AssessmentResult, Assessor, Stage, DEFAULT_CONFIDENCE_THRESHOLD};
pub use config::{DetectorSettings, PolicySettings, ServiceConfig};
pub use decode::{decode_payload, DecodedFrame};
pub use detect::{
    BoundingBox, Detection, DetectionCapability, DetectorBackend, DetectorHandle, StubBackend,
};
pub use error::AssessError;
pub use policy::{resolve, ObjectEntry, ThreatLevel, ThreatPolicyTable, Verdict};
