use thiserror::Error;

/// Stage failures of a frame assessment.
///
/// Every variant is recovered by the assessor and turned into a SAFE result
/// carrying an explanatory message. None of them is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssessError {
    /// Payload missing or empty.
    #[error("no image data supplied")]
    NoData,
    /// Payload body is not valid base-64.
    #[error("decode error: {0}")]
    DecodeError(String),
    /// Bytes decoded but are not a supported, intact image.
    #[error("invalid image: {0}")]
    InvalidImage(String),
    /// Detector failed to initialise at process start.
    #[error("model not loaded")]
    BackendUnavailable,
    /// Detector was loaded but the inference call failed.
    #[error("inference error: {0}")]
    InferenceError(String),
}

impl AssessError {
    /// Message reported in the `error` field of the result.
    pub fn error_message(&self) -> String {
        match self {
            AssessError::NoData => "NO DATA".to_string(),
            other => other.to_string(),
        }
    }

    /// Operator display label, for the failures the display distinguishes.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            AssessError::NoData => Some("NO DATA"),
            AssessError::InvalidImage(_) => Some("INVALID IMAGE"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_display_contract() {
        assert_eq!(AssessError::NoData.error_message(), "NO DATA");
        assert_eq!(AssessError::NoData.label(), Some("NO DATA"));
        assert_eq!(
            AssessError::BackendUnavailable.error_message(),
            "model not loaded"
        );
        assert_eq!(AssessError::BackendUnavailable.label(), None);
        assert_eq!(
            AssessError::DecodeError("Invalid padding".into()).error_message(),
            "decode error: Invalid padding"
        );
        assert_eq!(
            AssessError::InvalidImage("truncated".into()).label(),
            Some("INVALID IMAGE")
        );
    }
}
