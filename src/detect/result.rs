/// Axis-aligned region in image pixel coordinates (top-left origin).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One object instance found in a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// Class name, verbatim from the detector vocabulary.
    pub label: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
    /// Carried for display only; policy never reads it.
    pub bbox: Option<BoundingBox>,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox: None,
        }
    }

    pub fn with_box(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }
}
