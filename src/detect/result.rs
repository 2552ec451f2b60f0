use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// One object instance reported by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// Model confidence in [0, 1].
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in frame pixels, `x1 <= x2`, `y1 <= y2`.
    #[serde(rename = "box")]
    pub bbox: [i32; 4],
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: [i32; 4]) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.label.trim().is_empty() {
            return Err(ValidationError::new("detection.label", "label is empty"));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::new(
                "detection.confidence",
                format!("{} is outside [0, 1]", self.confidence),
            ));
        }
        let [x1, y1, x2, y2] = self.bbox;
        if x1 > x2 || y1 > y2 {
            return Err(ValidationError::new(
                "detection.box",
                format!("corners out of order: {:?}", self.bbox),
            ));
        }
        Ok(())
    }
}

/// Output of one detector invocation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionOutput {
    /// Detections in the model's native order.
    pub detections: Vec<Detection>,
    /// Wall time spent inside the model, in milliseconds.
    pub inference_ms: f64,
}
