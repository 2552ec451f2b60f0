use std::time::Instant;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionOutput};
use crate::frame::RawFrame;

/// Channel value every channel of a pixel must reach to count as foreground.
const BRIGHT_THRESHOLD: u8 = 240;

/// Stub backend for development and tests.
///
/// Reports a single "object" covering all near-white pixels, which is what the
/// synthetic `stub://` camera draws. Confidence is the share of the box that is
/// actually foreground.
pub struct StubBackend {
    label: String,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            label: "object".to_string(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &RawFrame) -> Result<DetectionOutput> {
        if frame.is_empty() {
            return Err(anyhow!("cannot run detection on an empty frame"));
        }
        let started = Instant::now();
        let width = frame.width as usize;

        let mut bounds: Option<[usize; 4]> = None;
        let mut bright = 0usize;
        for (idx, px) in frame.pixels().chunks_exact(3).enumerate() {
            if px.iter().all(|&c| c >= BRIGHT_THRESHOLD) {
                bright += 1;
                let (x, y) = (idx % width, idx / width);
                bounds = Some(match bounds {
                    None => [x, y, x, y],
                    Some([x1, y1, x2, y2]) => [x1.min(x), y1.min(y), x2.max(x), y2.max(y)],
                });
            }
        }

        let detections = match bounds {
            Some([x1, y1, x2, y2]) => {
                let area = (x2 - x1 + 1) * (y2 - y1 + 1);
                let confidence = (bright as f32 / area as f32).clamp(0.0, 1.0);
                vec![Detection::new(
                    self.label.clone(),
                    confidence,
                    [x1 as i32, y1 as i32, x2 as i32, y2 as i32],
                )]
            }
            None => Vec::new(),
        };

        Ok(DetectionOutput {
            detections,
            inference_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}
