mod backend;
mod backends;
mod result;
pub mod yolo;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{Detection, DetectionOutput};

/// Build the configured detector backend.
pub fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend.as_str() {
        "stub" => {
            let backend = match settings.labels.first() {
                Some(label) => StubBackend::new().with_label(label.as_str()),
                None => StubBackend::new(),
            };
            Ok(Box::new(backend))
        }
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let model_path = settings
                .model_path
                .as_ref()
                .ok_or_else(|| anyhow!("detector backend 'tract' requires model_path"))?;
            let backend = TractBackend::new(model_path, settings.input_width, settings.input_height)?
                .with_thresholds(settings.confidence_threshold, settings.iou_threshold)
                .with_labels(settings.labels.clone());
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => Err(anyhow!(
            "detector backend 'tract' requires the backend-tract feature"
        )),
        other => Err(anyhow!("unknown detector backend '{}'", other)),
    }
}
