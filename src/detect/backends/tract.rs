#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::DetectionOutput;
use crate::detect::yolo::{self, DecodeParams};
use crate::frame::RawFrame;

/// Tract-based backend for YOLO-style ONNX detection models.
///
/// Frames are resized to the model input, run through the network, and the
/// detection head is decoded back into frame pixel coordinates.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
    labels: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            labels: Vec::new(),
        })
    }

    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    fn build_input(&self, frame: &RawFrame) -> Result<Tensor> {
        if frame.is_empty() {
            return Err(anyhow!("cannot run inference on an empty frame"));
        }
        let image = RgbImage::from_raw(frame.width, frame.height, frame.to_rgb())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;
        let resized = if (frame.width, frame.height) == (self.width, self.height) {
            image
        } else {
            image::imageops::resize(&image, self.width, self.height, FilterType::Triangle)
        };

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &RawFrame) -> Result<DetectionOutput> {
        let input = self.build_input(frame)?;
        let started = Instant::now();
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let inference_ms = started.elapsed().as_secs_f64() * 1000.0;

        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let head = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = head.shape();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected detection head shape {:?}", shape));
        }
        let (attrs, anchors) = (shape[1], shape[2]);
        let raw: Vec<f32> = head.iter().copied().collect();

        let detections = yolo::decode(
            &raw,
            attrs,
            anchors,
            &DecodeParams {
                input_width: self.width,
                input_height: self.height,
                frame_width: frame.width,
                frame_height: frame.height,
                confidence_threshold: self.confidence_threshold,
                iou_threshold: self.iou_threshold,
                labels: &self.labels,
            },
        )?;

        Ok(DetectionOutput {
            detections,
            inference_ms,
        })
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RawFrame::new(
            vec![0u8; (self.width * self.height * 3) as usize],
            self.width,
            self.height,
            crate::frame::PixelFormat::Rgb24,
        )?;
        self.detect(&blank).map(|_| ())
    }
}
