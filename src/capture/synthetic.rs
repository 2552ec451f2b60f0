//! Synthetic camera for `stub://` devices.
//!
//! Renders a dim gradient with a bright square that moves a few pixels per
//! frame, so the stub detector has something to find and the live stream
//! visibly changes.

use anyhow::Result;

use super::{CaptureSource, CaptureStats};
use crate::config::CameraSettings;
use crate::frame::{PixelFormat, RawFrame};

pub struct SyntheticSource {
    config: CameraSettings,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(config: CameraSettings) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn square_side(&self) -> u32 {
        (self.config.width.min(self.config.height) / 8).max(1)
    }

    /// Top-left corner of the bright square for the current frame.
    fn square_origin(&self) -> (u32, u32) {
        let side = self.square_side();
        let span_x = self.config.width.saturating_sub(side).max(1) as u64;
        let span_y = self.config.height.saturating_sub(side).max(1) as u64;
        let step = self.frame_count * 4;
        ((step % span_x) as u32, ((step / 2) % span_y) as u32)
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.config.width, self.config.height);
        let side = self.square_side();
        let (sx, sy) = self.square_origin();
        let mut pixels = vec![0u8; (w as usize) * (h as usize) * 3];
        for y in 0..h {
            for x in 0..w {
                let idx = ((y as usize) * (w as usize) + x as usize) * 3;
                let inside = x >= sx && x < sx + side && y >= sy && y < sy + side;
                let px = if inside {
                    [255, 255, 255]
                } else {
                    [
                        (x * 160 / w.max(1)) as u8,
                        (y * 160 / h.max(1)) as u8,
                        ((self.frame_count % 64) as u8) + 40,
                    ]
                };
                pixels[idx..idx + 3].copy_from_slice(&px);
            }
        }
        pixels
    }
}

impl CaptureSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.config.device,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<RawFrame> {
        self.frame_count += 1;
        RawFrame::new(
            self.render(),
            self.config.width,
            self.config.height,
            PixelFormat::Rgb24,
        )
    }

    fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}
