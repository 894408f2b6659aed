use std::time::Duration;

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::config::InferenceParams;
use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, RawDetection};
use crate::frame::Frame;

/// Synthetic detector for `stub://` model directories and tests.
///
/// Derives up to three boxes from a hash of the pixel data, so identical
/// frames always yield identical detections. An optional artificial latency
/// emulates a slow accelerator.
pub struct StubBackend {
    num_classes: usize,
    latency: Duration,
}

impl StubBackend {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes: num_classes.max(1),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(80)
    }
}

impl Detector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame, params: &InferenceParams) -> Result<Vec<RawDetection>> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        let digest: [u8; 32] = Sha256::digest(frame.pixels()).into();
        let count = (digest[0] % 4) as usize;
        let (w, h) = (frame.width() as f32, frame.height() as f32);

        let detections = (0..count)
            .map(|i| {
                let b = &digest[1 + i * 7..8 + i * 7];
                let x1 = w * b[0] as f32 / 510.0;
                let y1 = h * b[1] as f32 / 510.0;
                let x2 = x1 + w * (0.1 + b[2] as f32 / 1020.0);
                let y2 = y1 + h * (0.1 + b[3] as f32 / 1020.0);
                RawDetection {
                    bbox: BoundingBox::new(x1, y1, x2.min(w), y2.min(h)),
                    confidence: 0.5 + b[4] as f32 / 510.0,
                    class_index: (b[5] as usize * 256 + b[6] as usize) % self.num_classes,
                }
            })
            .filter(|det| det.confidence >= params.confidence_threshold)
            .take(params.max_detections)
            .collect();
        Ok(detections)
    }
}
