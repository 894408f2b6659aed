//! Test-pattern source for `stub://` devices and tests.

use anyhow::Result;
use std::time::{Duration, Instant};

use super::CaptureStats;
use crate::config::CameraConfig;
use crate::frame::Frame;

pub(crate) struct TestPatternSource {
    name: String,
    width: u32,
    height: u32,
    frame_interval: Option<Duration>,
    frame_count: u64,
    next_due: Option<Instant>,
    /// Simulated scene state; changes every 50 frames.
    scene_state: u8,
}

impl TestPatternSource {
    pub(crate) fn new(name: &str, config: &CameraConfig) -> Self {
        log::info!(
            "TestPatternSource: opened {} ({}x{} @ {} fps)",
            name,
            config.width,
            config.height,
            config.fps
        );
        Self {
            name: name.to_string(),
            width: config.width,
            height: config.height,
            frame_interval: (config.fps > 0)
                .then(|| Duration::from_secs_f64(1.0 / config.fps as f64)),
            frame_count: 0,
            next_due: None,
            scene_state: 0,
        }
    }

    pub(crate) fn next_frame(&mut self) -> Result<Frame> {
        self.pace();
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(pixels, self.width, self.height, self.frame_count)
    }

    /// Sleep until the next frame is due so the source behaves like a camera.
    fn pace(&mut self) {
        let Some(interval) = self.frame_interval else {
            return;
        };
        let now = Instant::now();
        let due = match self.next_due {
            Some(due) if due > now => {
                std::thread::sleep(due - now);
                due
            }
            _ => now,
        };
        self.next_due = Some(due + interval);
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.width * self.height * 3) as usize;

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }

    pub(crate) fn is_healthy(&self) -> bool {
        true
    }

    pub(crate) fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frame_count,
            device: self.name.clone(),
            width: self.width,
            height: self.height,
        }
    }
}
