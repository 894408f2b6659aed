//! Capture liveness shared by the device backends.

#![cfg_attr(
    not(any(feature = "camera-gstreamer", feature = "ingest-v4l2")),
    allow(dead_code)
)]

use std::time::{Duration, Instant};

/// Time allowed for the first frame after the device opens.
const STARTUP_GRACE: Duration = Duration::from_secs(5);

/// Tracks the last delivered frame and the last capture error.
///
/// An error marks the source unhealthy only until the next frame arrives.
#[derive(Debug)]
pub(crate) struct CaptureHealth {
    fps: u32,
    opened_at: Instant,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl CaptureHealth {
    pub(crate) fn new(fps: u32) -> Self {
        Self::opened_at(fps, Instant::now())
    }

    pub(crate) fn opened_at(fps: u32, opened_at: Instant) -> Self {
        Self {
            fps,
            opened_at,
            last_frame_at: None,
            last_error: None,
        }
    }

    pub(crate) fn record_frame(&mut self, at: Instant) {
        self.last_frame_at = Some(at);
        if let Some(previous) = self.last_error.take() {
            log::info!("capture recovered after: {}", previous);
        }
    }

    pub(crate) fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.is_healthy_at(Instant::now())
    }

    pub(crate) fn is_healthy_at(&self, now: Instant) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        match self.last_frame_at {
            Some(at) => now.saturating_duration_since(at) <= self.grace(),
            None => now.saturating_duration_since(self.opened_at) <= STARTUP_GRACE,
        }
    }

    /// Six frame periods, never below two seconds.
    fn grace(&self) -> Duration {
        let base_ms = if self.fps == 0 {
            2_000
        } else {
            (1000 / self.fps).saturating_mul(6)
        };
        Duration::from_millis(u64::from(base_ms.max(2_000)))
    }
}
