//! Rolling throughput monitor.
//!
//! Sampled once per main-loop iteration. Each sample is the instantaneous rate
//! derived from the time since the previous sample; the reported figure is the
//! plain mean of the last `window` samples.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_WINDOW: usize = 30;

#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    window: usize,
    samples: VecDeque<f64>,
    last_frame_at: Option<Instant>,
    total_frames: u64,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl PerformanceMonitor {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            last_frame_at: None,
            total_frames: 0,
        }
    }

    /// Record a frame at the current instant.
    pub fn record_frame(&mut self) {
        self.record_frame_at(Instant::now());
    }

    /// Record a frame at `now`. The first call only establishes a reference
    /// point.
    pub fn record_frame_at(&mut self, now: Instant) {
        self.total_frames += 1;
        if let Some(previous) = self.last_frame_at.replace(now) {
            self.record_interval(now.saturating_duration_since(previous));
        }
    }

    /// Push the rate for one inter-frame interval. Zero intervals are ignored.
    pub fn record_interval(&mut self, interval: Duration) {
        let secs = interval.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(1.0 / secs);
    }

    /// Mean of the window, or 0 when empty.
    pub fn average_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.last_frame_at = None;
        self.total_frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_reports_zero() {
        let monitor = PerformanceMonitor::default();
        assert_eq!(monitor.average_rate(), 0.0);
    }

    #[test]
    fn thirty_samples_at_ten_fps() {
        let mut monitor = PerformanceMonitor::default();
        for _ in 0..30 {
            monitor.record_interval(Duration::from_millis(100));
        }
        assert_eq!(monitor.sample_count(), 30);
        assert!((monitor.average_rate() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn timestamps_drive_the_window() {
        let mut monitor = PerformanceMonitor::new(4);
        let start = Instant::now();
        for i in 0..=10u64 {
            monitor.record_frame_at(start + Duration::from_millis(50 * i));
        }
        // First call only sets the reference; the window keeps the last 4.
        assert_eq!(monitor.total_frames(), 11);
        assert_eq!(monitor.sample_count(), 4);
        assert!((monitor.average_rate() - 20.0).abs() < 1e-6);
    }

    #[test]
    fn old_samples_roll_out() {
        let mut monitor = PerformanceMonitor::new(2);
        monitor.record_interval(Duration::from_millis(500));
        monitor.record_interval(Duration::from_millis(100));
        monitor.record_interval(Duration::from_millis(100));
        assert!((monitor.average_rate() - 10.0).abs() < 1e-9);

        monitor.reset();
        assert_eq!(monitor.average_rate(), 0.0);
        assert_eq!(monitor.total_frames(), 0);
    }
}
