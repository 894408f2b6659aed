//! Producer/consumer frame pipeline.
//!
//! The capture loop pushes frames into a bounded input channel with
//! [`FramePipeline::submit_frame`]; a single worker thread runs the detector
//! and pushes [`DetectionBatch`]es into a bounded output channel; the render
//! loop polls with [`FramePipeline::try_take_latest_detections`].
//!
//! Backpressure never blocks the producer:
//! - input full: the new frame is dropped and `submit_frame` returns false
//! - output full: the oldest batch is evicted before the new one is queued
//!
//! The channels are the only state shared with the worker. Lifecycle state
//! lives on the handle and is driven only by `start()` and `stop()`.

mod worker;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::config::PipelineConfig;
use crate::detect::{ClassNameTable, DetectionBatch, Detector};
use crate::error::PipelineError;
use crate::frame::Frame;
use worker::Worker;

/// Worker lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Main-thread counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames accepted into the input channel.
    pub submitted: u64,
    /// Frames rejected because the input channel was full or the pipeline
    /// was not running.
    pub dropped: u64,
    /// Batches returned by `try_take_latest_detections`.
    pub batches_taken: u64,
}

/// Parts handed to the worker on `start()`.
struct WorkerParts {
    detector: Box<dyn Detector>,
    input_rx: Receiver<Frame>,
    output_tx: Sender<DetectionBatch>,
}

pub struct FramePipeline {
    config: PipelineConfig,
    classes: Arc<ClassNameTable>,
    state: PipelineState,
    input_tx: Sender<Frame>,
    output_rx: Receiver<DetectionBatch>,
    pending: Option<WorkerParts>,
    stop_tx: Option<Sender<()>>,
    done_rx: Option<Receiver<()>>,
    handle: Option<JoinHandle<()>>,
    stats: PipelineStats,
}

impl FramePipeline {
    /// Wire a detector and class table. Channels are created here; no thread
    /// runs until [`start`](Self::start).
    pub fn new(
        detector: Box<dyn Detector>,
        classes: Arc<ClassNameTable>,
        config: PipelineConfig,
    ) -> Self {
        let (input_tx, input_rx) = bounded(config.input_capacity.max(1));
        let (output_tx, output_rx) = bounded(config.output_capacity.max(1));
        Self {
            config,
            classes,
            state: PipelineState::Created,
            input_tx,
            output_rx,
            pending: Some(WorkerParts {
                detector,
                input_rx,
                output_tx,
            }),
            stop_tx: None,
            done_rx: None,
            handle: None,
            stats: PipelineStats::default(),
        }
    }

    /// Spawn the worker. Valid only from `Created`.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.state != PipelineState::Created {
            return Err(PipelineError::InvalidState(self.state));
        }
        let parts = self
            .pending
            .take()
            .ok_or(PipelineError::InvalidState(self.state))?;

        let (stop_tx, stop_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);
        let worker = Worker {
            detector: parts.detector,
            classes: Arc::clone(&self.classes),
            params: self.config.params,
            poll_interval: self.config.poll_interval,
            input: parts.input_rx,
            output: parts.output_tx,
            evict: self.output_rx.clone(),
            stop: stop_rx,
            _done: done_tx,
        };

        let handle = std::thread::Builder::new()
            .name("edge-inference".into())
            .spawn(move || worker.run())?;

        self.stop_tx = Some(stop_tx);
        self.done_rx = Some(done_rx);
        self.handle = Some(handle);
        self.state = PipelineState::Running;
        log::info!(
            "FramePipeline: running (input capacity {}, output capacity {})",
            self.config.input_capacity,
            self.config.output_capacity
        );
        Ok(())
    }

    /// Signal the worker and wait at most `stop_timeout` for it to exit.
    ///
    /// Always ends in `Stopped`. A detector call still in flight when the
    /// timeout expires is abandoned: its thread is detached and whatever it
    /// produces is discarded.
    pub fn stop(&mut self) {
        match self.state {
            PipelineState::Stopped => return,
            PipelineState::Created => {
                self.pending = None;
                self.state = PipelineState::Stopped;
                return;
            }
            PipelineState::Running | PipelineState::Stopping => {}
        }
        self.state = PipelineState::Stopping;
        let started = Instant::now();

        // Dropping the sender disconnects the stop channel, which wakes the
        // worker's select immediately.
        drop(self.stop_tx.take());

        let exited = match self.done_rx.take() {
            Some(done_rx) => match done_rx.recv_timeout(self.config.stop_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                Err(RecvTimeoutError::Timeout) => false,
            },
            None => true,
        };

        match (exited, self.handle.take()) {
            (true, Some(handle)) => {
                if handle.join().is_err() {
                    log::error!("FramePipeline: worker thread panicked");
                }
            }
            (false, Some(_detached)) => {
                log::warn!(
                    "FramePipeline: worker did not exit within {:?}; abandoning in-flight detection",
                    self.config.stop_timeout
                );
            }
            (_, None) => {}
        }

        // Frames still queued will never be processed.
        let discarded = self.input_tx.len();
        self.state = PipelineState::Stopped;
        log::info!(
            "FramePipeline: stopped in {:?} ({} submitted, {} dropped, {} queued frame(s) discarded)",
            started.elapsed(),
            self.stats.submitted,
            self.stats.dropped,
            discarded
        );
    }

    /// Offer a frame to the worker without blocking.
    ///
    /// Returns false when the input channel is full or the pipeline is not
    /// running; the frame is dropped in both cases.
    pub fn submit_frame(&mut self, frame: Frame) -> bool {
        if self.state != PipelineState::Running {
            self.stats.dropped += 1;
            return false;
        }
        match self.input_tx.try_send(frame) {
            Ok(()) => {
                self.stats.submitted += 1;
                true
            }
            Err(TrySendError::Full(frame)) => {
                self.stats.dropped += 1;
                log::trace!("FramePipeline: input full, dropped frame {}", frame.sequence());
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.stats.dropped += 1;
                false
            }
        }
    }

    /// Drain the output channel and return the newest batch, if any.
    pub fn try_take_latest_detections(&mut self) -> Option<DetectionBatch> {
        let latest = self.output_rx.try_iter().last()?;
        self.stats.batches_taken += 1;
        Some(latest)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Frames waiting for the worker.
    pub fn input_len(&self) -> usize {
        self.input_tx.len()
    }

    /// Batches waiting for the render loop.
    pub fn output_len(&self) -> usize {
        self.output_rx.len()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InferenceParams;
    use crate::detect::{BoundingBox, RawDetection};
    use anyhow::{anyhow, Result};
    use std::time::Duration;

    /// Signals each call, then waits for a release token (or a fixed delay).
    struct GatedDetector {
        entered: Sender<u64>,
        release: Option<Receiver<()>>,
        delay: Duration,
        class_indices: Vec<usize>,
    }

    impl Detector for GatedDetector {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn detect(&mut self, frame: &Frame, _params: &InferenceParams) -> Result<Vec<RawDetection>> {
            let _ = self.entered.send(frame.sequence());
            if let Some(release) = &self.release {
                let _ = release.recv();
            }
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            Ok(self
                .class_indices
                .iter()
                .map(|&class_index| RawDetection {
                    bbox: BoundingBox::new(0.0, 0.0, 4.0, 4.0),
                    confidence: 0.9,
                    class_index,
                })
                .collect())
        }
    }

    /// Panics on odd frames, errors on frames divisible by 4.
    struct FlakyDetector;

    impl Detector for FlakyDetector {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn detect(&mut self, frame: &Frame, _params: &InferenceParams) -> Result<Vec<RawDetection>> {
            if frame.sequence() % 2 == 1 {
                panic!("corrupt tensor for frame {}", frame.sequence());
            }
            if frame.sequence() % 4 == 0 {
                return Err(anyhow!("decode failure"));
            }
            Ok(Vec::new())
        }
    }

    fn classes() -> Arc<ClassNameTable> {
        Arc::new(ClassNameTable::new(vec![
            "person".into(),
            "car".into(),
            "dog".into(),
        ]))
    }

    fn frame(sequence: u64) -> Frame {
        Frame::filled(16, 12, [40, 80, 120], sequence).expect("frame")
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            poll_interval: Duration::from_millis(10),
            stop_timeout: Duration::from_millis(200),
            ..PipelineConfig::default()
        }
    }

    fn wait_for_batch(pipeline: &mut FramePipeline, timeout: Duration) -> Option<DetectionBatch> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(batch) = pipeline.try_take_latest_detections() {
                return Some(batch);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn lifecycle_transitions() -> Result<()> {
        let mut pipeline =
            FramePipeline::new(Box::new(crate::detect::StubBackend::new(3)), classes(), test_config());
        assert_eq!(pipeline.state(), PipelineState::Created);
        pipeline.start()?;
        assert_eq!(pipeline.state(), PipelineState::Running);
        assert!(matches!(
            pipeline.start(),
            Err(PipelineError::InvalidState(PipelineState::Running))
        ));
        pipeline.stop();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        pipeline.stop();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        Ok(())
    }

    #[test]
    fn submit_before_start_is_rejected() {
        let mut pipeline =
            FramePipeline::new(Box::new(crate::detect::StubBackend::new(3)), classes(), test_config());
        assert!(!pipeline.submit_frame(frame(1)));
        assert_eq!(pipeline.stats().dropped, 1);
        assert_eq!(pipeline.input_len(), 0);
    }

    #[test]
    fn input_channel_never_exceeds_capacity() -> Result<()> {
        let (entered_tx, entered_rx) = bounded(16);
        let (release_tx, release_rx) = bounded(16);
        let detector = GatedDetector {
            entered: entered_tx,
            release: Some(release_rx),
            delay: Duration::ZERO,
            class_indices: vec![0],
        };
        let mut pipeline = FramePipeline::new(Box::new(detector), classes(), test_config());
        pipeline.start()?;

        assert!(pipeline.submit_frame(frame(1)));
        assert_eq!(entered_rx.recv_timeout(Duration::from_secs(2))?, 1);

        // Worker is blocked inside the detector; only the channel holds frames.
        let accepted: Vec<bool> = (2..=8).map(|seq| pipeline.submit_frame(frame(seq))).collect();
        assert_eq!(accepted, vec![true, true, true, false, false, false, false]);
        assert_eq!(pipeline.input_len(), 3);
        assert_eq!(pipeline.stats().submitted, 4);
        assert_eq!(pipeline.stats().dropped, 4);

        for _ in 0..4 {
            release_tx.send(())?;
        }
        let mut last = None;
        let deadline = Instant::now() + Duration::from_secs(2);
        while last != Some(4) && Instant::now() < deadline {
            if let Some(batch) = wait_for_batch(&mut pipeline, Duration::from_millis(100)) {
                assert!(batch.frame_sequence <= 4);
                last = Some(batch.frame_sequence);
            }
        }
        assert_eq!(last, Some(4));
        pipeline.stop();
        Ok(())
    }

    #[test]
    fn batches_exclude_unknown_classes() -> Result<()> {
        let (entered_tx, _entered_rx) = bounded(16);
        let detector = GatedDetector {
            entered: entered_tx,
            release: None,
            delay: Duration::ZERO,
            class_indices: vec![0, 5, 2],
        };
        let mut pipeline = FramePipeline::new(Box::new(detector), classes(), test_config());
        pipeline.start()?;
        assert!(pipeline.submit_frame(frame(1)));

        let batch = wait_for_batch(&mut pipeline, Duration::from_secs(2))
            .ok_or_else(|| anyhow!("no batch produced"))?;
        let labels: Vec<&str> = batch
            .detections
            .iter()
            .map(|d| d.class_label.as_str())
            .collect();
        assert_eq!(labels, vec!["person", "dog"]);
        assert!(batch.detections.iter().all(|d| d.class_index < 3));
        assert_eq!(batch.discarded, 1);
        assert_eq!(pipeline.stats().batches_taken, 1);
        Ok(())
    }

    #[test]
    fn take_latest_discards_older_batches() -> Result<()> {
        let (entered_tx, entered_rx) = bounded(16);
        let detector = GatedDetector {
            entered: entered_tx,
            release: None,
            delay: Duration::ZERO,
            class_indices: vec![1],
        };
        let mut pipeline = FramePipeline::new(Box::new(detector), classes(), test_config());
        pipeline.start()?;

        for seq in 1..=5 {
            assert!(pipeline.submit_frame(frame(seq)));
            assert_eq!(entered_rx.recv_timeout(Duration::from_secs(2))?, seq);
            assert!(pipeline.output_len() <= 2);
        }
        // Wait for the last batch to land, then take once.
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut latest = None;
        while Instant::now() < deadline {
            if pipeline.output_len() > 0 {
                std::thread::sleep(Duration::from_millis(20));
                latest = pipeline.try_take_latest_detections();
                if latest.as_ref().map(|b| b.frame_sequence) == Some(5) {
                    break;
                }
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(latest.map(|b| b.frame_sequence), Some(5));
        assert_eq!(pipeline.output_len(), 0);
        Ok(())
    }

    #[test]
    fn worker_survives_detector_errors_and_panics() -> Result<()> {
        let mut pipeline = FramePipeline::new(Box::new(FlakyDetector), classes(), test_config());
        pipeline.start()?;

        // 1 panics, 2 succeeds, 3 panics, 4 errors, 6 succeeds.
        for seq in 1..=4 {
            pipeline.submit_frame(frame(seq));
            std::thread::sleep(Duration::from_millis(20));
        }
        pipeline.submit_frame(frame(6));

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut seen = Vec::new();
        while Instant::now() < deadline && !seen.contains(&6) {
            if let Some(batch) = pipeline.try_take_latest_detections() {
                seen.push(batch.frame_sequence);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(seen.contains(&6), "worker stopped after a bad frame: {:?}", seen);
        assert!(seen.iter().all(|seq| *seq == 2 || *seq == 6));
        assert_eq!(pipeline.state(), PipelineState::Running);
        Ok(())
    }

    #[test]
    fn stop_during_slow_detection_is_bounded() -> Result<()> {
        let (entered_tx, entered_rx) = bounded(16);
        let detector = GatedDetector {
            entered: entered_tx,
            release: None,
            delay: Duration::from_secs(3),
            class_indices: vec![0],
        };
        let mut pipeline = FramePipeline::new(Box::new(detector), classes(), test_config());
        pipeline.start()?;
        assert!(pipeline.submit_frame(frame(1)));
        entered_rx.recv_timeout(Duration::from_secs(2))?;

        let started = Instant::now();
        pipeline.stop();
        let elapsed = started.elapsed();

        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(2), "stop took {:?}", elapsed);
        Ok(())
    }

    #[test]
    fn stop_without_start_ends_stopped() {
        let mut pipeline =
            FramePipeline::new(Box::new(crate::detect::StubBackend::new(3)), classes(), test_config());
        pipeline.stop();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(matches!(
            pipeline.start(),
            Err(PipelineError::InvalidState(PipelineState::Stopped))
        ));
    }
}
