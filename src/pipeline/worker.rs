//! Inference worker loop.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{select, Receiver, Sender, TrySendError};

use crate::config::InferenceParams;
use crate::detect::{ClassNameTable, DetectionBatch, Detector};
use crate::error::FrameProcessingError;
use crate::frame::Frame;

/// Everything the worker thread owns.
pub(super) struct Worker {
    pub(super) detector: Box<dyn Detector>,
    pub(super) classes: Arc<ClassNameTable>,
    pub(super) params: InferenceParams,
    pub(super) poll_interval: std::time::Duration,
    pub(super) input: Receiver<Frame>,
    pub(super) output: Sender<DetectionBatch>,
    /// Second handle on the output channel, used only to evict the oldest batch.
    pub(super) evict: Receiver<DetectionBatch>,
    pub(super) stop: Receiver<()>,
    /// Dropped when the loop returns; `stop()` waits on the disconnect.
    pub(super) _done: Sender<()>,
}

impl Worker {
    pub(super) fn run(mut self) {
        if let Err(err) = self.detector.warm_up() {
            log::warn!(
                "pipeline worker: {} warm-up failed: {:#}",
                self.detector.name(),
                err
            );
        }
        log::debug!("pipeline worker: started with {}", self.detector.name());

        let mut processed: u64 = 0;
        let mut failed: u64 = 0;
        loop {
            select! {
                recv(self.stop) -> _ => break,
                recv(self.input) -> msg => {
                    let Ok(frame) = msg else {
                        // Pipeline handle dropped.
                        break;
                    };
                    match self.process(&frame) {
                        Ok(batch) => {
                            processed += 1;
                            if !push_evicting(&self.output, &self.evict, batch) {
                                break;
                            }
                        }
                        Err(err) => {
                            failed += 1;
                            log::warn!("pipeline worker: {}", err);
                        }
                    }
                },
                default(self.poll_interval) => {}
            }
        }

        log::debug!(
            "pipeline worker: exiting ({} processed, {} failed)",
            processed,
            failed
        );
    }

    fn process(&mut self, frame: &Frame) -> Result<DetectionBatch, FrameProcessingError> {
        let started = Instant::now();
        let detector = &mut self.detector;
        let params = &self.params;
        let raw = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(frame, params)))
            .map_err(|payload| FrameProcessingError::Panicked {
                sequence: frame.sequence(),
                message: panic_message(payload.as_ref()),
            })?
            .map_err(|err| FrameProcessingError::Detector {
                sequence: frame.sequence(),
                message: format!("{:#}", err),
            })?;
        let latency = started.elapsed();

        Ok(build_batch(
            raw,
            &self.classes,
            &self.params,
            frame,
            self.detector.inference_size(),
            latency,
        ))
    }
}

/// Resolve labels, drop out-of-range classes and sub-threshold scores, and cap
/// the batch size.
pub(super) fn build_batch(
    raw: Vec<crate::detect::RawDetection>,
    classes: &ClassNameTable,
    params: &InferenceParams,
    frame: &Frame,
    inference_size: Option<(u32, u32)>,
    latency: std::time::Duration,
) -> DetectionBatch {
    let total = raw.len();
    let mut discarded = 0;
    let mut detections = Vec::with_capacity(total.min(params.max_detections));
    for det in raw {
        if det.confidence.is_nan() || det.confidence < params.confidence_threshold {
            continue;
        }
        match classes.resolve(det) {
            Some(resolved) => detections.push(resolved),
            None => discarded += 1,
        }
    }
    detections.truncate(params.max_detections);
    if discarded > 0 {
        log::debug!(
            "pipeline worker: frame {} discarded {} detection(s) with unknown class",
            frame.sequence(),
            discarded
        );
    }

    DetectionBatch {
        detections,
        frame_sequence: frame.sequence(),
        inference_size: inference_size.unwrap_or((frame.width(), frame.height())),
        latency,
        discarded,
    }
}

/// Send `batch`, evicting the oldest queued batch when the channel is full.
/// Returns false once the receiving side is gone.
pub(super) fn push_evicting(
    output: &Sender<DetectionBatch>,
    evict: &Receiver<DetectionBatch>,
    mut batch: DetectionBatch,
) -> bool {
    loop {
        match output.try_send(batch) {
            Ok(()) => return true,
            Err(TrySendError::Full(returned)) => {
                if let Ok(oldest) = evict.try_recv() {
                    log::trace!(
                        "pipeline worker: evicted batch for frame {}",
                        oldest.frame_sequence
                    );
                }
                batch = returned;
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, RawDetection};
    use crossbeam_channel::bounded;
    use std::time::Duration;

    fn batch(sequence: u64) -> DetectionBatch {
        DetectionBatch {
            frame_sequence: sequence,
            ..DetectionBatch::default()
        }
    }

    fn raw(class_index: usize, confidence: f32) -> RawDetection {
        RawDetection {
            bbox: BoundingBox::new(1.0, 1.0, 5.0, 5.0),
            confidence,
            class_index,
        }
    }

    #[test]
    fn full_output_evicts_oldest_batch() {
        let (tx, rx) = bounded(2);
        for sequence in 1..=5 {
            assert!(push_evicting(&tx, &rx, batch(sequence)));
            assert!(rx.len() <= 2);
        }
        let remaining: Vec<u64> = rx.try_iter().map(|b| b.frame_sequence).collect();
        assert_eq!(remaining, vec![4, 5]);
    }

    #[test]
    fn push_reports_disconnected_receiver() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let (_unused_tx, unrelated_rx) = bounded::<DetectionBatch>(1);
        assert!(!push_evicting(&tx, &unrelated_rx, batch(1)));
    }

    #[test]
    fn out_of_range_class_is_excluded() -> anyhow::Result<()> {
        let classes = ClassNameTable::new(vec!["a".into(), "b".into(), "c".into()]);
        let params = InferenceParams::default();
        let frame = Frame::filled(8, 8, [0, 0, 0], 9)?;

        let batch = build_batch(
            vec![raw(1, 0.9), raw(5, 0.9)],
            &classes,
            &params,
            &frame,
            None,
            Duration::ZERO,
        );
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.detections[0].class_label, "b");
        assert_eq!(batch.discarded, 1);
        assert_eq!(batch.inference_size, (8, 8));
        assert_eq!(batch.frame_sequence, 9);
        Ok(())
    }

    #[test]
    fn low_confidence_and_excess_detections_are_dropped() -> anyhow::Result<()> {
        let classes = ClassNameTable::new(vec!["a".into()]);
        let params = InferenceParams {
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            max_detections: 2,
        };
        let frame = Frame::filled(4, 4, [0, 0, 0], 1)?;

        let batch = build_batch(
            vec![raw(0, 0.2), raw(0, 0.6), raw(0, 0.7), raw(0, 0.8)],
            &classes,
            &params,
            &frame,
            Some((640, 640)),
            Duration::ZERO,
        );
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.discarded, 0);
        assert_eq!(batch.inference_size, (640, 640));
        Ok(())
    }

    #[test]
    fn nan_confidence_never_reaches_a_batch() -> anyhow::Result<()> {
        let classes = ClassNameTable::new(vec!["a".into()]);
        let params = InferenceParams::default();
        let frame = Frame::filled(4, 4, [0, 0, 0], 1)?;

        let batch = build_batch(
            vec![raw(0, f32::NAN), raw(0, f32::INFINITY), raw(0, 0.9)],
            &classes,
            &params,
            &frame,
            None,
            Duration::ZERO,
        );
        assert_eq!(batch.len(), 2);
        assert!(batch
            .detections
            .iter()
            .all(|d| (0.0..=1.0).contains(&d.confidence)));
        Ok(())
    }
}
