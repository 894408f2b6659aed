use anyhow::Result;

use crate::config::InferenceParams;
use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Object detector.
///
/// The pipeline treats `detect` as a synchronous, non-preemptible call. It
/// runs on the worker thread only, so implementations must be `Send` but need
/// not be `Sync`. Implementations may use an accelerator internally.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Resolution the returned boxes are expressed in. `None` means the
    /// resolution of the frame as received.
    fn inference_size(&self) -> Option<(u32, u32)> {
        None
    }

    /// Run detection on one frame with the pipeline's fixed parameters.
    fn detect(&mut self, frame: &Frame, params: &InferenceParams) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, called once on the worker thread before the
    /// first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn inference_size(&self) -> Option<(u32, u32)> {
        (**self).inference_size()
    }

    fn detect(&mut self, frame: &Frame, params: &InferenceParams) -> Result<Vec<RawDetection>> {
        (**self).detect(frame, params)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
