#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, RgbImage};
use tract_onnx::prelude::*;

use crate::config::InferenceParams;
use crate::detect::backend::Detector;
use crate::detect::postprocess::{decode_channel_major, non_max_suppression};
use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Tract-based backend for ONNX checkpoints.
///
/// Loads a YOLO-style model with a `[1, 3, H, W]` input and a
/// `[1, 4 + classes, anchors]` output. Frames are resized to the model input;
/// boxes are reported in model input coordinates.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
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
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = RgbImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let resized = if frame.width() != self.width || frame.height() != self.height {
            image::imageops::resize(&image, self.width, self.height, FilterType::Triangle)
        } else {
            image
        };

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn extract_detections(
        &self,
        outputs: TVec<TValue>,
        params: &InferenceParams,
    ) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let (channels, anchors) = (shape[1], shape[2]);
        let data: Vec<f32> = view.iter().copied().collect();
        let decoded = decode_channel_major(&data, channels - 4, anchors, params);
        Ok(non_max_suppression(decoded, params))
    }
}

impl Detector for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn inference_size(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }

    fn detect(&mut self, frame: &Frame, params: &InferenceParams) -> Result<Vec<RawDetection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_detections(outputs, params)
    }
}
