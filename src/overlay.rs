//! Detection overlay and render surfaces.
//!
//! The overlay pairs the latest [`DetectionBatch`] with the current frame.
//! Boxes are produced at the detector's inference resolution, so they are
//! rescaled to the frame before drawing. Presenting the result is delegated
//! to a [`RenderSurface`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};

use crate::detect::{BoundingBox, Detection, DetectionBatch};
use crate::frame::Frame;

const PALETTE: [[u8; 3]; 8] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
];

/// One box as drawn, in frame pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawnLabel {
    pub rect: [u32; 4],
    pub text: String,
}

/// A frame with detections burned in.
pub struct AnnotatedFrame {
    pub image: RgbImage,
    pub labels: Vec<DrawnLabel>,
    pub frame_sequence: u64,
    /// Sequence of the frame the detections were computed on; may lag.
    pub detection_sequence: Option<u64>,
}

#[derive(Clone, Copy, Debug)]
pub struct DetectionOverlay {
    thickness: u32,
}

impl Default for DetectionOverlay {
    fn default() -> Self {
        Self { thickness: 2 }
    }
}

impl DetectionOverlay {
    pub fn new(thickness: u32) -> Self {
        Self {
            thickness: thickness.max(1),
        }
    }

    /// Draw `batch` (if any) onto a copy of `frame`.
    pub fn annotate(&self, frame: Frame, batch: Option<&DetectionBatch>) -> Result<AnnotatedFrame> {
        let (width, height, sequence) = (frame.width(), frame.height(), frame.sequence());
        let mut image = RgbImage::from_raw(width, height, frame.into_pixels())
            .context("frame buffer does not match its dimensions")?;

        let mut labels = Vec::new();
        if let Some(batch) = batch {
            let (iw, ih) = batch.inference_size;
            let sx = if iw == 0 { 1.0 } else { width as f32 / iw as f32 };
            let sy = if ih == 0 { 1.0 } else { height as f32 / ih as f32 };
            for det in &batch.detections {
                let Some(rect) = clamp_box(&det.bbox.scaled(sx, sy), (width, height)) else {
                    continue;
                };
                draw_rect(&mut image, rect, class_color(det.class_index), self.thickness);
                labels.push(DrawnLabel {
                    rect,
                    text: label_text(det),
                });
            }
        }

        Ok(AnnotatedFrame {
            image,
            labels,
            frame_sequence: sequence,
            detection_sequence: batch.map(|b| b.frame_sequence),
        })
    }
}

fn label_text(det: &Detection) -> String {
    format!("{} {:.2}", det.class_label, det.confidence)
}

fn class_color(class_index: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_index % PALETTE.len()])
}

/// Clamp a pixel-space box to image bounds. Degenerate boxes yield `None`.
fn clamp_box(bbox: &BoundingBox, dims: (u32, u32)) -> Option<[u32; 4]> {
    let (w, h) = dims;
    if w == 0 || h == 0 {
        return None;
    }
    let clamp = |v: f32, max: u32| -> u32 { v.max(0.0).min((max - 1) as f32) as u32 };
    let x0 = clamp(bbox.x1, w);
    let y0 = clamp(bbox.y1, h);
    let x1 = clamp(bbox.x2, w);
    let y1 = clamp(bbox.y2, h);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    Some([x0, y0, x1, y1])
}

fn draw_rect(img: &mut RgbImage, rect: [u32; 4], color: Rgb<u8>, thickness: u32) {
    let [x0, y0, x1, y1] = rect;
    for t in 0..thickness {
        let (xx0, yy0) = (x0.saturating_add(t), y0.saturating_add(t));
        let (xx1, yy1) = (x1.saturating_sub(t), y1.saturating_sub(t));
        if xx0 > xx1 || yy0 > yy1 {
            break;
        }
        for x in xx0..=xx1 {
            img.put_pixel(x, yy0, color);
            img.put_pixel(x, yy1, color);
        }
        for y in yy0..=yy1 {
            img.put_pixel(xx0, y, color);
            img.put_pixel(xx1, y, color);
        }
    }
}

// ----------------------------------------------------------------------------
// Render surfaces
// ----------------------------------------------------------------------------

/// Destination for annotated frames.
pub trait RenderSurface {
    fn present(&mut self, frame: &AnnotatedFrame) -> Result<()>;
}

/// Discards frames; counts them.
#[derive(Debug, Default)]
pub struct NullSurface {
    presented: u64,
}

impl NullSurface {
    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl RenderSurface for NullSurface {
    fn present(&mut self, _frame: &AnnotatedFrame) -> Result<()> {
        self.presented += 1;
        Ok(())
    }
}

/// Writes every `every`-th frame as a JPEG into a directory.
pub struct SnapshotSurface {
    dir: PathBuf,
    every: u64,
    seen: u64,
    written: u64,
}

impl SnapshotSurface {
    pub fn new(dir: impl AsRef<Path>, every: u64) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create snapshot directory {}", dir.display()))?;
        Ok(Self {
            dir,
            every: every.max(1),
            seen: 0,
            written: 0,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl RenderSurface for SnapshotSurface {
    fn present(&mut self, frame: &AnnotatedFrame) -> Result<()> {
        self.seen += 1;
        if (self.seen - 1) % self.every != 0 {
            return Ok(());
        }
        let path = self
            .dir
            .join(format!("frame_{:08}.jpg", frame.frame_sequence));
        frame
            .image
            .save_with_format(&path, image::ImageFormat::Jpeg)
            .with_context(|| format!("write snapshot {}", path.display()))?;
        self.written += 1;
        log::debug!(
            "SnapshotSurface: wrote {} ({} label(s))",
            path.display(),
            frame.labels.len()
        );
        Ok(())
    }
}
