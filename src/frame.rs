//! Captured frames.
//!
//! A `Frame` is an immutable RGB8 pixel buffer plus its capture instant. It is
//! owned by exactly one stage at a time: the capture loop builds it, moves it
//! into the pipeline's input channel, and the worker drops it after inference.
//! The main loop keeps its own copy for the overlay through an explicit
//! `Clone`, so no buffer is ever shared between threads.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

/// Bytes per pixel for packed RGB8.
pub const RGB_CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Packed RGB8 frame with capture metadata.
///
/// Pixel data is private and read-only after construction. `Clone` performs a
/// deep copy.
#[derive(Clone)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    /// Monotonic capture instant.
    captured_at: Instant,
    /// Per-source capture counter, starting at 1.
    sequence: u64,
}

impl Frame {
    /// Build a frame from packed RGB8 bytes. The buffer length must be exactly
    /// `width * height * 3`.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = expected_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame {}x{} expects {} RGB bytes, received {}",
                width,
                height,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
            sequence,
        })
    }

    /// Solid-colour frame, mostly useful for tests and the synthetic source.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], sequence: u64) -> Result<Self> {
        let len = expected_len(width, height)?;
        let mut data = Vec::with_capacity(len);
        for _ in 0..len / RGB_CHANNELS {
            data.extend_from_slice(&rgb);
        }
        Self::new(data, width, height, sequence)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Time since capture.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Consume the frame and return its pixel buffer.
    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel payloads are never formatted.
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

fn expected_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions {}x{} overflow", width, height))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
