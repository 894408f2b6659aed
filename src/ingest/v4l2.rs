//! Generic V4L2 capture device.
//!
//! Used when the accelerated pipeline cannot be opened. Resolution, frame rate
//! and buffer depth are set explicitly on the device; the driver-side queue is
//! kept at `buffer_depth` buffers (1 by default) so captures are never stale.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::Instant;

use super::health::CaptureHealth;
use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CaptureStats, DeviceId};
use crate::config::CameraConfig;
use crate::frame::Frame;

pub(crate) struct V4l2Source {
    device: String,
    state: V4l2State,
    format: PixelFormat,
    frame_count: u64,
    health: CaptureHealth,
    width: u32,
    height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub(crate) fn open(device_id: &DeviceId, config: &CameraConfig) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let path = device_id.node_path();
        let mut device =
            v4l::Device::with_path(&path).with_context(|| format!("open v4l2 device {}", path))?;

        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = match &format.fourcc.repr {
            b"RGB3" => PixelFormat::Rgb24,
            b"YUYV" => PixelFormat::Yuyv,
            b"NV12" => PixelFormat::Nv12,
            other => {
                return Err(anyhow!(
                    "v4l2 device {} negotiated unsupported format {}",
                    path,
                    String::from_utf8_lossy(other)
                ))
            }
        };

        if config.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", path, err);
            }
        }

        let depth = config.buffer_depth.max(1);
        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, depth)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Source: opened {} ({}x{} {:?}, {} buffer(s))",
            path,
            format.width,
            format.height,
            pixel_format,
            depth
        );
        Ok(Self {
            device: path,
            state,
            format: pixel_format,
            frame_count: 0,
            health: CaptureHealth::new(config.fps),
            width: format.width,
            height: format.height,
        })
    }

    pub(crate) fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.width, self.height, self.format);
        let converted = self.state.with_mut(|fields| {
            let (buf, _meta) = fields.stream.next()?;
            Ok::<_, std::io::Error>(normalize_to_rgb(buf, width, height, format))
        });
        let pixels = match converted {
            Ok(pixels) => pixels?,
            Err(err) => {
                self.health.record_error(err.to_string());
                return Err(anyhow::Error::new(err).context("capture v4l2 frame"));
            }
        };

        self.frame_count += 1;
        self.health.record_frame(Instant::now());
        Frame::new(pixels, width, height, self.frame_count)
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    pub(crate) fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frame_count,
            device: self.device.clone(),
            width: self.width,
            height: self.height,
        }
    }
}
