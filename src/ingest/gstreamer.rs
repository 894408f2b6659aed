//! Hardware-accelerated capture through a GStreamer pipeline.
//!
//! The pipeline is described declaratively and parsed with `parse_launch`.
//! The appsink keeps a single buffer and drops the oldest one, so the source
//! never queues stale frames.

use super::DeviceId;
use crate::config::CameraConfig;

/// Build the pipeline description for a device.
///
/// CSI sensors use `nvarguscamerasrc` with NVMM buffers; other devices use
/// `v4l2src` with hardware MJPEG decode. Both end in an RGB appsink.
pub fn pipeline_description(device: &DeviceId, config: &CameraConfig) -> String {
    let depth = config.buffer_depth.max(1);
    let caps = format!(
        "width={},height={},framerate={}/1",
        config.width, config.height, config.fps
    );
    let sink = format!(
        "nvvidconv ! video/x-raw,format=BGRx ! videoconvert ! video/x-raw,format=RGB ! \
         appsink name=appsink drop=true max-buffers={depth} sync=false"
    );

    match device {
        DeviceId::Index(sensor) if config.csi => format!(
            "nvarguscamerasrc sensor-id={sensor} ! \
             video/x-raw(memory:NVMM),{caps},format=NV12 ! {sink}"
        ),
        _ => format!(
            "v4l2src device={} io-mode=2 ! image/jpeg,{caps} ! \
             nvv4l2decoder mjpeg=1 ! {sink}",
            device.node_path()
        ),
    }
}

#[cfg(feature = "camera-gstreamer")]
pub(crate) use source::GstreamerSource;

#[cfg(feature = "camera-gstreamer")]
mod source {
    use anyhow::{Context, Result};
    use std::time::Instant;

    use super::pipeline_description;
    use crate::config::CameraConfig;
    use crate::frame::Frame;
    use crate::ingest::health::CaptureHealth;
    use crate::ingest::{CaptureStats, DeviceId};

    pub(crate) struct GstreamerSource {
        device: String,
        fps: u32,
        pipeline: gstreamer::Pipeline,
        appsink: gstreamer_app::AppSink,
        frame_count: u64,
        health: CaptureHealth,
        width: u32,
        height: u32,
    }

    impl GstreamerSource {
        pub(crate) fn open(device: &DeviceId, config: &CameraConfig) -> Result<Self> {
            gstreamer::init().context("initialize gstreamer")?;

            let description = pipeline_description(device, config);
            log::debug!("GstreamerSource: launching `{}`", description);
            let pipeline = gstreamer::parse::launch(&description)
                .context("build capture pipeline")?
                .downcast::<gstreamer::Pipeline>()
                .map_err(|_| anyhow::anyhow!("capture pipeline is not a Pipeline"))?;

            let appsink = pipeline
                .by_name("appsink")
                .context("appsink element missing from pipeline")?
                .downcast::<gstreamer_app::AppSink>()
                .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;
            appsink.set_max_buffers(config.buffer_depth.max(1));
            appsink.set_drop(true);
            appsink.set_sync(false);

            if let Err(err) = pipeline.set_state(gstreamer::State::Playing) {
                let _ = pipeline.set_state(gstreamer::State::Null);
                return Err(anyhow::Error::new(err).context("set capture pipeline to Playing"));
            }

            log::info!(
                "GstreamerSource: streaming {} ({}x{} @ {} fps)",
                device,
                config.width,
                config.height,
                config.fps
            );
            Ok(Self {
                device: device.to_string(),
                fps: config.fps,
                pipeline,
                appsink,
                frame_count: 0,
                health: CaptureHealth::new(config.fps),
                width: config.width,
                height: config.height,
            })
        }

        pub(crate) fn next_frame(&mut self) -> Result<Frame> {
            self.poll_bus();

            let sample = self
                .appsink
                .try_pull_sample(self.frame_timeout())
                .ok_or_else(|| anyhow::anyhow!("capture pipeline stalled"))?;

            let (pixels, width, height) = sample_to_pixels(&sample)?;
            self.frame_count += 1;
            self.health.record_frame(Instant::now());
            self.width = width;
            self.height = height;

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

        fn frame_timeout(&self) -> gstreamer::ClockTime {
            let base_ms = if self.fps == 0 {
                500
            } else {
                (1000 / self.fps).saturating_mul(4)
            };
            gstreamer::ClockTime::from_mseconds(base_ms.max(500) as u64)
        }


        fn poll_bus(&mut self) {
            let Some(bus) = self.pipeline.bus() else {
                return;
            };
            while let Some(message) = bus.pop() {
                use gstreamer::MessageView;
                match message.view() {
                    MessageView::Error(err) => {
                        let text = format!(
                            "gstreamer error from {:?}: {}",
                            err.src().map(|s| s.path_string()),
                            err.error()
                        );
                        log::error!("GstreamerSource: {}", text);
                        self.health.record_error(text);
                    }
                    MessageView::Eos(..) => {
                        self.health.record_error("gstreamer reached EOS");
                    }
                    _ => {}
                }
            }
        }
    }

    impl Drop for GstreamerSource {
        fn drop(&mut self) {
            let _ = self.pipeline.set_state(gstreamer::State::Null);
        }
    }

    fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
        let buffer = sample.buffer().context("sample missing buffer")?;
        let caps = sample.caps().context("sample missing caps")?;
        let info =
            gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;

        let width = info.width();
        let height = info.height();
        let row_bytes = (width as usize) * 3;
        let stride = info.stride()[0] as usize;

        let map = buffer.map_readable().context("map sample buffer")?;
        let data = map.as_slice();

        if stride == row_bytes {
            let len = row_bytes * height as usize;
            let frame = data.get(..len).context("sample buffer is truncated")?;
            return Ok((frame.to_vec(), width, height));
        }

        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            pixels.extend_from_slice(
                data.get(start..end)
                    .context("sample buffer row is out of bounds")?,
            );
        }
        Ok((pixels, width, height))
    }
}
