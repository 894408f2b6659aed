//! Camera capture.
//!
//! `CameraSource::open` negotiates a capture backend by walking an ordered
//! list of strategies:
//! - GStreamer: hardware-accelerated pipeline (feature: camera-gstreamer)
//! - V4L2: generic capture device (feature: ingest-v4l2)
//! - Test pattern: synthetic frames, always available
//!
//! The first backend that opens wins. Opening fails only when every backend in
//! the list fails, and the error lists each attempt.
//!
//! Every backend keeps at most `buffer_depth` frames (1 by default) on the
//! driver side. Staleness is handled by the pipeline's bounded channel, not
//! by the camera.

pub mod gstreamer;
mod health;
pub mod normalize;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::config::CameraConfig;
use crate::error::{BackendAttempt, CameraOpenError};
use crate::frame::Frame;
use synthetic::TestPatternSource;

const STUB_PREFIX: &str = "stub://";

// ----------------------------------------------------------------------------
// Device identifiers
// ----------------------------------------------------------------------------

/// Logical camera identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceId {
    /// Sensor / device index (`0` → CSI sensor 0 or `/dev/video0`).
    Index(u32),
    /// Explicit device node.
    Path(String),
    /// `stub://<name>` test-pattern device.
    Synthetic(String),
}

impl DeviceId {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(name) = raw.strip_prefix(STUB_PREFIX) {
            return DeviceId::Synthetic(name.to_string());
        }
        if let Ok(index) = raw.parse::<u32>() {
            return DeviceId::Index(index);
        }
        if let Some(index) = raw
            .strip_prefix("/dev/video")
            .and_then(|suffix| suffix.parse::<u32>().ok())
        {
            return DeviceId::Index(index);
        }
        DeviceId::Path(raw.to_string())
    }

    /// Device node for V4L2-style access.
    pub fn node_path(&self) -> String {
        match self {
            DeviceId::Index(index) => format!("/dev/video{}", index),
            DeviceId::Path(path) => path.clone(),
            DeviceId::Synthetic(name) => format!("{}{}", STUB_PREFIX, name),
        }
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceId::Index(index) => write!(f, "camera {}", index),
            DeviceId::Path(path) => f.write_str(path),
            DeviceId::Synthetic(name) => write!(f, "{}{}", STUB_PREFIX, name),
        }
    }
}

// ----------------------------------------------------------------------------
// Backend strategies
// ----------------------------------------------------------------------------

/// Capture backend, in negotiation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureBackendKind {
    Gstreamer,
    V4l2,
    TestPattern,
}

impl CaptureBackendKind {
    pub fn name(self) -> &'static str {
        match self {
            CaptureBackendKind::Gstreamer => "gstreamer",
            CaptureBackendKind::V4l2 => "v4l2",
            CaptureBackendKind::TestPattern => "test_pattern",
        }
    }

    fn open(self, device: &DeviceId, config: &CameraConfig) -> Result<CaptureBackend> {
        match self {
            CaptureBackendKind::Gstreamer => open_gstreamer(device, config),
            CaptureBackendKind::V4l2 => open_v4l2(device, config),
            CaptureBackendKind::TestPattern => {
                let name = match device {
                    DeviceId::Synthetic(name) => name.clone(),
                    other => other.to_string(),
                };
                Ok(CaptureBackend::TestPattern(TestPatternSource::new(
                    &name, config,
                )))
            }
        }
    }
}

impl std::str::FromStr for CaptureBackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gstreamer" | "gst" => Ok(CaptureBackendKind::Gstreamer),
            "v4l2" => Ok(CaptureBackendKind::V4l2),
            "test_pattern" | "test-pattern" => Ok(CaptureBackendKind::TestPattern),
            other => Err(anyhow!("unknown capture backend '{}'", other)),
        }
    }
}

#[cfg(feature = "camera-gstreamer")]
fn open_gstreamer(device: &DeviceId, config: &CameraConfig) -> Result<CaptureBackend> {
    if matches!(device, DeviceId::Synthetic(_)) {
        return Err(anyhow!("synthetic devices have no GStreamer pipeline"));
    }
    Ok(CaptureBackend::Gstreamer(
        gstreamer::GstreamerSource::open(device, config)?,
    ))
}

#[cfg(not(feature = "camera-gstreamer"))]
fn open_gstreamer(_device: &DeviceId, _config: &CameraConfig) -> Result<CaptureBackend> {
    Err(anyhow!("built without the camera-gstreamer feature"))
}

#[cfg(feature = "ingest-v4l2")]
fn open_v4l2(device: &DeviceId, config: &CameraConfig) -> Result<CaptureBackend> {
    if matches!(device, DeviceId::Synthetic(_)) {
        return Err(anyhow!("synthetic devices have no device node"));
    }
    Ok(CaptureBackend::V4l2(v4l2::V4l2Source::open(device, config)?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_v4l2(_device: &DeviceId, _config: &CameraConfig) -> Result<CaptureBackend> {
    Err(anyhow!("built without the ingest-v4l2 feature"))
}

// ----------------------------------------------------------------------------
// CameraSource
// ----------------------------------------------------------------------------

/// Capture statistics.
#[derive(Clone, Debug)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub device: String,
    pub width: u32,
    pub height: u32,
}

enum CaptureBackend {
    TestPattern(TestPatternSource),
    #[cfg(feature = "camera-gstreamer")]
    Gstreamer(gstreamer::GstreamerSource),
    #[cfg(feature = "ingest-v4l2")]
    V4l2(v4l2::V4l2Source),
}

/// An opened camera.
pub struct CameraSource {
    kind: CaptureBackendKind,
    backend: CaptureBackend,
}

impl CameraSource {
    /// Open `device` using the configured backend order. `stub://` devices
    /// always use the test pattern.
    pub fn open(device: &str, config: &CameraConfig) -> Result<Self, CameraOpenError> {
        let device_id = DeviceId::parse(device);
        let order: &[CaptureBackendKind] = match device_id {
            DeviceId::Synthetic(_) => &[CaptureBackendKind::TestPattern],
            _ => &config.backends,
        };
        Self::negotiate(&device_id, config, order)
    }

    /// Try each backend in `order`; return the first that opens.
    pub fn negotiate(
        device: &DeviceId,
        config: &CameraConfig,
        order: &[CaptureBackendKind],
    ) -> Result<Self, CameraOpenError> {
        let mut attempts = Vec::with_capacity(order.len());
        for &kind in order {
            match kind.open(device, config) {
                Ok(backend) => {
                    if !attempts.is_empty() {
                        log::info!(
                            "CameraSource: {} opened with {} after {} failed attempt(s)",
                            device,
                            kind.name(),
                            attempts.len()
                        );
                    }
                    return Ok(Self { kind, backend });
                }
                Err(err) => {
                    log::warn!(
                        "CameraSource: {} backend failed for {}: {:#}",
                        kind.name(),
                        device,
                        err
                    );
                    attempts.push(BackendAttempt {
                        backend: kind.name(),
                        reason: format!("{:#}", err),
                    });
                }
            }
        }
        Err(CameraOpenError {
            device: device.to_string(),
            attempts,
        })
    }

    /// Backend that won negotiation.
    pub fn backend_kind(&self) -> CaptureBackendKind {
        self.kind
    }

    pub fn backend_name(&self) -> &'static str {
        self.kind.name()
    }

    /// Read the next frame. Blocks for at most a few frame intervals.
    pub fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CaptureBackend::TestPattern(source) => source.next_frame(),
            #[cfg(feature = "camera-gstreamer")]
            CaptureBackend::Gstreamer(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CaptureBackend::V4l2(source) => source.next_frame(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            CaptureBackend::TestPattern(source) => source.is_healthy(),
            #[cfg(feature = "camera-gstreamer")]
            CaptureBackend::Gstreamer(source) => source.is_healthy(),
            #[cfg(feature = "ingest-v4l2")]
            CaptureBackend::V4l2(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> CaptureStats {
        match &self.backend {
            CaptureBackend::TestPattern(source) => source.stats(),
            #[cfg(feature = "camera-gstreamer")]
            CaptureBackend::Gstreamer(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            CaptureBackend::V4l2(source) => source.stats(),
        }
    }
}

impl std::fmt::Debug for CameraSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("CameraSource")
            .field("backend", &self.backend_name())
            .field("device", &stats.device)
            .field("frames_captured", &stats.frames_captured)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> CameraConfig {
        CameraConfig {
            width: 32,
            height: 24,
            fps: 0,
            ..CameraConfig::default()
        }
    }

    #[test]
    fn parses_device_identifiers() {
        assert_eq!(DeviceId::parse("0"), DeviceId::Index(0));
        assert_eq!(DeviceId::parse("/dev/video2"), DeviceId::Index(2));
        assert_eq!(
            DeviceId::parse("/dev/v4l/by-id/usb-cam"),
            DeviceId::Path("/dev/v4l/by-id/usb-cam".into())
        );
        assert_eq!(
            DeviceId::parse("stub://front"),
            DeviceId::Synthetic("front".into())
        );
    }

    #[test]
    fn stub_device_produces_frames() -> Result<()> {
        let mut source = CameraSource::open("stub://test", &small_config())?;
        assert_eq!(source.backend_kind(), CaptureBackendKind::TestPattern);

        let first = source.next_frame()?;
        let second = source.next_frame()?;
        assert_eq!((first.width(), first.height()), (32, 24));
        assert_eq!(second.sequence(), first.sequence() + 1);
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[cfg(not(any(feature = "camera-gstreamer", feature = "ingest-v4l2")))]
    #[test]
    fn fails_only_after_every_backend_fails() {
        let err = CameraSource::open("0", &small_config()).unwrap_err();
        let tried: Vec<&str> = err.attempts.iter().map(|a| a.backend).collect();
        assert_eq!(tried, vec!["gstreamer", "v4l2"]);
        assert!(err.to_string().contains("gstreamer"));
    }

    #[cfg(not(feature = "camera-gstreamer"))]
    #[test]
    fn falls_back_to_next_backend() -> Result<()> {
        let order = [CaptureBackendKind::Gstreamer, CaptureBackendKind::TestPattern];
        let source = CameraSource::negotiate(&DeviceId::Index(0), &small_config(), &order)?;
        assert_eq!(source.backend_kind(), CaptureBackendKind::TestPattern);
        Ok(())
    }

    #[test]
    fn empty_backend_list_fails() {
        let err = CameraSource::negotiate(&DeviceId::Index(0), &small_config(), &[]).unwrap_err();
        assert!(err.attempts.is_empty());
        assert!(err.to_string().contains("no capture backends configured"));
    }

    #[test]
    fn debug_output_names_the_backend() -> Result<()> {
        let camera = CameraSource::open("stub://debug", &small_config())?;
        let text = format!("{:?}", camera);
        assert!(text.contains("CameraSource"));
        assert!(text.contains(camera.backend_name()));
        Ok(())
    }

    #[test]
    fn backend_names_parse() -> Result<()> {
        assert_eq!("GST".parse::<CaptureBackendKind>()?, CaptureBackendKind::Gstreamer);
        assert_eq!("v4l2".parse::<CaptureBackendKind>()?, CaptureBackendKind::V4l2);
        assert!("opencv".parse::<CaptureBackendKind>().is_err());
        Ok(())
    }
}
