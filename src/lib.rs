//! Edge Detect
//!
//! Real-time object detection on a live camera stream, sized for embedded
//! accelerator boards.
//!
//! # Architecture
//!
//! ```text
//! CameraSource → FramePipeline::submit_frame → [bounded input] → worker
//!   → Detector → [bounded output] → try_take_latest_detections
//!   → DetectionOverlay → RenderSurface
//! ```
//!
//! The pipeline favours freshness over completeness:
//!
//! 1. **Never block the camera**: a full input channel drops the new frame.
//! 2. **Latest wins**: a full output channel evicts its oldest batch.
//! 3. **Bad frames are local**: detector errors and panics are logged by the
//!    worker, which moves on to the next frame.
//! 4. **Bounded shutdown**: `stop()` waits at most `stop_timeout`.
//!
//! # Module Structure
//!
//! - `config`: immutable settings (`EDGE_CONFIG` file + `EDGE_*` overrides)
//! - `ingest`: camera backend negotiation (GStreamer, V4L2, test pattern)
//! - `model`: artifact tiers, resolution cascade, export and default fetch
//! - `detect`: detector trait, backends, class table, post-processing
//! - `pipeline`: the bounded producer/consumer engine
//! - `monitor`: rolling throughput
//! - `overlay`: annotation and render surfaces
//! - `dataset`: dataset pre-flight validation

pub mod config;
pub mod dataset;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod model;
pub mod monitor;
pub mod overlay;
pub mod pipeline;
pub mod ui;

pub use config::{
    CameraConfig, DatasetSettings, EdgeConfig, InferenceParams, PipelineConfig, ResolverConfig,
};
pub use dataset::{DatasetReport, SplitReport};
pub use detect::{
    BoundingBox, ClassNameTable, Detection, DetectionBatch, Detector, RawDetection, StubBackend,
};
pub use error::{
    CameraOpenError, ConfigurationError, ExportFailure, FrameProcessingError, PipelineError,
    ResolveError,
};
pub use frame::Frame;
pub use ingest::{CameraSource, CaptureBackendKind, CaptureStats, DeviceId};
pub use model::{ModelArtifact, ModelResolver, ModelTier};
pub use monitor::PerformanceMonitor;
pub use overlay::{AnnotatedFrame, DetectionOverlay, NullSurface, RenderSurface, SnapshotSurface};
pub use pipeline::{FramePipeline, PipelineState, PipelineStats};
