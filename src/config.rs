//! Runtime configuration.
//!
//! Settings are layered: built-in defaults, then an optional JSON file named by
//! `EDGE_CONFIG`, then `EDGE_*` environment overrides, then validation. The
//! resulting structs are immutable and handed to each component at
//! construction; nothing reads process-wide tuning state afterwards.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::CaptureBackendKind;
use crate::model::ModelTier;

const DEFAULT_CLASS_NAMES: &str = "classes.toml";
const DEFAULT_MODEL_DIR: &str = "models";
const DEFAULT_MODEL_STEM: &str = "best";
const DEFAULT_DEVICE: &str = "0";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_BUFFER_DEPTH: u32 = 1;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_MAX_DETECTIONS: usize = 100;
const DEFAULT_INPUT_CAPACITY: usize = 3;
const DEFAULT_OUTPUT_CAPACITY: usize = 2;
const DEFAULT_POLL_MS: u64 = 50;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_EXPORT_COMMAND: &str = "trtexec";
const DEFAULT_EXPORT_TIMEOUT_SECS: u64 = 1_800;
const DEFAULT_STATS_INTERVAL_SECS: u64 = 5;

// ----------------------------------------------------------------------------
// Component settings
// ----------------------------------------------------------------------------

/// Fixed inference parameters passed to every detector call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InferenceParams {
    pub confidence_threshold: f32,
    /// Overlap-suppression threshold.
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU,
            max_detections: DEFAULT_MAX_DETECTIONS,
        }
    }
}

/// Frame pipeline sizing and timing.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Capacity of the capture → worker channel. Excess frames are dropped.
    pub input_capacity: usize,
    /// Capacity of the worker → main channel. The oldest batch is evicted.
    pub output_capacity: usize,
    /// How long the worker blocks waiting for a frame before re-checking for
    /// a stop request.
    pub poll_interval: Duration,
    /// Upper bound on how long `stop()` waits for the worker to exit.
    pub stop_timeout: Duration,
    pub params: InferenceParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_capacity: DEFAULT_INPUT_CAPACITY,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
            params: InferenceParams::default(),
        }
    }
}

/// Camera capture request.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Driver-side buffer depth. 1 keeps the source from queueing stale frames.
    pub buffer_depth: u32,
    /// Backend negotiation order.
    pub backends: Vec<CaptureBackendKind>,
    /// Use the CSI sensor source element for the GStreamer backend instead of
    /// `v4l2src`.
    pub csi: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            buffer_depth: DEFAULT_BUFFER_DEPTH,
            backends: vec![CaptureBackendKind::Gstreamer, CaptureBackendKind::V4l2],
            csi: true,
        }
    }
}

/// Model artifact resolution.
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// File stem shared by every tier (e.g. `best` → `best_int8.engine`).
    pub stem: String,
    pub tier_order: Vec<ModelTier>,
    /// Force accelerator availability instead of probing device nodes.
    pub accelerator: Option<bool>,
    /// Allow compiling a raw checkpoint into a faster tier.
    pub export: bool,
    pub export_command: String,
    pub export_timeout: Duration,
    /// Known default checkpoint: local path or, with `fetch-default`, a URL.
    pub default_checkpoint: Option<String>,
    /// Network input resolution (square) for checkpoint backends.
    pub model_input: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            stem: DEFAULT_MODEL_STEM.to_string(),
            tier_order: ModelTier::SPEED_ORDER.to_vec(),
            accelerator: None,
            export: true,
            export_command: DEFAULT_EXPORT_COMMAND.to_string(),
            export_timeout: Duration::from_secs(DEFAULT_EXPORT_TIMEOUT_SECS),
            default_checkpoint: None,
            model_input: DEFAULT_MODEL_INPUT,
        }
    }
}

// ----------------------------------------------------------------------------
// Config file
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct EdgeConfigFile {
    class_names: Option<PathBuf>,
    device: Option<String>,
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
    inference: Option<InferenceConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    dataset: Option<DatasetConfigFile>,
    stats_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    buffer_depth: Option<u32>,
    backends: Option<Vec<CaptureBackendKind>>,
    csi: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    dir: Option<PathBuf>,
    stem: Option<String>,
    tiers: Option<Vec<ModelTier>>,
    accelerator: Option<bool>,
    export: Option<bool>,
    export_command: Option<String>,
    export_timeout_secs: Option<u64>,
    default_checkpoint: Option<String>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    confidence: Option<f32>,
    iou: Option<f32>,
    max_detections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    input_capacity: Option<usize>,
    output_capacity: Option<usize>,
    poll_ms: Option<u64>,
    stop_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DatasetConfigFile {
    root: Option<PathBuf>,
    splits: Option<Vec<String>>,
}

/// Dataset pre-flight check settings.
#[derive(Debug, Clone)]
pub struct DatasetSettings {
    pub root: PathBuf,
    pub splits: Vec<String>,
}

/// Complete daemon configuration.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub class_names: PathBuf,
    pub model_dir: PathBuf,
    pub device: String,
    pub camera: CameraConfig,
    pub pipeline: PipelineConfig,
    pub resolver: ResolverConfig,
    pub dataset: Option<DatasetSettings>,
    pub stats_interval: Duration,
}

impl EdgeConfig {
    /// Load using the file named by `EDGE_CONFIG`, if set.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("EDGE_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EdgeConfigFile) -> Self {
        let camera_file = file.camera.unwrap_or_default();
        let model_file = file.model.unwrap_or_default();
        let inference_file = file.inference.unwrap_or_default();
        let pipeline_file = file.pipeline.unwrap_or_default();

        let camera_defaults = CameraConfig::default();
        let camera = CameraConfig {
            width: camera_file.width.unwrap_or(camera_defaults.width),
            height: camera_file.height.unwrap_or(camera_defaults.height),
            fps: camera_file.fps.unwrap_or(camera_defaults.fps),
            buffer_depth: camera_file
                .buffer_depth
                .unwrap_or(camera_defaults.buffer_depth),
            backends: camera_file.backends.unwrap_or(camera_defaults.backends),
            csi: camera_file.csi.unwrap_or(camera_defaults.csi),
        };

        let params = InferenceParams {
            confidence_threshold: inference_file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            iou_threshold: inference_file.iou.unwrap_or(DEFAULT_IOU),
            max_detections: inference_file
                .max_detections
                .unwrap_or(DEFAULT_MAX_DETECTIONS),
        };
        let pipeline = PipelineConfig {
            input_capacity: pipeline_file
                .input_capacity
                .unwrap_or(DEFAULT_INPUT_CAPACITY),
            output_capacity: pipeline_file
                .output_capacity
                .unwrap_or(DEFAULT_OUTPUT_CAPACITY),
            poll_interval: Duration::from_millis(pipeline_file.poll_ms.unwrap_or(DEFAULT_POLL_MS)),
            stop_timeout: Duration::from_millis(
                pipeline_file
                    .stop_timeout_ms
                    .unwrap_or(DEFAULT_STOP_TIMEOUT_MS),
            ),
            params,
        };

        let resolver_defaults = ResolverConfig::default();
        let resolver = ResolverConfig {
            stem: model_file.stem.unwrap_or(resolver_defaults.stem),
            tier_order: model_file.tiers.unwrap_or(resolver_defaults.tier_order),
            accelerator: model_file.accelerator,
            export: model_file.export.unwrap_or(resolver_defaults.export),
            export_command: model_file
                .export_command
                .unwrap_or(resolver_defaults.export_command),
            export_timeout: model_file
                .export_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(resolver_defaults.export_timeout),
            default_checkpoint: model_file.default_checkpoint,
            model_input: model_file.input_size.unwrap_or(DEFAULT_MODEL_INPUT),
        };

        let dataset = file.dataset.and_then(|dataset| {
            dataset.root.map(|root| DatasetSettings {
                root,
                splits: dataset.splits.unwrap_or_else(default_splits),
            })
        });

        Self {
            class_names: file
                .class_names
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLASS_NAMES)),
            model_dir: model_file
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR)),
            device: file.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            camera,
            pipeline,
            resolver,
            dataset,
            stats_interval: Duration::from_secs(
                file.stats_interval_secs
                    .unwrap_or(DEFAULT_STATS_INTERVAL_SECS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("EDGE_CLASS_NAMES") {
            if !path.trim().is_empty() {
                self.class_names = PathBuf::from(path);
            }
        }
        if let Ok(dir) = std::env::var("EDGE_MODEL_DIR") {
            if !dir.trim().is_empty() {
                self.model_dir = PathBuf::from(dir);
            }
        }
        if let Ok(device) = std::env::var("EDGE_DEVICE") {
            if !device.trim().is_empty() {
                self.device = device;
            }
        }
        if let Ok(backends) = std::env::var("EDGE_CAMERA_BACKENDS") {
            let parsed = split_csv(&backends)
                .iter()
                .map(|name| name.parse::<CaptureBackendKind>())
                .collect::<Result<Vec<_>>>()?;
            if !parsed.is_empty() {
                self.camera.backends = parsed;
            }
        }
        if let Ok(conf) = std::env::var("EDGE_CONFIDENCE") {
            self.pipeline.params.confidence_threshold = conf
                .parse()
                .map_err(|_| anyhow!("EDGE_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Ok(accel) = std::env::var("EDGE_ACCELERATOR") {
            self.resolver.accelerator = Some(parse_bool(&accel).ok_or_else(|| {
                anyhow!("EDGE_ACCELERATOR must be one of 1/0/true/false")
            })?);
        }
        if let Ok(root) = std::env::var("EDGE_DATASET_ROOT") {
            if !root.trim().is_empty() {
                let splits = self
                    .dataset
                    .take()
                    .map(|d| d.splits)
                    .unwrap_or_else(default_splits);
                self.dataset = Some(DatasetSettings {
                    root: PathBuf::from(root),
                    splits,
                });
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let params = &self.pipeline.params;
        if !(0.0..=1.0).contains(&params.confidence_threshold) {
            return Err(anyhow!("confidence threshold must be within 0..=1"));
        }
        if !(0.0..=1.0).contains(&params.iou_threshold) {
            return Err(anyhow!("iou threshold must be within 0..=1"));
        }
        if params.max_detections == 0 {
            return Err(anyhow!("max_detections must be greater than zero"));
        }
        if self.pipeline.input_capacity == 0 || self.pipeline.output_capacity == 0 {
            return Err(anyhow!("pipeline channel capacities must be greater than zero"));
        }
        if self.pipeline.poll_interval.is_zero() {
            return Err(anyhow!("pipeline poll interval must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if self.camera.buffer_depth == 0 {
            return Err(anyhow!("camera buffer depth must be at least 1"));
        }
        if self.camera.backends.is_empty() {
            return Err(anyhow!("at least one camera backend must be configured"));
        }
        if self.resolver.tier_order.is_empty() {
            return Err(anyhow!("at least one model tier must be configured"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<EdgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn default_splits() -> Vec<String> {
    ["train", "valid", "test"].map(String::from).to_vec()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
