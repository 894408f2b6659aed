//! Model artifact tiers and resolution.
//!
//! An artifact directory holds the same detector in several compiled forms,
//! ordered by expected inference speed. `ModelResolver` walks that order and
//! loads the first form it finds.

mod export;
mod fetch;
mod loader;
mod resolver;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::detect::Detector;

pub use export::{CommandExporter, Exporter, NoExport};
#[cfg(feature = "fetch-default")]
pub use fetch::HttpFetcher;
pub use fetch::{BundledFetcher, DefaultFetcher, NoFetch};
#[cfg(feature = "backend-tract")]
pub use loader::TractLoader;
pub use loader::{ModelLoader, StubLoader};
pub use resolver::{accelerator_available, ModelResolver};

/// Precision/compilation level of a detector artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Quantized-integer compiled engine.
    Int8,
    /// Half-precision compiled engine.
    Fp16,
    /// Full-precision compiled engine.
    Fp32Compiled,
    /// Portable checkpoint (ONNX).
    RawCheckpoint,
}

impl ModelTier {
    /// Fastest first.
    pub const SPEED_ORDER: [ModelTier; 4] = [
        ModelTier::Int8,
        ModelTier::Fp16,
        ModelTier::Fp32Compiled,
        ModelTier::RawCheckpoint,
    ];

    /// File name of this tier for a given stem.
    pub fn file_name(self, stem: &str) -> String {
        match self {
            ModelTier::Int8 => format!("{stem}_int8.engine"),
            ModelTier::Fp16 => format!("{stem}_fp16.engine"),
            ModelTier::Fp32Compiled => format!("{stem}.engine"),
            ModelTier::RawCheckpoint => format!("{stem}.onnx"),
        }
    }

    pub fn path_in(self, dir: &Path, stem: &str) -> PathBuf {
        dir.join(self.file_name(stem))
    }

    pub fn is_compiled(self) -> bool {
        !matches!(self, ModelTier::RawCheckpoint)
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelTier::Int8 => "int8",
            ModelTier::Fp16 => "fp16",
            ModelTier::Fp32Compiled => "fp32",
            ModelTier::RawCheckpoint => "checkpoint",
        };
        f.write_str(name)
    }
}

/// The single detector selected for a pipeline's lifetime.
pub struct ModelArtifact {
    pub tier: ModelTier,
    pub path: PathBuf,
    handle: Box<dyn Detector>,
}

impl ModelArtifact {
    pub fn new(tier: ModelTier, path: PathBuf, handle: Box<dyn Detector>) -> Self {
        Self { tier, path, handle }
    }

    pub fn detector_name(&self) -> &'static str {
        self.handle.name()
    }

    /// Hand the loaded detector over to the pipeline.
    pub fn into_detector(self) -> Box<dyn Detector> {
        self.handle
    }
}

impl std::fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("tier", &self.tier)
            .field("path", &self.path)
            .field("detector", &self.handle.name())
            .finish()
    }
}
