//! Error taxonomy.
//!
//! Only conditions that leave the pipeline unable to start are fatal
//! (`ConfigurationError`, `CameraOpenError`, `ResolveError`). Per-frame
//! failures (`FrameProcessingError`) and optimization failures
//! (`ExportFailure`) are absorbed and logged at the stage boundary.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::ModelTier;

/// Missing or malformed configuration: class table, dataset layout, config file.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("{path} has no `names` entry")]
    MissingNames { path: PathBuf },

    #[error("class table in {path} is empty")]
    EmptyClassTable { path: PathBuf },

    #[error("dataset split '{split}' is missing {missing}")]
    MissingSplit { split: String, missing: PathBuf },

    #[error("dataset root {0} does not exist")]
    MissingDatasetRoot(PathBuf),

    #[error("dataset scan failed under {path}: {source}")]
    DatasetIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// One capture backend that refused to open.
#[derive(Debug, Clone)]
pub struct BackendAttempt {
    pub backend: &'static str,
    pub reason: String,
}

/// Every capture backend in the negotiation order failed.
#[derive(Debug, Error)]
#[error("failed to open camera {device}: {}", format_attempts(.attempts))]
pub struct CameraOpenError {
    pub device: String,
    pub attempts: Vec<BackendAttempt>,
}

fn format_attempts(attempts: &[BackendAttempt]) -> String {
    if attempts.is_empty() {
        return "no capture backends configured".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{} ({})", a.backend, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Model resolution failed after every tier and the default fetch.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no model artifact under {directory} (tried {tried:?}, default fetch: {fetch})")]
    ArtifactNotFound {
        directory: PathBuf,
        tried: Vec<ModelTier>,
        fetch: String,
    },
}

/// Compiling a checkpoint into a faster tier failed. Never fatal.
#[derive(Debug, Error)]
pub enum ExportFailure {
    #[error("exporter '{command}' could not be started: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("exporter exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("exporter timed out after {0:?}")]
    Timeout(Duration),

    #[error("exporter finished but {0} was not produced")]
    MissingOutput(PathBuf),

    #[error("tier {0:?} cannot be produced by export")]
    UnsupportedTier(ModelTier),
}

/// Failure while detecting on a single frame.
#[derive(Debug, Error)]
pub enum FrameProcessingError {
    #[error("frame {sequence}: detector failed: {message}")]
    Detector { sequence: u64, message: String },

    #[error("frame {sequence}: detector panicked: {message}")]
    Panicked { sequence: u64, message: String },
}

/// Misuse of the pipeline lifecycle.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline cannot start from state {0:?}")]
    InvalidState(crate::pipeline::PipelineState),

    #[error("failed to spawn inference worker: {0}")]
    Spawn(#[from] std::io::Error),
}
