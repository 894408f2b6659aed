//! Best-effort compilation of a checkpoint into a faster engine tier.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::ExportFailure;
use crate::model::ModelTier;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const STDERR_TAIL: usize = 2_000;

/// Compiles a raw checkpoint into a compiled tier.
pub trait Exporter {
    fn export(&self, checkpoint: &Path, tier: ModelTier, output: &Path)
        -> Result<(), ExportFailure>;
}

/// Exporter that never runs. Used when export is disabled.
pub struct NoExport;

impl Exporter for NoExport {
    fn export(
        &self,
        _checkpoint: &Path,
        tier: ModelTier,
        _output: &Path,
    ) -> Result<(), ExportFailure> {
        Err(ExportFailure::UnsupportedTier(tier))
    }
}

/// Runs a `trtexec`-compatible engine builder:
///
/// `<program> --onnx=<checkpoint> --saveEngine=<output> [--fp16 | --int8]`
#[derive(Debug, Clone)]
pub struct CommandExporter {
    program: String,
    extra_args: Vec<String>,
    timeout: Duration,
}

impl CommandExporter {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
            timeout,
        }
    }

    /// Add an argument appended after the generated ones.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Build the argument list for one export.
    pub fn build_args(
        &self,
        checkpoint: &Path,
        tier: ModelTier,
        output: &Path,
    ) -> Result<Vec<String>, ExportFailure> {
        let mut args = vec![
            format!("--onnx={}", checkpoint.display()),
            format!("--saveEngine={}", output.display()),
        ];
        match tier {
            ModelTier::Int8 => args.push("--int8".to_string()),
            ModelTier::Fp16 => args.push("--fp16".to_string()),
            ModelTier::Fp32Compiled => {}
            ModelTier::RawCheckpoint => return Err(ExportFailure::UnsupportedTier(tier)),
        }
        args.extend(self.extra_args.iter().cloned());
        Ok(args)
    }
}

impl Exporter for CommandExporter {
    fn export(
        &self,
        checkpoint: &Path,
        tier: ModelTier,
        output: &Path,
    ) -> Result<(), ExportFailure> {
        let args = self.build_args(checkpoint, tier, output)?;
        log::info!(
            "exporting {} to {} tier via {}",
            checkpoint.display(),
            tier,
            self.program
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExportFailure::Spawn {
                command: self.program.clone(),
                source,
            })?;

        // Drain stderr on a helper thread so a chatty builder cannot fill the pipe.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text);
                text
            })
        });
        let collect_stderr = |reader: Option<std::thread::JoinHandle<String>>| {
            reader
                .and_then(|handle| handle.join().ok())
                .map(|text| tail(&text, STDERR_TAIL))
                .unwrap_or_default()
        };

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = std::fs::remove_file(output);
                    return Err(ExportFailure::Timeout(self.timeout));
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    return Err(ExportFailure::Spawn {
                        command: self.program.clone(),
                        source,
                    })
                }
            }
        };

        let stderr = collect_stderr(stderr_reader);
        if !status.success() {
            let _ = std::fs::remove_file(output);
            return Err(ExportFailure::Failed {
                status: status.to_string(),
                stderr,
            });
        }
        if !output.is_file() {
            return Err(ExportFailure::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }
}

fn tail(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - max;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}
