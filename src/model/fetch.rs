//! Last-resort default checkpoint.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

/// Obtains a known default checkpoint and places it at `destination`.
pub trait DefaultFetcher {
    /// Short human description used in errors and logs.
    fn describe(&self) -> String;

    fn fetch(&self, destination: &Path) -> Result<()>;
}

/// No default checkpoint is available.
pub struct NoFetch;

impl DefaultFetcher for NoFetch {
    fn describe(&self) -> String {
        "none configured".to_string()
    }

    fn fetch(&self, _destination: &Path) -> Result<()> {
        Err(anyhow!("no default checkpoint configured"))
    }
}

/// Copies a checkpoint bundled with the installation.
pub struct BundledFetcher {
    source: PathBuf,
}

impl BundledFetcher {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl DefaultFetcher for BundledFetcher {
    fn describe(&self) -> String {
        format!("bundled {}", self.source.display())
    }

    fn fetch(&self, destination: &Path) -> Result<()> {
        if !self.source.is_file() {
            return Err(anyhow!(
                "bundled checkpoint {} does not exist",
                self.source.display()
            ));
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        std::fs::copy(&self.source, destination).with_context(|| {
            format!(
                "copy {} to {}",
                self.source.display(),
                destination.display()
            )
        })?;
        Ok(())
    }
}

/// Downloads the default checkpoint over HTTP(S).
#[cfg(feature = "fetch-default")]
pub struct HttpFetcher {
    url: String,
    timeout: std::time::Duration,
}

#[cfg(feature = "fetch-default")]
impl HttpFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: std::time::Duration::from_secs(120),
        }
    }
}

#[cfg(feature = "fetch-default")]
impl DefaultFetcher for HttpFetcher {
    fn describe(&self) -> String {
        format!("download {}", self.url)
    }

    fn fetch(&self, destination: &Path) -> Result<()> {
        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        let response = agent
            .get(&self.url)
            .call()
            .with_context(|| format!("GET {}", self.url))?;

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        // Write to a sibling temp name so a partial download never looks like
        // a valid checkpoint.
        let partial = destination.with_extension("partial");
        let mut file = std::fs::File::create(&partial)
            .with_context(|| format!("create {}", partial.display()))?;
        std::io::copy(&mut response.into_reader(), &mut file)
            .with_context(|| format!("download {}", self.url))?;
        std::fs::rename(&partial, destination)
            .with_context(|| format!("finalize {}", destination.display()))?;
        log::info!("downloaded default checkpoint to {}", destination.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_fetch_copies_into_place() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("bundled.onnx");
        std::fs::write(&source, b"onnx")?;
        let dest = dir.path().join("models").join("best.onnx");

        BundledFetcher::new(&source).fetch(&dest)?;
        assert_eq!(std::fs::read(&dest)?, b"onnx");
        Ok(())
    }

    #[test]
    fn bundled_fetch_fails_without_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = BundledFetcher::new(dir.path().join("missing.onnx"));
        assert!(fetcher.fetch(&dir.path().join("best.onnx")).is_err());
    }
}
