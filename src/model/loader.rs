use std::path::Path;
#[cfg(feature = "backend-tract")]
use std::time::Instant;

use anyhow::Result;

use crate::detect::{Detector, StubBackend};
use crate::model::ModelTier;

/// Turns an artifact file of a given tier into a ready detector.
pub trait ModelLoader {
    /// Whether this loader can open artifacts of `tier` at all. Tiers it
    /// cannot open are skipped by the resolver.
    fn supports(&self, tier: ModelTier) -> bool;

    fn load(&self, tier: ModelTier, path: &Path) -> Result<Box<dyn Detector>>;
}

/// Loader that produces synthetic detectors for any tier. Used for `stub://`
/// model directories.
pub struct StubLoader {
    num_classes: usize,
}

impl StubLoader {
    pub fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }
}

impl ModelLoader for StubLoader {
    fn supports(&self, _tier: ModelTier) -> bool {
        true
    }

    fn load(&self, tier: ModelTier, path: &Path) -> Result<Box<dyn Detector>> {
        log::info!("StubLoader: {} tier from {}", tier, path.display());
        Ok(Box::new(StubBackend::new(self.num_classes)))
    }
}

/// Loads ONNX checkpoints with tract. Compiled engines need a vendor runtime
/// and are reported as unsupported.
#[cfg(feature = "backend-tract")]
pub struct TractLoader {
    input_size: u32,
}

#[cfg(feature = "backend-tract")]
impl TractLoader {
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }
}

#[cfg(feature = "backend-tract")]
impl ModelLoader for TractLoader {
    fn supports(&self, tier: ModelTier) -> bool {
        tier == ModelTier::RawCheckpoint
    }

    fn load(&self, tier: ModelTier, path: &Path) -> Result<Box<dyn Detector>> {
        if !self.supports(tier) {
            anyhow::bail!("tract cannot load {} artifacts", tier);
        }
        let started = Instant::now();
        let backend = crate::detect::TractBackend::new(path, self.input_size, self.input_size)?;
        log::info!(
            "TractLoader: loaded {} in {:.2}s",
            path.display(),
            started.elapsed().as_secs_f64()
        );
        Ok(Box::new(backend))
    }
}
