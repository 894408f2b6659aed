use std::path::{Path, PathBuf};

use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::model::export::{Exporter, NoExport};
use crate::model::fetch::{DefaultFetcher, NoFetch};
use crate::model::loader::ModelLoader;
use crate::model::{ModelArtifact, ModelTier};

/// Device nodes whose presence indicates a usable GPU/accelerator.
const ACCELERATOR_NODES: &[&str] = &["/dev/nvhost-ctrl-gpu", "/dev/nvidia0", "/dev/nvgpu"];

/// Probe for an accelerator by looking for its device nodes.
pub fn accelerator_available() -> bool {
    ACCELERATOR_NODES
        .iter()
        .any(|node| Path::new(node).exists())
}

/// Selects and loads the fastest available model artifact.
///
/// The cascade is a loop over the tier preference order: each tier is probed
/// on disk and the first one present is loaded, without inspecting lower
/// tiers. A raw checkpoint may first be compiled into a faster tier when an
/// accelerator is present; a failed export falls back to the checkpoint. With
/// no tier file on disk at all, the default fetcher supplies a checkpoint
/// under its own name (`<stem>.default.onnx`), never over an existing file.
pub struct ModelResolver {
    stem: String,
    accelerator: bool,
    loader: Box<dyn ModelLoader>,
    exporter: Box<dyn Exporter>,
    export_configured: bool,
    fetcher: Box<dyn DefaultFetcher>,
}

enum Probe {
    Loaded(ModelArtifact),
    Exported,
    Exhausted,
}

impl ModelResolver {
    /// Resolver with export and default fetch disabled.
    pub fn new(config: &ResolverConfig, loader: Box<dyn ModelLoader>) -> Self {
        Self {
            stem: config.stem.clone(),
            accelerator: config.accelerator.unwrap_or_else(accelerator_available),
            loader,
            exporter: Box::new(NoExport),
            export_configured: false,
            fetcher: Box::new(NoFetch),
        }
    }

    pub fn with_exporter(mut self, exporter: Box<dyn Exporter>) -> Self {
        self.exporter = exporter;
        self.export_configured = true;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Box<dyn DefaultFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_accelerator(mut self, available: bool) -> Self {
        self.accelerator = available;
        self
    }

    pub fn resolve(
        &self,
        artifact_dir: &Path,
        tier_order: &[ModelTier],
    ) -> Result<ModelArtifact, ResolveError> {
        let order: Vec<ModelTier> = tier_order
            .iter()
            .copied()
            .filter(|tier| {
                let supported = self.loader.supports(*tier);
                if !supported {
                    log::debug!("resolver: loader cannot open {} artifacts, skipping", tier);
                }
                supported
            })
            .collect();

        let mut export_attempted = false;
        if self.export_configured && self.accelerator && !order.iter().any(|t| t.is_compiled()) {
            log::info!("resolver: export skipped, loader opens no compiled tier");
            export_attempted = true;
        }
        loop {
            match self.probe_tiers(artifact_dir, &order, &mut export_attempted) {
                Probe::Loaded(artifact) => return Ok(artifact),
                // A faster tier now exists on disk; scan again from the top.
                Probe::Exported => continue,
                Probe::Exhausted => break,
            }
        }

        let present: Vec<PathBuf> = tier_order
            .iter()
            .map(|tier| tier.path_in(artifact_dir, &self.stem))
            .filter(|path| path.is_file())
            .collect();
        if !present.is_empty() {
            return Err(ResolveError::ArtifactNotFound {
                directory: PathBuf::from(artifact_dir),
                tried: tier_order.to_vec(),
                fetch: format!("skipped: {} artifact(s) present but none loaded", present.len()),
            });
        }

        self.fetch_default(artifact_dir, tier_order, &order)
    }

    /// Location of the fetched default checkpoint.
    pub fn default_checkpoint_path(&self, artifact_dir: &Path) -> PathBuf {
        artifact_dir.join(format!("{}.default.onnx", self.stem))
    }

    fn probe_tiers(
        &self,
        artifact_dir: &Path,
        order: &[ModelTier],
        export_attempted: &mut bool,
    ) -> Probe {
        for &tier in order {
            let path = tier.path_in(artifact_dir, &self.stem);
            if !path.is_file() {
                continue;
            }

            if tier == ModelTier::RawCheckpoint && !*export_attempted {
                *export_attempted = true;
                if self.try_export(&path, artifact_dir, order) {
                    return Probe::Exported;
                }
            }

            match self.loader.load(tier, &path) {
                Ok(handle) => {
                    log::info!("resolver: using {} tier {}", tier, path.display());
                    return Probe::Loaded(ModelArtifact::new(tier, path, handle));
                }
                Err(err) => {
                    log::warn!(
                        "resolver: failed to load {} tier {}: {:#}",
                        tier,
                        path.display(),
                        err
                    );
                }
            }
        }
        Probe::Exhausted
    }

    /// Compile the checkpoint into the fastest preferred compiled tier.
    /// Returns true when a new artifact was produced.
    fn try_export(&self, checkpoint: &Path, artifact_dir: &Path, order: &[ModelTier]) -> bool {
        if !self.accelerator {
            return false;
        }
        let Some(target) = order.iter().copied().find(|tier| tier.is_compiled()) else {
            return false;
        };
        let output = target.path_in(artifact_dir, &self.stem);
        match self.exporter.export(checkpoint, target, &output) {
            Ok(()) => {
                log::info!("resolver: exported {} tier to {}", target, output.display());
                true
            }
            Err(err) => {
                log::warn!(
                    "resolver: export to {} tier failed, using checkpoint: {}",
                    target,
                    err
                );
                false
            }
        }
    }

    fn fetch_default(
        &self,
        artifact_dir: &Path,
        requested: &[ModelTier],
        order: &[ModelTier],
    ) -> Result<ModelArtifact, ResolveError> {
        let not_found = |fetch: String| ResolveError::ArtifactNotFound {
            directory: PathBuf::from(artifact_dir),
            tried: requested.to_vec(),
            fetch,
        };

        if !order.contains(&ModelTier::RawCheckpoint) {
            return Err(not_found("skipped: checkpoint tier not allowed".to_string()));
        }

        let destination = self.default_checkpoint_path(artifact_dir);
        if destination.is_file() {
            log::info!(
                "resolver: reusing previously fetched default checkpoint {}",
                destination.display()
            );
        } else {
            log::warn!(
                "resolver: no artifact in {}, fetching default checkpoint ({})",
                artifact_dir.display(),
                self.fetcher.describe()
            );
            self.fetcher
                .fetch(&destination)
                .map_err(|err| not_found(format!("{}: {:#}", self.fetcher.describe(), err)))?;
        }

        let handle = self
            .loader
            .load(ModelTier::RawCheckpoint, &destination)
            .map_err(|err| not_found(format!("fetched checkpoint failed to load: {:#}", err)))?;
        log::info!("resolver: using default checkpoint {}", destination.display());
        Ok(ModelArtifact::new(
            ModelTier::RawCheckpoint,
            destination,
            handle,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detector, StubBackend};
    use crate::error::ExportFailure;
    use anyhow::{anyhow, Result};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorded {
        loaded: Vec<PathBuf>,
        exports: Vec<ModelTier>,
    }

    struct RecordingLoader {
        log: Rc<RefCell<Recorded>>,
        failing: Vec<ModelTier>,
    }

    impl ModelLoader for RecordingLoader {
        fn supports(&self, _tier: ModelTier) -> bool {
            true
        }

        fn load(&self, tier: ModelTier, path: &Path) -> Result<Box<dyn Detector>> {
            self.log.borrow_mut().loaded.push(path.to_path_buf());
            if self.failing.contains(&tier) {
                return Err(anyhow!("corrupt artifact"));
            }
            Ok(Box::new(StubBackend::new(3)))
        }
    }

    struct FakeExporter {
        log: Rc<RefCell<Recorded>>,
        succeed: bool,
    }

    impl Exporter for FakeExporter {
        fn export(
            &self,
            _checkpoint: &Path,
            tier: ModelTier,
            output: &Path,
        ) -> Result<(), ExportFailure> {
            self.log.borrow_mut().exports.push(tier);
            if self.succeed {
                std::fs::write(output, b"engine").expect("write engine");
                Ok(())
            } else {
                Err(ExportFailure::Failed {
                    status: "exit status: 1".to_string(),
                    stderr: "builder crashed".to_string(),
                })
            }
        }
    }

    fn resolver(log: &Rc<RefCell<Recorded>>, failing: Vec<ModelTier>) -> ModelResolver {
        let loader = RecordingLoader {
            log: log.clone(),
            failing,
        };
        ModelResolver::new(&ResolverConfig::default(), Box::new(loader)).with_accelerator(false)
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"artifact").expect("write artifact");
        path
    }

    #[test]
    fn quantized_tier_wins_over_checkpoint() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let int8 = touch(dir.path(), "best_int8.engine");
        touch(dir.path(), "best.onnx");
        let log = Rc::new(RefCell::new(Recorded::default()));

        let artifact = resolver(&log, vec![]).resolve(dir.path(), &ModelTier::SPEED_ORDER)?;
        assert_eq!(artifact.tier, ModelTier::Int8);
        assert_eq!(artifact.path, int8);
        assert_eq!(log.borrow().loaded, vec![int8]);
        Ok(())
    }

    #[test]
    fn preference_order_is_respected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "best_int8.engine");
        touch(dir.path(), "best_fp16.engine");
        let log = Rc::new(RefCell::new(Recorded::default()));

        let artifact =
            resolver(&log, vec![]).resolve(dir.path(), &[ModelTier::Fp16, ModelTier::Int8])?;
        assert_eq!(artifact.tier, ModelTier::Fp16);
        Ok(())
    }

    #[test]
    fn unloadable_tier_falls_through_to_next() -> Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "best_int8.engine");
        let fp16 = touch(dir.path(), "best_fp16.engine");
        let log = Rc::new(RefCell::new(Recorded::default()));

        let artifact = resolver(&log, vec![ModelTier::Int8])
            .resolve(dir.path(), &ModelTier::SPEED_ORDER)?;
        assert_eq!(artifact.tier, ModelTier::Fp16);
        assert_eq!(artifact.path, fp16);
        Ok(())
    }

    #[test]
    fn empty_directory_without_fetch_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = Rc::new(RefCell::new(Recorded::default()));

        let err = resolver(&log, vec![])
            .resolve(dir.path(), &ModelTier::SPEED_ORDER)
            .unwrap_err();
        assert!(matches!(err, ResolveError::ArtifactNotFound { .. }));
        assert!(log.borrow().loaded.is_empty());
    }

    #[test]
    fn checkpoint_is_exported_when_accelerator_present() -> Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "best.onnx");
        let log = Rc::new(RefCell::new(Recorded::default()));
        let exporter = FakeExporter {
            log: log.clone(),
            succeed: true,
        };

        let artifact = resolver(&log, vec![])
            .with_accelerator(true)
            .with_exporter(Box::new(exporter))
            .resolve(dir.path(), &ModelTier::SPEED_ORDER)?;
        assert_eq!(artifact.tier, ModelTier::Int8);
        assert_eq!(log.borrow().exports, vec![ModelTier::Int8]);
        Ok(())
    }

    #[test]
    fn failed_export_falls_back_to_checkpoint() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ckpt = touch(dir.path(), "best.onnx");
        let log = Rc::new(RefCell::new(Recorded::default()));
        let exporter = FakeExporter {
            log: log.clone(),
            succeed: false,
        };

        let artifact = resolver(&log, vec![])
            .with_accelerator(true)
            .with_exporter(Box::new(exporter))
            .resolve(dir.path(), &[ModelTier::Fp16, ModelTier::RawCheckpoint])?;
        assert_eq!(artifact.tier, ModelTier::RawCheckpoint);
        assert_eq!(artifact.path, ckpt);
        assert_eq!(log.borrow().exports, vec![ModelTier::Fp16]);
        Ok(())
    }

    #[test]
    fn no_export_without_accelerator() -> Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "best.onnx");
        let log = Rc::new(RefCell::new(Recorded::default()));
        let exporter = FakeExporter {
            log: log.clone(),
            succeed: true,
        };

        let artifact = resolver(&log, vec![])
            .with_exporter(Box::new(exporter))
            .resolve(dir.path(), &ModelTier::SPEED_ORDER)?;
        assert_eq!(artifact.tier, ModelTier::RawCheckpoint);
        assert!(log.borrow().exports.is_empty());
        Ok(())
    }

    #[test]
    fn default_fetch_supplies_checkpoint() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bundled = dir.path().join("bundled.onnx");
        std::fs::write(&bundled, b"onnx")?;
        let models = dir.path().join("models");
        let log = Rc::new(RefCell::new(Recorded::default()));

        let artifact = resolver(&log, vec![])
            .with_fetcher(Box::new(crate::model::BundledFetcher::new(&bundled)))
            .resolve(&models, &ModelTier::SPEED_ORDER)?;
        assert_eq!(artifact.tier, ModelTier::RawCheckpoint);
        assert_eq!(artifact.path, models.join("best.default.onnx"));
        assert!(!models.join("best.onnx").exists());
        Ok(())
    }

    #[test]
    fn unloadable_checkpoint_is_never_replaced_by_default() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bundled = dir.path().join("bundled.onnx");
        std::fs::write(&bundled, b"default-coco")?;
        let models = dir.path().join("models");
        std::fs::create_dir_all(&models)?;
        let ckpt = models.join("best.onnx");
        std::fs::write(&ckpt, b"user-trained-weights")?;
        let log = Rc::new(RefCell::new(Recorded::default()));

        let err = resolver(&log, vec![ModelTier::RawCheckpoint])
            .with_fetcher(Box::new(crate::model::BundledFetcher::new(&bundled)))
            .resolve(&models, &ModelTier::SPEED_ORDER)
            .unwrap_err();
        let ResolveError::ArtifactNotFound { fetch, .. } = err;
        assert!(fetch.starts_with("skipped"));
        assert_eq!(std::fs::read(&ckpt)?, b"user-trained-weights");
        assert!(!models.join("best.default.onnx").exists());
        Ok(())
    }

    #[test]
    fn fetched_default_is_reused_without_refetching() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let models = dir.path().join("models");
        std::fs::create_dir_all(&models)?;
        std::fs::write(models.join("best.default.onnx"), b"default-coco")?;
        let log = Rc::new(RefCell::new(Recorded::default()));

        let artifact = resolver(&log, vec![])
            .with_fetcher(Box::new(crate::model::BundledFetcher::new(
                dir.path().join("missing.onnx"),
            )))
            .resolve(&models, &ModelTier::SPEED_ORDER)?;
        assert_eq!(artifact.path, models.join("best.default.onnx"));
        Ok(())
    }

    struct CheckpointOnlyLoader;

    impl ModelLoader for CheckpointOnlyLoader {
        fn supports(&self, tier: ModelTier) -> bool {
            tier == ModelTier::RawCheckpoint
        }

        fn load(&self, _tier: ModelTier, _path: &Path) -> Result<Box<dyn Detector>> {
            Ok(Box::new(StubBackend::new(3)))
        }
    }

    #[test]
    fn export_is_skipped_when_loader_opens_no_compiled_tier() -> Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "best.onnx");
        let log = Rc::new(RefCell::new(Recorded::default()));
        let exporter = FakeExporter {
            log: log.clone(),
            succeed: true,
        };

        let loader = Box::new(CheckpointOnlyLoader);
        let artifact = ModelResolver::new(&ResolverConfig::default(), loader)
            .with_accelerator(true)
            .with_exporter(Box::new(exporter))
            .resolve(dir.path(), &ModelTier::SPEED_ORDER)?;
        assert_eq!(artifact.tier, ModelTier::RawCheckpoint);
        assert!(log.borrow().exports.is_empty());
        assert!(!dir.path().join("best_int8.engine").exists());
        Ok(())
    }
}
