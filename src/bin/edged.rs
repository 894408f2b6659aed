//! edged - edge detection daemon
//!
//! This daemon:
//! 1. Loads configuration and the class-name table
//! 2. Optionally validates the training dataset layout
//! 3. Resolves the fastest available model artifact
//! 4. Negotiates a camera backend
//! 5. Runs the frame pipeline until Ctrl-C or `--max-frames`
//!
//! Exit status is 0 on a requested stop and 1 on any fatal error.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use edge_detect::model::{CommandExporter, DefaultFetcher, ModelLoader, StubLoader};
use edge_detect::ui::{Ui, UiMode};
use edge_detect::{
    dataset, CameraSource, ClassNameTable, DetectionBatch, DetectionOverlay, EdgeConfig,
    FramePipeline, ModelArtifact, ModelResolver, ModelTier, NullSurface, PerformanceMonitor,
    RenderSurface, SnapshotSurface,
};

/// Consecutive capture failures tolerated before the camera is declared lost.
const MAX_CAPTURE_FAILURES: u32 = 30;

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time object detection on a live camera")]
struct Args {
    /// JSON configuration file.
    #[arg(long, env = "EDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Camera device (index, /dev/videoN, or stub://name). Overrides config.
    #[arg(long)]
    device: Option<String>,

    /// Stop after this many captured frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// Skip the dataset pre-flight check even when a dataset is configured.
    #[arg(long)]
    skip_dataset_check: bool,

    /// Write annotated JPEG snapshots into this directory.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Snapshot every Nth frame.
    #[arg(long, default_value_t = 30)]
    snapshot_every: u64,

    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("edged: {:#}", err);
            ExitCode::from(1)
        }
    }
}

fn run(args: Args) -> Result<()> {
    let ui = Ui::new(args.ui);

    let mut cfg = staged(&ui, "Loading configuration", || {
        EdgeConfig::load_from(args.config.as_deref())
    })?;
    if let Some(device) = &args.device {
        cfg.device = device.clone();
    }

    let classes = staged(&ui, "Loading class names", || {
        ClassNameTable::load(&cfg.class_names)
    })?;
    log::info!(
        "{} classes from {}",
        classes.len(),
        cfg.class_names.display()
    );
    let classes = Arc::new(classes);

    if let Some(settings) = cfg.dataset.as_ref().filter(|_| !args.skip_dataset_check) {
        let report = staged(&ui, "Validating dataset", || {
            dataset::validate(&settings.root, &settings.splits)
        })?;
        if !report.ok {
            bail!("dataset validation failed:\n{}", report);
        }
    }

    let artifact = staged(&ui, "Resolving model", || resolve_model(&cfg, classes.len()))?;
    log::info!(
        "model: {} tier {} ({})",
        artifact.tier,
        artifact.path.display(),
        artifact.detector_name()
    );

    let mut camera = staged(&ui, "Opening camera", || {
        CameraSource::open(&cfg.device, &cfg.camera)
    })?;
    log::info!(
        "camera: {} via {}",
        cfg.device,
        camera.backend_name()
    );

    let mut surface: Box<dyn RenderSurface> = match &args.snapshot_dir {
        Some(dir) => Box::new(SnapshotSurface::new(dir, args.snapshot_every)?),
        None => Box::new(NullSurface::default()),
    };

    let mut pipeline = FramePipeline::new(
        artifact.into_detector(),
        Arc::clone(&classes),
        cfg.pipeline.clone(),
    );
    staged(&ui, "Starting pipeline", || pipeline.start())?;

    let (shutdown_tx, shutdown_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("error setting Ctrl-C handler")?;

    let overlay = DetectionOverlay::default();
    let mut monitor = PerformanceMonitor::default();
    let status = ui.status_line();
    let mut latest: Option<DetectionBatch> = None;
    let mut capture_failures = 0u32;
    let mut last_stats = Instant::now();

    log::info!("edged running. press Ctrl-C to stop");
    let outcome = loop {
        if shutdown_rx.try_recv().is_ok() {
            log::info!("shutdown signal received, stopping pipeline...");
            break Ok(());
        }
        if args
            .max_frames
            .is_some_and(|max| monitor.total_frames() >= max)
        {
            log::info!("frame limit reached, stopping pipeline...");
            break Ok(());
        }

        let frame = match camera.next_frame() {
            Ok(frame) => {
                capture_failures = 0;
                frame
            }
            Err(err) => {
                capture_failures += 1;
                log::warn!("capture failed ({}): {:#}", capture_failures, err);
                if capture_failures >= MAX_CAPTURE_FAILURES || !camera.is_healthy() {
                    break Err(err.context("camera stopped delivering frames"));
                }
                continue;
            }
        };

        monitor.record_frame();
        let display = frame.clone();
        pipeline.submit_frame(frame);
        if let Some(batch) = pipeline.try_take_latest_detections() {
            latest = Some(batch);
        }

        let annotated = overlay.annotate(display, latest.as_ref())?;
        if let Err(err) = surface.present(&annotated) {
            log::warn!("render failed: {:#}", err);
        }

        let stats = pipeline.stats();
        status.update(
            monitor.average_rate(),
            monitor.total_frames(),
            stats.dropped,
            latest.as_ref().map_or(0, DetectionBatch::len),
        );
        if last_stats.elapsed() >= cfg.stats_interval {
            log_stats(&monitor, &pipeline, &camera, latest.as_ref());
            last_stats = Instant::now();
        }
    };

    status.finish();
    pipeline.stop();
    log_stats(&monitor, &pipeline, &camera, latest.as_ref());
    outcome
}

/// Run `f` under a UI stage, marking the stage failed on error.
fn staged<T, E>(ui: &Ui, name: &str, f: impl FnOnce() -> Result<T, E>) -> Result<T>
where
    E: Into<anyhow::Error>,
{
    let stage = ui.stage(name);
    match f() {
        Ok(value) => Ok(value),
        Err(err) => {
            let err = err.into();
            stage.fail(&format!("{:#}", err));
            Err(err)
        }
    }
}

fn resolve_model(cfg: &EdgeConfig, num_classes: usize) -> Result<ModelArtifact> {
    let dir = cfg.model_dir.to_string_lossy();
    if dir.starts_with("stub://") {
        let handle = StubLoader::new(num_classes).load(ModelTier::RawCheckpoint, &cfg.model_dir)?;
        return Ok(ModelArtifact::new(
            ModelTier::RawCheckpoint,
            cfg.model_dir.clone(),
            handle,
        ));
    }

    let loader = model_loader(cfg)?;
    let compiles = ModelTier::SPEED_ORDER
        .iter()
        .any(|tier| tier.is_compiled() && loader.supports(*tier));
    if cfg.resolver.export && !compiles {
        log::info!("export disabled: model backend loads no compiled engine tier");
    }
    let mut resolver = ModelResolver::new(&cfg.resolver, loader);
    if cfg.resolver.export && compiles {
        resolver = resolver.with_exporter(Box::new(CommandExporter::new(
            cfg.resolver.export_command.clone(),
            cfg.resolver.export_timeout,
        )));
    }
    if let Some(source) = &cfg.resolver.default_checkpoint {
        resolver = resolver.with_fetcher(default_fetcher(source)?);
    }
    Ok(resolver.resolve(&cfg.model_dir, &cfg.resolver.tier_order)?)
}

#[cfg(feature = "backend-tract")]
fn model_loader(cfg: &EdgeConfig) -> Result<Box<dyn ModelLoader>> {
    Ok(Box::new(edge_detect::model::TractLoader::new(
        cfg.resolver.model_input,
    )))
}

#[cfg(not(feature = "backend-tract"))]
fn model_loader(_cfg: &EdgeConfig) -> Result<Box<dyn ModelLoader>> {
    Err(anyhow!(
        "no model backend compiled in; rebuild with --features backend-tract or use a stub:// model directory"
    ))
}

fn default_fetcher(source: &str) -> Result<Box<dyn DefaultFetcher>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        return http_fetcher(source);
    }
    Ok(Box::new(edge_detect::model::BundledFetcher::new(source)))
}

#[cfg(feature = "fetch-default")]
fn http_fetcher(url: &str) -> Result<Box<dyn DefaultFetcher>> {
    Ok(Box::new(edge_detect::model::HttpFetcher::new(url)))
}

#[cfg(not(feature = "fetch-default"))]
fn http_fetcher(url: &str) -> Result<Box<dyn DefaultFetcher>> {
    Err(anyhow!(
        "default checkpoint {} needs the fetch-default feature",
        url
    ))
}

fn log_stats(
    monitor: &PerformanceMonitor,
    pipeline: &FramePipeline,
    camera: &CameraSource,
    latest: Option<&DetectionBatch>,
) {
    let stats = pipeline.stats();
    let capture = camera.stats();
    log::info!(
        "fps={:.1} captured={} submitted={} dropped={} batches={} detections={} latency={:?} camera_healthy={}",
        monitor.average_rate(),
        capture.frames_captured,
        stats.submitted,
        stats.dropped,
        stats.batches_taken,
        latest.map_or(0, DetectionBatch::len),
        latest.map(|b| b.latency).unwrap_or_default(),
        camera.is_healthy()
    );
}
