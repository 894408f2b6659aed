use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use edge_detect::config::EdgeConfig;
use edge_detect::{CaptureBackendKind, ModelTier};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "EDGE_CONFIG",
        "EDGE_CLASS_NAMES",
        "EDGE_MODEL_DIR",
        "EDGE_DEVICE",
        "EDGE_CAMERA_BACKENDS",
        "EDGE_CONFIDENCE",
        "EDGE_ACCELERATOR",
        "EDGE_DATASET_ROOT",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = EdgeConfig::load().expect("load defaults");
    assert_eq!(cfg.device, "0");
    assert_eq!(cfg.camera.buffer_depth, 1);
    assert_eq!(
        cfg.camera.backends,
        vec![CaptureBackendKind::Gstreamer, CaptureBackendKind::V4l2]
    );
    assert_eq!(cfg.pipeline.input_capacity, 3);
    assert_eq!(cfg.resolver.tier_order, ModelTier::SPEED_ORDER.to_vec());
    assert!(cfg.dataset.is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "class_names": "/etc/edge/classes.toml",
            "device": "/dev/video2",
            "camera": {
                "width": 640,
                "height": 480,
                "fps": 60,
                "backends": ["v4l2", "test_pattern"],
                "csi": false
            },
            "model": {
                "dir": "/opt/models",
                "stem": "yolo",
                "tiers": ["fp16", "raw_checkpoint"],
                "export": false,
                "input_size": 416
            },
            "inference": {
                "confidence": 0.35,
                "iou": 0.5,
                "max_detections": 50
            },
            "pipeline": {
                "input_capacity": 4,
                "stop_timeout_ms": 500
            },
            "dataset": {
                "root": "/data/set",
                "splits": ["train", "valid"]
            }
        }"#,
    );

    std::env::set_var("EDGE_CONFIG", file.path());
    std::env::set_var("EDGE_DEVICE", "stub://bench");
    std::env::set_var("EDGE_CONFIDENCE", "0.6");
    std::env::set_var("EDGE_ACCELERATOR", "off");
    std::env::set_var("EDGE_DATASET_ROOT", "/data/other");

    let cfg = EdgeConfig::load().expect("load config");

    assert_eq!(cfg.class_names.to_str(), Some("/etc/edge/classes.toml"));
    assert_eq!(cfg.device, "stub://bench");
    assert_eq!((cfg.camera.width, cfg.camera.height, cfg.camera.fps), (640, 480, 60));
    assert_eq!(
        cfg.camera.backends,
        vec![CaptureBackendKind::V4l2, CaptureBackendKind::TestPattern]
    );
    assert!(!cfg.camera.csi);
    assert_eq!(cfg.model_dir.to_str(), Some("/opt/models"));
    assert_eq!(cfg.resolver.stem, "yolo");
    assert_eq!(
        cfg.resolver.tier_order,
        vec![ModelTier::Fp16, ModelTier::RawCheckpoint]
    );
    assert!(!cfg.resolver.export);
    assert_eq!(cfg.resolver.accelerator, Some(false));
    assert_eq!(cfg.resolver.model_input, 416);
    assert!((cfg.pipeline.params.confidence_threshold - 0.6).abs() < f32::EPSILON);
    assert_eq!(cfg.pipeline.params.max_detections, 50);
    assert_eq!(cfg.pipeline.input_capacity, 4);
    assert_eq!(cfg.pipeline.output_capacity, 2);
    assert_eq!(cfg.pipeline.stop_timeout, Duration::from_millis(500));

    let dataset = cfg.dataset.expect("dataset settings");
    assert_eq!(dataset.root.to_str(), Some("/data/other"));
    assert_eq!(dataset.splits, vec!["train", "valid"]);

    clear_env();
}

#[test]
fn camera_backends_from_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("EDGE_CAMERA_BACKENDS", "test_pattern, gstreamer");
    let cfg = EdgeConfig::load().expect("load config");
    assert_eq!(
        cfg.camera.backends,
        vec![CaptureBackendKind::TestPattern, CaptureBackendKind::Gstreamer]
    );

    std::env::set_var("EDGE_CAMERA_BACKENDS", "opencv");
    let err = EdgeConfig::load().unwrap_err();
    assert!(err.to_string().contains("unknown capture backend"));

    clear_env();
}

#[test]
fn rejects_out_of_range_thresholds() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "inference": { "iou": 1.5 } }"#);
    std::env::set_var("EDGE_CONFIG", file.path());
    let err = EdgeConfig::load().unwrap_err();
    assert!(err.to_string().contains("iou threshold"));

    let file = write_config(r#"{ "pipeline": { "poll_ms": 0 } }"#);
    std::env::set_var("EDGE_CONFIG", file.path());
    let err = EdgeConfig::load().unwrap_err();
    assert!(err.to_string().contains("poll interval"));

    std::env::remove_var("EDGE_CONFIG");
    std::env::set_var("EDGE_CONFIDENCE", "high");
    assert!(EdgeConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_unreadable_and_malformed_files() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("EDGE_CONFIG", "/nonexistent/edge.json");
    let err = EdgeConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    let file = write_config("{ not json");
    std::env::set_var("EDGE_CONFIG", file.path());
    let err = EdgeConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
