use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use sightline::config::SightlineConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SIGHTLINE_CONFIG",
        "SIGHTLINE_DB_PATH",
        "SIGHTLINE_API_ADDR",
        "SIGHTLINE_CAMERA_DEVICE",
        "SIGHTLINE_DETECTOR_BACKEND",
        "SIGHTLINE_MODEL_PATH",
        "SIGHTLINE_RECORD_INTERVAL_SECS",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        r#"{
            "db_path": "road_survey.db",
            "api": { "addr": "0.0.0.0:9000" },
            "camera": { "device": "/dev/video2", "width": 640, "height": 480, "target_fps": 15 },
            "detector": {
                "backend": "Tract",
                "model_path": "/opt/models/best.onnx",
                "confidence_threshold": 0.4,
                "labels": ["pothole", "crack"]
            },
            "recorder": { "enabled": false, "interval_secs": 60 },
            "stream": { "detect": false, "jpeg_quality": 65, "retry_delay_ms": 500 },
            "query": { "default_limit": 10, "max_limit": 50 }
        }"#,
    );

    std::env::set_var("SIGHTLINE_CONFIG", file.path());
    std::env::set_var("SIGHTLINE_CAMERA_DEVICE", "stub://bench");
    std::env::set_var("SIGHTLINE_RECORD_INTERVAL_SECS", "5");

    let cfg = SightlineConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "road_survey.db");
    assert_eq!(cfg.api_addr, "0.0.0.0:9000");
    assert_eq!(cfg.camera.device, "stub://bench");
    assert_eq!(cfg.camera.width, 640);
    assert_eq!(cfg.camera.height, 480);
    assert_eq!(cfg.camera.target_fps, 15);
    assert_eq!(cfg.detector.backend, "tract");
    assert_eq!(
        cfg.detector.model_path,
        Some(PathBuf::from("/opt/models/best.onnx"))
    );
    assert_eq!(cfg.detector.confidence_threshold, 0.4);
    assert_eq!(cfg.detector.iou_threshold, 0.45);
    assert_eq!(cfg.detector.labels, vec!["pothole", "crack"]);
    assert!(!cfg.recorder.enabled);
    assert_eq!(cfg.recorder.interval, Duration::from_secs(5));
    assert!(!cfg.stream.detect);
    assert_eq!(cfg.stream.jpeg_quality, 65);
    assert_eq!(cfg.stream.retry_delay, Duration::from_millis(500));
    assert_eq!(cfg.query.default_limit, 10);
    assert_eq!(cfg.query.max_limit, 50);

    clear_env();
}

#[test]
fn defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SightlineConfig::load().expect("load defaults");

    assert_eq!(cfg.db_path, "sightline.db");
    assert_eq!(cfg.api_addr, "127.0.0.1:8000");
    assert_eq!(cfg.camera.device, "stub://camera");
    assert_eq!((cfg.camera.width, cfg.camera.height), (1280, 720));
    assert_eq!(cfg.detector.backend, "stub");
    assert!(cfg.recorder.enabled);
    assert_eq!(cfg.recorder.interval, Duration::from_secs(20));
    assert!(cfg.stream.detect);
    assert_eq!(cfg.stream.jpeg_quality, 80);
    assert_eq!(cfg.query.default_limit, 20);
}

#[test]
fn env_overrides_apply_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SIGHTLINE_DB_PATH", "/var/lib/sightline/telemetry.db");
    std::env::set_var("SIGHTLINE_API_ADDR", "127.0.0.1:8123");
    std::env::set_var("SIGHTLINE_DETECTOR_BACKEND", "tract");
    std::env::set_var("SIGHTLINE_MODEL_PATH", "/opt/models/yolo.onnx");

    let cfg = SightlineConfig::load_from(None).expect("load config");
    assert_eq!(cfg.db_path, "/var/lib/sightline/telemetry.db");
    assert_eq!(cfg.api_addr, "127.0.0.1:8123");
    assert_eq!(cfg.detector.backend, "tract");
    assert_eq!(
        cfg.detector.model_path,
        Some(PathBuf::from("/opt/models/yolo.onnx"))
    );

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for json in [
        r#"{ "detector": { "backend": "opencv" } }"#,
        r#"{ "detector": { "backend": "tract" } }"#,
        r#"{ "detector": { "iou_threshold": 1.5 } }"#,
        r#"{ "camera": { "width": 0 } }"#,
        r#"{ "recorder": { "interval_secs": 0 } }"#,
        r#"{ "stream": { "jpeg_quality": 0 } }"#,
        r#"{ "query": { "default_limit": 500, "max_limit": 100 } }"#,
        r#"{ "db_path": 7 }"#,
    ] {
        let file = config_file(json);
        assert!(
            SightlineConfig::load_from(Some(file.path())).is_err(),
            "accepted {json}"
        );
    }

    std::env::set_var("SIGHTLINE_RECORD_INTERVAL_SECS", "soon");
    assert!(SightlineConfig::load_from(None).is_err());

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = SightlineConfig::load_from(Some(std::path::Path::new(
        "/nonexistent/sightline.json",
    )))
    .unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}
