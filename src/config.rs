use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "sightline.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_CAMERA_DEVICE: &str = "stub://camera";
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;
const DEFAULT_DETECTOR_BACKEND: &str = "stub";
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_RECORD_INTERVAL_SECS: u64 = 20;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_STREAM_RETRY_MS: u64 = 250;
const DEFAULT_QUERY_LIMIT: usize = 20;
const DEFAULT_MAX_QUERY_LIMIT: usize = 1000;

const KNOWN_BACKENDS: &[&str] = &["stub", "tract"];

#[derive(Debug, Deserialize, Default)]
struct SightlineConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    recorder: Option<RecorderConfigFile>,
    stream: Option<StreamConfigFile>,
    query: Option<QueryConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct RecorderConfigFile {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    detect: Option<bool>,
    jpeg_quality: Option<u8>,
    retry_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryConfigFile {
    default_limit: Option<usize>,
    max_limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SightlineConfig {
    pub db_path: String,
    pub api_addr: String,
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub recorder: RecorderSettings,
    pub stream: StreamSettings,
    pub query: QuerySettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub enabled: bool,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Run the detector on streamed frames; `false` streams raw frames.
    pub detect: bool,
    pub jpeg_quality: u8,
    /// Pause after a failed frame before asking for the next one.
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: DEFAULT_CAMERA_DEVICE.to_string(),
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            target_fps: DEFAULT_CAMERA_FPS,
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR_BACKEND.to_string(),
            model_path: None,
            input_width: DEFAULT_MODEL_INPUT,
            input_height: DEFAULT_MODEL_INPUT,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            labels: Vec::new(),
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            detect: true,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            retry_delay: Duration::from_millis(DEFAULT_STREAM_RETRY_MS),
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_QUERY_LIMIT,
            max_limit: DEFAULT_MAX_QUERY_LIMIT,
        }
    }
}

impl SightlineConfig {
    /// Load from `SIGHTLINE_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SIGHTLINE_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit config file (if any), then apply environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SightlineConfigFile) -> Self {
        let camera_defaults = CameraSettings::default();
        let detector_defaults = DetectorSettings::default();
        let stream_defaults = StreamSettings::default();
        let query_defaults = QuerySettings::default();

        let camera = file.camera.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let recorder = file.recorder.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();
        let query = file.query.unwrap_or_default();

        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            camera: CameraSettings {
                device: camera.device.unwrap_or(camera_defaults.device),
                width: camera.width.unwrap_or(camera_defaults.width),
                height: camera.height.unwrap_or(camera_defaults.height),
                target_fps: camera.target_fps.unwrap_or(camera_defaults.target_fps),
            },
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or(detector_defaults.backend),
                model_path: detector.model_path,
                input_width: detector.input_width.unwrap_or(detector_defaults.input_width),
                input_height: detector
                    .input_height
                    .unwrap_or(detector_defaults.input_height),
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(detector_defaults.confidence_threshold),
                iou_threshold: detector
                    .iou_threshold
                    .unwrap_or(detector_defaults.iou_threshold),
                labels: detector.labels.unwrap_or_default(),
            },
            recorder: RecorderSettings {
                enabled: recorder.enabled.unwrap_or(true),
                interval: Duration::from_secs(
                    recorder
                        .interval_secs
                        .unwrap_or(DEFAULT_RECORD_INTERVAL_SECS),
                ),
            },
            stream: StreamSettings {
                detect: stream.detect.unwrap_or(stream_defaults.detect),
                jpeg_quality: stream.jpeg_quality.unwrap_or(stream_defaults.jpeg_quality),
                retry_delay: stream
                    .retry_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(stream_defaults.retry_delay),
            },
            query: QuerySettings {
                default_limit: query.default_limit.unwrap_or(query_defaults.default_limit),
                max_limit: query.max_limit.unwrap_or(query_defaults.max_limit),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("SIGHTLINE_DB_PATH") {
            self.db_path = path;
        }
        if let Some(addr) = non_empty_env("SIGHTLINE_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(device) = non_empty_env("SIGHTLINE_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(backend) = non_empty_env("SIGHTLINE_DETECTOR_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(path) = non_empty_env("SIGHTLINE_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(interval) = non_empty_env("SIGHTLINE_RECORD_INTERVAL_SECS") {
            let seconds: u64 = interval.parse().map_err(|_| {
                anyhow!("SIGHTLINE_RECORD_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.recorder.interval = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.detector.backend = self.detector.backend.trim().to_lowercase();
        if !KNOWN_BACKENDS.contains(&self.detector.backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend '{}' (expected one of {:?})",
                self.detector.backend,
                KNOWN_BACKENDS
            ));
        }
        if self.detector.backend == "tract" && self.detector.model_path.is_none() {
            return Err(anyhow!("detector backend 'tract' requires model_path"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input size must be greater than zero"));
        }
        for (name, value) in [
            ("confidence_threshold", self.detector.confidence_threshold),
            ("iou_threshold", self.detector.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("detector {} must be within [0, 1]", name));
            }
        }
        if self.recorder.interval.is_zero() {
            return Err(anyhow!("recorder interval must be greater than zero"));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!("stream jpeg_quality must be within 1..=100"));
        }
        if self.query.default_limit == 0 || self.query.default_limit > self.query.max_limit {
            return Err(anyhow!(
                "query default_limit must be within 1..={}",
                self.query.max_limit
            ));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<SightlineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
