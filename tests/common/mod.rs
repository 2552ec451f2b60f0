#![allow(dead_code)]

use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use sightline::api::{ApiConfig, ApiHandle, ApiServer};
use sightline::config::{QuerySettings, StreamSettings};
use sightline::{
    CaptureArbiter, CaptureSource, CaptureStats, Detection, DetectionOutput, DetectorBackend,
    Devices, InMemoryTelemetryStore, PixelFormat, RawFrame, SharedStore,
};

pub const FRAME_WIDTH: u32 = 32;
pub const FRAME_HEIGHT: u32 = 24;

/// Shared view of what the fake devices did.
#[derive(Clone, Default)]
pub struct DeviceMonitor {
    inner: Arc<MonitorInner>,
}

#[derive(Default)]
struct MonitorInner {
    captures: AtomicU64,
    detects: AtomicU64,
    busy: AtomicBool,
    overlaps: AtomicU64,
    windows: Mutex<Vec<(Instant, Instant)>>,
}

impl DeviceMonitor {
    pub fn captures(&self) -> u64 {
        self.inner.captures.load(Ordering::SeqCst)
    }

    pub fn detects(&self) -> u64 {
        self.inner.detects.load(Ordering::SeqCst)
    }

    /// Times a device call started while another one was still running.
    pub fn overlaps(&self) -> u64 {
        self.inner.overlaps.load(Ordering::SeqCst)
    }

    /// Capture windows in execution order.
    pub fn windows(&self) -> Vec<(Instant, Instant)> {
        self.inner.windows.lock().unwrap().clone()
    }

    fn enter(&self) {
        if self.inner.busy.swap(true, Ordering::SeqCst) {
            self.inner.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn exit(&self) {
        self.inner.busy.store(false, Ordering::SeqCst);
    }
}

/// Windows must follow one another without overlap.
pub fn assert_disjoint(windows: &[(Instant, Instant)]) {
    for pair in windows.windows(2) {
        assert!(
            pair[0].1 <= pair[1].0,
            "capture windows overlap: {:?} then {:?}",
            pair[0],
            pair[1]
        );
    }
}

/// Fake camera: a dark frame with a bright 4x4 square, optional delay, and
/// scripted failures by 1-based call number.
pub struct ScriptedSource {
    monitor: DeviceMonitor,
    delay: Duration,
    fail_on: Vec<u64>,
    fail_always: bool,
    last_failed: bool,
}

impl ScriptedSource {
    pub fn new(monitor: DeviceMonitor) -> Self {
        Self {
            monitor,
            delay: Duration::ZERO,
            fail_on: Vec::new(),
            fail_always: false,
            last_failed: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on(mut self, calls: &[u64]) -> Self {
        self.fail_on = calls.to_vec();
        self
    }

    pub fn always_failing(mut self) -> Self {
        self.fail_always = true;
        self
    }
}

impl CaptureSource for ScriptedSource {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<RawFrame> {
        self.monitor.enter();
        let started = Instant::now();
        let call = self.monitor.inner.captures.fetch_add(1, Ordering::SeqCst) + 1;
        std::thread::sleep(self.delay);
        let finished = Instant::now();
        self.monitor.inner.windows.lock().unwrap().push((started, finished));
        self.monitor.exit();

        self.last_failed = self.fail_always || self.fail_on.contains(&call);
        if self.last_failed {
            return Err(anyhow!("scripted capture failure on call {}", call));
        }

        let mut data = vec![16u8; (FRAME_WIDTH * FRAME_HEIGHT * 3) as usize];
        for y in 4..8 {
            for x in 10..14 {
                let idx = ((y * FRAME_WIDTH + x) * 3) as usize;
                data[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        RawFrame::new(data, FRAME_WIDTH, FRAME_HEIGHT, PixelFormat::Rgb24)
    }

    fn is_healthy(&self) -> bool {
        !self.last_failed
    }

    fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.monitor.captures(),
            device: "scripted".to_string(),
        }
    }
}

/// Fake detector returning one fixed detection.
pub struct FixedDetector {
    monitor: DeviceMonitor,
    delay: Duration,
    fail_on: Vec<u64>,
}

impl FixedDetector {
    pub fn new(monitor: DeviceMonitor) -> Self {
        Self {
            monitor,
            delay: Duration::ZERO,
            fail_on: Vec::new(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on(mut self, calls: &[u64]) -> Self {
        self.fail_on = calls.to_vec();
        self
    }
}

pub fn fixed_detection() -> Detection {
    Detection::new("pothole", 0.875, [10, 4, 13, 7])
}

impl DetectorBackend for FixedDetector {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn detect(&mut self, _frame: &RawFrame) -> Result<DetectionOutput> {
        self.monitor.enter();
        let call = self.monitor.inner.detects.fetch_add(1, Ordering::SeqCst) + 1;
        std::thread::sleep(self.delay);
        self.monitor.exit();
        if self.fail_on.contains(&call) {
            return Err(anyhow!("scripted inference failure on call {}", call));
        }
        Ok(DetectionOutput {
            detections: vec![fixed_detection()],
            inference_ms: 12.5,
        })
    }
}

pub fn start_arbiter(source: ScriptedSource, detector: FixedDetector) -> CaptureArbiter {
    CaptureArbiter::start(move || {
        Ok(Devices {
            source: Box::new(source),
            detector: Box::new(detector),
        })
    })
    .expect("start arbiter")
}

// ----------------------------------------------------------------------------
// HTTP harness
// ----------------------------------------------------------------------------

pub struct TestService {
    pub addr: SocketAddr,
    pub store: SharedStore,
    arbiter: Option<CaptureArbiter>,
    api: Option<ApiHandle>,
}

impl TestService {
    pub async fn start(source: ScriptedSource, detector: FixedDetector) -> Self {
        Self::start_with_store(source, detector, Arc::new(InMemoryTelemetryStore::new())).await
    }

    pub async fn start_with_store(
        source: ScriptedSource,
        detector: FixedDetector,
        store: SharedStore,
    ) -> Self {
        let arbiter = start_arbiter(source, detector);
        let cfg = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            stream: StreamSettings {
                detect: true,
                jpeg_quality: 70,
                retry_delay: Duration::from_millis(10),
            },
            query: QuerySettings {
                default_limit: 20,
                max_limit: 100,
            },
        };
        let api = ApiServer::new(cfg, arbiter.handle(), store.clone())
            .spawn(CancellationToken::new())
            .await
            .expect("spawn api");
        Self {
            addr: api.addr,
            store,
            arbiter: Some(arbiter),
            api: Some(api),
        }
    }

    pub async fn get(&self, path: &str) -> HttpResponse {
        request(self.addr, "GET", path, None).await
    }

    pub async fn post_json(&self, path: &str, body: &str) -> HttpResponse {
        request(self.addr, "POST", path, Some(body)).await
    }

    pub async fn shutdown(mut self) {
        if let Some(api) = self.api.take() {
            api.stop().await.expect("stop api");
        }
        if let Some(arbiter) = self.arbiter.take() {
            tokio::task::spawn_blocking(move || arbiter.shutdown())
                .await
                .expect("arbiter shutdown");
        }
    }
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or_else(|err| {
            panic!(
                "body is not JSON ({err}): {}",
                String::from_utf8_lossy(&self.body)
            )
        })
    }
}

pub async fn request(addr: SocketAddr, method: &str, path: &str, body: Option<&str>) -> HttpResponse {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let mut req = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
    if let Some(body) = body {
        req.push_str("Content-Type: application/json\r\n");
        req.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    req.push_str("\r\n");
    if let Some(body) = body {
        req.push_str(body);
    }
    stream.write_all(req.as_bytes()).await.expect("write request");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("read response");

    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response header terminator");
    let headers = String::from_utf8_lossy(&raw[..split]).to_string();
    let body = raw[split + 4..].to_vec();
    let status = headers
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    HttpResponse {
        status,
        headers,
        body,
    }
}
