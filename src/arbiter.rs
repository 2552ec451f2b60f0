//! Capture arbiter.
//!
//! The camera and the detector are exclusive resources. The arbiter owns both
//! on a dedicated worker thread and runs one capture cycle at a time, in the
//! order requests were enqueued. Requesters hold an `ArbiterHandle`, submit a
//! cycle and await its result; nothing else ever touches the devices.
//!
//! A cycle either fails at capture (the detector is not invoked), fails at
//! inference, or yields a frame with its detections. Failures are reported to
//! the requester that asked for that cycle only; the worker keeps serving.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

use crate::capture::{self, CaptureSource};
use crate::config::{CameraSettings, DetectorSettings};
use crate::detect::{self, Detection, DetectionOutput, DetectorBackend};
use crate::error::CycleError;
use crate::frame::RawFrame;
use crate::timestamp;

/// The exclusive devices a cycle runs against.
pub struct Devices {
    pub source: Box<dyn CaptureSource>,
    pub detector: Box<dyn DetectorBackend>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CycleKind {
    /// Capture a frame and run the detector on it.
    #[default]
    Full,
    /// Capture a frame only; the detector is left idle.
    CaptureOnly,
}

/// Outcome of one successful capture cycle.
#[derive(Debug)]
pub struct CycleResult {
    /// Position of this cycle in the arbiter's execution order, starting at 1.
    pub sequence: u64,
    pub frame: RawFrame,
    /// Empty for `CycleKind::CaptureOnly`.
    pub detections: Vec<Detection>,
    pub inference_ms: f64,
    /// Capture instant, whole seconds.
    pub sampled_at: DateTime<Utc>,
    pub started: Instant,
    pub finished: Instant,
}

/// Cycle counters since startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArbiterStats {
    pub cycles: u64,
    pub capture_failures: u64,
    pub inference_failures: u64,
    /// Requests dropped because the requester stopped waiting before its turn.
    pub abandoned: u64,
    /// Camera health as reported after the last capture attempt.
    pub camera_healthy: bool,
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    capture_failures: AtomicU64,
    inference_failures: AtomicU64,
    abandoned: AtomicU64,
    camera_healthy: AtomicBool,
}

impl Counters {
    fn snapshot(&self) -> ArbiterStats {
        ArbiterStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            camera_healthy: self.camera_healthy.load(Ordering::Relaxed),
        }
    }
}

struct CycleRequest {
    kind: CycleKind,
    reply: oneshot::Sender<Result<CycleResult, CycleError>>,
}

enum Command {
    Cycle(CycleRequest),
    Shutdown,
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Cloneable entry point for requesters.
#[derive(Clone)]
pub struct ArbiterHandle {
    tx: mpsc::UnboundedSender<Command>,
    counters: Arc<Counters>,
}

/// A queued cycle. Dropping the ticket abandons the request; the worker skips
/// it if it has not started yet.
pub struct CycleTicket {
    rx: oneshot::Receiver<Result<CycleResult, CycleError>>,
}

impl ArbiterHandle {
    /// Enqueue a cycle. Queue position is fixed when this returns.
    pub fn submit(&self, kind: CycleKind) -> Result<CycleTicket, CycleError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Cycle(CycleRequest { kind, reply }))
            .map_err(|_| CycleError::Unavailable)?;
        Ok(CycleTicket { rx })
    }

    /// Enqueue a cycle and wait for its result.
    pub async fn run_cycle(&self, kind: CycleKind) -> Result<CycleResult, CycleError> {
        self.submit(kind)?.wait().await
    }

    pub fn stats(&self) -> ArbiterStats {
        self.counters.snapshot()
    }
}

impl CycleTicket {
    pub async fn wait(self) -> Result<CycleResult, CycleError> {
        self.rx.await.map_err(|_| CycleError::Unavailable)?
    }

    /// Blocking wait for callers outside the async runtime.
    pub fn wait_blocking(self) -> Result<CycleResult, CycleError> {
        self.rx.blocking_recv().map_err(|_| CycleError::Unavailable)?
    }
}

// ----------------------------------------------------------------------------
// Arbiter
// ----------------------------------------------------------------------------

pub struct CaptureArbiter {
    handle: ArbiterHandle,
    worker: Option<JoinHandle<()>>,
}

impl CaptureArbiter {
    /// Open the configured camera and detector and start serving cycles.
    pub fn from_settings(camera: &CameraSettings, detector: &DetectorSettings) -> Result<Self> {
        let camera = camera.clone();
        let detector = detector.clone();
        Self::start(move || {
            Ok(Devices {
                source: capture::open_source(&camera)?,
                detector: detect::build_backend(&detector)?,
            })
        })
    }

    /// Start the worker thread. `open` runs on that thread, followed by
    /// `connect` and `warm_up`; any startup error is returned here.
    pub fn start<F>(open: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Devices> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();
        let counters = Arc::new(Counters::default());
        let worker_counters = Arc::clone(&counters);

        let worker = thread::Builder::new()
            .name("capture-arbiter".to_string())
            .spawn(move || {
                let devices = match open_devices(open) {
                    Ok(devices) => {
                        worker_counters
                            .camera_healthy
                            .store(devices.source.is_healthy(), Ordering::Relaxed);
                        let _ = ready_tx.send(Ok(()));
                        devices
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                worker_loop(devices, rx, &worker_counters);
            })
            .context("spawn capture arbiter thread")?;

        let startup = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(anyhow!("capture arbiter exited during startup")));
        if let Err(err) = startup {
            let _ = worker.join();
            return Err(err);
        }

        Ok(Self {
            handle: ArbiterHandle { tx, counters },
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> ArbiterHandle {
        self.handle.clone()
    }

    /// Finish the cycles already queued, then stop the worker and release the
    /// devices. Requests submitted afterwards fail with `CycleError::Unavailable`.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.handle.tx.send(Command::Shutdown);
        if worker.join().is_err() {
            log::error!("CaptureArbiter: worker thread panicked");
        }
    }
}

impl Drop for CaptureArbiter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_devices<F>(open: F) -> Result<Devices>
where
    F: FnOnce() -> Result<Devices>,
{
    let mut devices = open()?;
    devices
        .source
        .connect()
        .context("connect capture source")?;
    devices
        .detector
        .warm_up()
        .with_context(|| format!("warm up detector '{}'", devices.detector.name()))?;
    log::info!(
        "CaptureArbiter: started (device={}, detector={})",
        devices.source.stats().device,
        devices.detector.name()
    );
    Ok(devices)
}

fn worker_loop(
    mut devices: Devices,
    mut rx: mpsc::UnboundedReceiver<Command>,
    counters: &Counters,
) {
    let mut sequence = 0u64;
    while let Some(command) = rx.blocking_recv() {
        let request = match command {
            Command::Cycle(request) => request,
            Command::Shutdown => break,
        };
        if request.reply.is_closed() {
            counters.abandoned.fetch_add(1, Ordering::Relaxed);
            log::debug!("CaptureArbiter: skipping abandoned request");
            continue;
        }
        sequence += 1;
        let result = run_one(&mut devices, request.kind, sequence, counters);
        // The requester may have gone away mid-cycle.
        let _ = request.reply.send(result);
    }

    let stats = counters.snapshot();
    log::info!(
        "CaptureArbiter: stopped after {} cycles ({} capture failures, {} inference failures, {} frames from {})",
        stats.cycles,
        stats.capture_failures,
        stats.inference_failures,
        devices.source.stats().frames_captured,
        devices.source.stats().device
    );
}

fn run_one(
    devices: &mut Devices,
    kind: CycleKind,
    sequence: u64,
    counters: &Counters,
) -> Result<CycleResult, CycleError> {
    counters.cycles.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();

    let source = &mut devices.source;
    let captured = contain(|| source.capture_frame());
    counters
        .camera_healthy
        .store(captured.is_ok() && source.is_healthy(), Ordering::Relaxed);
    let frame = match captured {
        Ok(frame) => frame,
        Err(err) => {
            counters.capture_failures.fetch_add(1, Ordering::Relaxed);
            log::warn!("CaptureArbiter: cycle {} capture failed: {:#}", sequence, err);
            return Err(CycleError::Capture(err));
        }
    };

    let output = match kind {
        CycleKind::CaptureOnly => DetectionOutput::default(),
        CycleKind::Full => {
            let detector = &mut devices.detector;
            match contain(|| detector.detect(&frame)) {
                Ok(output) => output,
                Err(err) => {
                    counters.inference_failures.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "CaptureArbiter: cycle {} inference failed: {:#}",
                        sequence,
                        err
                    );
                    return Err(CycleError::Inference(err));
                }
            }
        }
    };

    Ok(CycleResult {
        sequence,
        sampled_at: timestamp::normalize(frame.captured_at),
        detections: output.detections,
        inference_ms: output.inference_ms,
        frame,
        started,
        finished: Instant::now(),
    })
}

/// Turn a device panic into an ordinary error for this cycle.
fn contain<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("device panicked: {}", panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
