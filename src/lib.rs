//! Sightline
//!
//! Camera detection recorder with GPS telemetry.
//!
//! # Architecture
//!
//! One camera and one detection model are shared by four consumers: the live
//! stream, on-demand predictions, the periodic recorder and the combined
//! GPS + prediction query. The devices are owned by the capture arbiter,
//! which runs capture + inference cycles one at a time in FIFO order on its
//! own thread; consumers await their cycle without blocking the runtime.
//!
//! GPS samples are pushed in over HTTP. Both GPS samples and predictions are
//! appended to the telemetry store, which keeps each instant as UTC date and
//! time strings and hands it back as epoch seconds on the wire.
//!
//! # Module Structure
//!
//! - `frame`: RawFrame and pixel formats
//! - `capture`: camera sources (synthetic `stub://`, V4L2)
//! - `detect`: detector backends (stub, tract ONNX) and YOLO decoding
//! - `arbiter`: exclusive FIFO access to camera + detector
//! - `annotate`: boxes, labels and JPEG encoding for the live stream
//! - `timestamp`, `telemetry`, `storage`: records and their persistence
//! - `recorder`: periodic capture-and-persist loop
//! - `api`: HTTP routes and the MJPEG stream
//! - `config`, `error`: configuration and error kinds

pub mod annotate;
pub mod api;
pub mod arbiter;
pub mod capture;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod recorder;
pub mod storage;
pub mod telemetry;
pub mod timestamp;

pub use arbiter::{
    ArbiterHandle, ArbiterStats, CaptureArbiter, CycleKind, CycleResult, CycleTicket, Devices,
};
pub use capture::{CaptureSource, CaptureStats, SyntheticSource};
pub use config::SightlineConfig;
pub use detect::{Detection, DetectionOutput, DetectorBackend, StubBackend};
pub use error::{CycleError, PredictError, StoreError, ValidationError};
pub use frame::{PixelFormat, RawFrame};
pub use recorder::{record_prediction, Recorder, RecorderHandle, RecorderStats};
pub use storage::{InMemoryTelemetryStore, SharedStore, SqliteTelemetryStore, TelemetryStore};
pub use telemetry::{GpsReading, GpsSample, Prediction, PredictionRecord};
