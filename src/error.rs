//! Error kinds shared across the capture, storage and API layers.

use thiserror::Error;

/// Failure of one capture arbiter cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    /// Sensor unavailable or frame read failed. The detector was not invoked.
    #[error("capture failed: {0:#}")]
    Capture(anyhow::Error),
    /// The detector rejected or failed on a captured frame.
    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),
    /// The arbiter worker has stopped and no longer accepts requests.
    #[error("capture arbiter is not running")]
    Unavailable,
}

/// Malformed inbound data, rejected before any side effect.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Telemetry store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Nothing of the requested kind has been recorded yet.
    #[error("no {0} recorded yet")]
    NotFound(&'static str),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A stored row could not be turned back into a record.
    #[error("corrupt row {id}: {reason}")]
    Corrupt { id: i64, reason: String },
    #[error("store task failed: {0}")]
    Task(String),
}

/// Failure of a capture-and-persist operation.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
