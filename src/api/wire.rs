//! JSON bodies of the HTTP API.
//!
//! Instants cross the wire as epoch seconds: an integer for GPS samples and a
//! decimal string for predictions, which is what existing dashboards expect.

use serde::{Deserialize, Serialize};

use crate::arbiter::ArbiterStats;
use crate::detect::Detection;
use crate::error::ValidationError;
use crate::telemetry::{GpsReading, GpsSample, PredictionRecord};
use crate::timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsSampleBody {
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub sampled_at: i64,
}

impl From<&GpsSample> for GpsSampleBody {
    fn from(sample: &GpsSample) -> Self {
        Self {
            id: sample.id,
            latitude: sample.latitude,
            longitude: sample.longitude,
            altitude: sample.altitude,
            sampled_at: timestamp::to_epoch_secs(sample.sampled_at),
        }
    }
}

/// Inbound GPS sample. Older pushers send the instant as `date`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsReadingBody {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub sampled_at: Option<i64>,
    #[serde(rename = "date")]
    pub legacy_date: Option<i64>,
}

impl GpsReadingBody {
    pub fn into_reading(self) -> Result<GpsReading, ValidationError> {
        let secs = self
            .sampled_at
            .or(self.legacy_date)
            .ok_or_else(|| ValidationError::new("sampledAt", "missing sample instant"))?;
        GpsReading::new(
            self.latitude,
            self.longitude,
            self.altitude,
            timestamp::from_epoch_secs(secs)?,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionBody {
    pub id: i64,
    pub detections: Vec<Detection>,
    pub inference_duration_ms: f64,
    pub sampled_at: String,
}

impl From<&PredictionRecord> for PredictionBody {
    fn from(record: &PredictionRecord) -> Self {
        Self {
            id: record.id,
            detections: record.detections.clone(),
            inference_duration_ms: record.inference_ms,
            sampled_at: timestamp::to_epoch_secs(record.sampled_at).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedBody {
    pub gps: GpsSampleBody,
    pub prediction: PredictionBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub cycles: u64,
    pub capture_failures: u64,
    pub inference_failures: u64,
    pub abandoned_requests: u64,
    pub camera_healthy: bool,
}

impl From<ArbiterStats> for HealthBody {
    fn from(stats: ArbiterStats) -> Self {
        Self {
            status: if stats.camera_healthy { "ok" } else { "degraded" },
            cycles: stats.cycles,
            capture_failures: stats.capture_failures,
            inference_failures: stats.inference_failures,
            abandoned_requests: stats.abandoned,
            camera_healthy: stats.camera_healthy,
        }
    }
}
