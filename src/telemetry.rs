//! Telemetry records.
//!
//! `GpsReading` and `Prediction` are what gets written; the store assigns an
//! id and hands back the immutable `GpsSample` / `PredictionRecord`. Sample
//! instants are normalized to whole UTC seconds on construction so a record
//! reads back exactly as it was written.

use chrono::{DateTime, Utc};

use crate::detect::Detection;
use crate::error::ValidationError;
use crate::timestamp;

#[derive(Clone, Debug, PartialEq)]
pub struct GpsReading {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub sampled_at: DateTime<Utc>,
}

impl GpsReading {
    pub fn new(
        latitude: f64,
        longitude: f64,
        altitude: f64,
        sampled_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let reading = Self {
            latitude,
            longitude,
            altitude,
            sampled_at: timestamp::normalize(sampled_at),
        };
        reading.validate()?;
        Ok(reading)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ValidationError::new(
                "latitude",
                format!("{} is outside [-90, 90]", self.latitude),
            ));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ValidationError::new(
                "longitude",
                format!("{} is outside [-180, 180]", self.longitude),
            ));
        }
        if !self.altitude.is_finite() {
            return Err(ValidationError::new("altitude", "must be a finite number"));
        }
        timestamp::ensure_in_range(self.sampled_at)
    }
}

/// A stored GPS sample.
#[derive(Clone, Debug, PartialEq)]
pub struct GpsSample {
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub sampled_at: DateTime<Utc>,
}

impl GpsSample {
    pub fn from_reading(id: i64, reading: &GpsReading) -> Self {
        Self {
            id,
            latitude: reading.latitude,
            longitude: reading.longitude,
            altitude: reading.altitude,
            sampled_at: reading.sampled_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub detections: Vec<Detection>,
    pub inference_ms: f64,
    pub sampled_at: DateTime<Utc>,
}

impl Prediction {
    pub fn new(detections: Vec<Detection>, inference_ms: f64, sampled_at: DateTime<Utc>) -> Self {
        Self {
            detections,
            inference_ms,
            sampled_at: timestamp::normalize(sampled_at),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.inference_ms.is_finite() || self.inference_ms < 0.0 {
            return Err(ValidationError::new(
                "inferenceDurationMs",
                format!("{} is not a non-negative duration", self.inference_ms),
            ));
        }
        for detection in &self.detections {
            detection.validate()?;
        }
        timestamp::ensure_in_range(self.sampled_at)
    }
}

/// A stored prediction.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictionRecord {
    pub id: i64,
    pub detections: Vec<Detection>,
    pub inference_ms: f64,
    pub sampled_at: DateTime<Utc>,
}

impl PredictionRecord {
    pub fn from_prediction(id: i64, prediction: &Prediction) -> Self {
        Self {
            id,
            detections: prediction.detections.clone(),
            inference_ms: prediction.inference_ms,
            sampled_at: prediction.sampled_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gps_reading_rejects_out_of_range_coordinates() {
        let at = timestamp::from_epoch_secs(1_700_000_000).unwrap();
        assert_eq!(
            GpsReading::new(91.0, 0.0, 0.0, at).unwrap_err().field,
            "latitude"
        );
        assert_eq!(
            GpsReading::new(0.0, -180.5, 0.0, at).unwrap_err().field,
            "longitude"
        );
        assert_eq!(
            GpsReading::new(0.0, 0.0, f64::NAN, at).unwrap_err().field,
            "altitude"
        );
        assert!(GpsReading::new(12.97, 77.59, 920.0, at).is_ok());
    }

    #[test]
    fn prediction_validates_detections() {
        let at = timestamp::now();
        let bad_box = Prediction::new(vec![Detection::new("car", 0.5, [10, 10, 5, 20])], 3.0, at);
        assert_eq!(bad_box.validate().unwrap_err().field, "detection.box");

        let bad_conf = Prediction::new(vec![Detection::new("car", 1.5, [0, 0, 5, 5])], 3.0, at);
        assert_eq!(bad_conf.validate().unwrap_err().field, "detection.confidence");

        let negative = Prediction::new(Vec::new(), -1.0, at);
        assert!(negative.validate().is_err());

        let ok = Prediction::new(vec![Detection::new("car", 0.5, [0, 0, 5, 5])], 3.0, at);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn prediction_instant_is_normalized() {
        let at = DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();
        let prediction = Prediction::new(Vec::new(), 1.0, at);
        assert_eq!(prediction.sampled_at.timestamp_subsec_nanos(), 0);
    }
}
