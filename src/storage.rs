//! Telemetry persistence.
//!
//! GPS samples and prediction records live in two append-only SQLite tables.
//! `InMemoryTelemetryStore` mirrors the same contract for tests.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::detect::Detection;
use crate::error::StoreError;
use crate::telemetry::{GpsReading, GpsSample, Prediction, PredictionRecord};
use crate::timestamp;

/// Append-only GPS and prediction history.
///
/// "Latest" means highest id first. Every query returns most-recent-first.
/// Inserts are durable before they return. Implementations are shared between
/// the recorder and request handlers, so all methods take `&self`.
pub trait TelemetryStore: Send + Sync {
    fn insert_gps(&self, reading: &GpsReading) -> Result<GpsSample, StoreError>;

    /// Most recent GPS sample, or `StoreError::NotFound` on an empty store.
    fn latest_gps(&self) -> Result<GpsSample, StoreError>;

    fn latest_gps_samples(&self, limit: usize) -> Result<Vec<GpsSample>, StoreError>;

    fn all_gps(&self) -> Result<Vec<GpsSample>, StoreError>;

    fn insert_prediction(&self, prediction: &Prediction) -> Result<PredictionRecord, StoreError>;

    fn latest_predictions(&self, limit: usize) -> Result<Vec<PredictionRecord>, StoreError>;

    fn all_predictions(&self) -> Result<Vec<PredictionRecord>, StoreError>;
}

pub type SharedStore = Arc<dyn TelemetryStore>;

/// Run a store call on the blocking pool so async callers never wait on disk I/O.
pub async fn run_blocking<T, F>(store: &SharedStore, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn TelemetryStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

// ----------------------------------------------------------------------------
// SQLite
// ----------------------------------------------------------------------------

pub struct SqliteTelemetryStore {
    conn: Mutex<Connection>,
}

const GPS_COLUMNS: &str = "id, latitude, longitude, altitude, sample_date, sample_time";
const PREDICTION_COLUMNS: &str = "id, detections_json, inference_ms, sample_date, sample_time";

impl SqliteTelemetryStore {
    /// Open (or create) the database and ensure the schema is present.
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.lock()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;

            CREATE TABLE IF NOT EXISTS gps_samples (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              latitude REAL NOT NULL,
              longitude REAL NOT NULL,
              altitude REAL NOT NULL,
              sample_date TEXT NOT NULL,
              sample_time TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS prediction_records (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              detections_json TEXT NOT NULL,
              inference_ms REAL NOT NULL,
              sample_date TEXT NOT NULL,
              sample_time TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Task("sqlite connection lock poisoned".to_string()))
    }

    fn query_gps(&self, limit: Option<usize>) -> Result<Vec<GpsSample>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {GPS_COLUMNS} FROM gps_samples ORDER BY id DESC LIMIT ?1"
        ))?;
        let mut rows = stmt.query(params![sql_limit(limit)])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(gps_from_row(row)?);
        }
        Ok(out)
    }

    fn query_predictions(&self, limit: Option<usize>) -> Result<Vec<PredictionRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM prediction_records ORDER BY id DESC LIMIT ?1"
        ))?;
        let mut rows = stmt.query(params![sql_limit(limit)])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(prediction_from_row(row)?);
        }
        Ok(out)
    }
}

impl TelemetryStore for SqliteTelemetryStore {
    fn insert_gps(&self, reading: &GpsReading) -> Result<GpsSample, StoreError> {
        reading.validate()?;
        let (date, time) = timestamp::split(reading.sampled_at);
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO gps_samples(latitude, longitude, altitude, sample_date, sample_time)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                reading.latitude,
                reading.longitude,
                reading.altitude,
                date,
                time
            ],
        )?;
        Ok(GpsSample::from_reading(conn.last_insert_rowid(), reading))
    }

    fn latest_gps(&self) -> Result<GpsSample, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {GPS_COLUMNS} FROM gps_samples ORDER BY id DESC LIMIT 1"
        ))?;
        let raw = stmt
            .query_row([], |row| RawGpsRow::read(row))
            .optional()?
            .ok_or(StoreError::NotFound("GPS sample"))?;
        raw.into_sample()
    }

    fn latest_gps_samples(&self, limit: usize) -> Result<Vec<GpsSample>, StoreError> {
        self.query_gps(Some(limit))
    }

    fn all_gps(&self) -> Result<Vec<GpsSample>, StoreError> {
        self.query_gps(None)
    }

    fn insert_prediction(&self, prediction: &Prediction) -> Result<PredictionRecord, StoreError> {
        prediction.validate()?;
        let detections_json = serde_json::to_string(&prediction.detections)?;
        let (date, time) = timestamp::split(prediction.sampled_at);
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO prediction_records(detections_json, inference_ms, sample_date, sample_time)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![detections_json, prediction.inference_ms, date, time],
        )?;
        Ok(PredictionRecord::from_prediction(
            conn.last_insert_rowid(),
            prediction,
        ))
    }

    fn latest_predictions(&self, limit: usize) -> Result<Vec<PredictionRecord>, StoreError> {
        self.query_predictions(Some(limit))
    }

    fn all_predictions(&self) -> Result<Vec<PredictionRecord>, StoreError> {
        self.query_predictions(None)
    }
}

/// SQLite treats a negative LIMIT as "no limit".
fn sql_limit(limit: Option<usize>) -> i64 {
    limit
        .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
        .unwrap_or(-1)
}

struct RawGpsRow {
    id: i64,
    latitude: f64,
    longitude: f64,
    altitude: f64,
    date: String,
    time: String,
}

impl RawGpsRow {
    fn read(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            latitude: row.get(1)?,
            longitude: row.get(2)?,
            altitude: row.get(3)?,
            date: row.get(4)?,
            time: row.get(5)?,
        })
    }

    fn into_sample(self) -> Result<GpsSample, StoreError> {
        let sampled_at = timestamp::join(&self.date, &self.time).map_err(|e| StoreError::Corrupt {
            id: self.id,
            reason: e.to_string(),
        })?;
        Ok(GpsSample {
            id: self.id,
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            sampled_at,
        })
    }
}

fn gps_from_row(row: &Row<'_>) -> Result<GpsSample, StoreError> {
    RawGpsRow::read(row)?.into_sample()
}

fn prediction_from_row(row: &Row<'_>) -> Result<PredictionRecord, StoreError> {
    let id: i64 = row.get(0)?;
    let detections_json: String = row.get(1)?;
    let inference_ms: f64 = row.get(2)?;
    let date: String = row.get(3)?;
    let time: String = row.get(4)?;

    let detections: Vec<Detection> =
        serde_json::from_str(&detections_json).map_err(|e| StoreError::Corrupt {
            id,
            reason: format!("detections: {e}"),
        })?;
    let sampled_at = timestamp::join(&date, &time).map_err(|e| StoreError::Corrupt {
        id,
        reason: e.to_string(),
    })?;
    Ok(PredictionRecord {
        id,
        detections,
        inference_ms,
        sampled_at,
    })
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

/// Volatile store with the same ordering and validation rules as SQLite.
#[derive(Default)]
pub struct InMemoryTelemetryStore {
    inner: Mutex<InMemoryLogs>,
}

#[derive(Default)]
struct InMemoryLogs {
    gps: Vec<GpsSample>,
    predictions: Vec<PredictionRecord>,
}

impl InMemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, InMemoryLogs>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Task("in-memory store lock poisoned".to_string()))
    }
}

impl TelemetryStore for InMemoryTelemetryStore {
    fn insert_gps(&self, reading: &GpsReading) -> Result<GpsSample, StoreError> {
        reading.validate()?;
        let mut logs = self.lock()?;
        let sample = GpsSample::from_reading(logs.gps.len() as i64 + 1, reading);
        logs.gps.push(sample.clone());
        Ok(sample)
    }

    fn latest_gps(&self) -> Result<GpsSample, StoreError> {
        self.lock()?
            .gps
            .last()
            .cloned()
            .ok_or(StoreError::NotFound("GPS sample"))
    }

    fn latest_gps_samples(&self, limit: usize) -> Result<Vec<GpsSample>, StoreError> {
        Ok(self.lock()?.gps.iter().rev().take(limit).cloned().collect())
    }

    fn all_gps(&self) -> Result<Vec<GpsSample>, StoreError> {
        Ok(self.lock()?.gps.iter().rev().cloned().collect())
    }

    fn insert_prediction(&self, prediction: &Prediction) -> Result<PredictionRecord, StoreError> {
        prediction.validate()?;
        let mut logs = self.lock()?;
        let record = PredictionRecord::from_prediction(logs.predictions.len() as i64 + 1, prediction);
        logs.predictions.push(record.clone());
        Ok(record)
    }

    fn latest_predictions(&self, limit: usize) -> Result<Vec<PredictionRecord>, StoreError> {
        Ok(self
            .lock()?
            .predictions
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    fn all_predictions(&self) -> Result<Vec<PredictionRecord>, StoreError> {
        Ok(self.lock()?.predictions.iter().rev().cloned().collect())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn at(secs: i64) -> chrono::DateTime<chrono::Utc> {
        timestamp::from_epoch_secs(secs).unwrap()
    }

    fn reading(secs: i64) -> GpsReading {
        GpsReading::new(12.97, 77.59, 920.0, at(secs)).unwrap()
    }

    fn prediction(secs: i64, label: &str) -> Prediction {
        Prediction::new(vec![Detection::new(label, 0.87, [10, 20, 110, 220])], 42.5, at(secs))
    }

    fn each_store(check: impl Fn(&dyn TelemetryStore)) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("telemetry.db");
        let sqlite = SqliteTelemetryStore::open(db_path.to_str().unwrap()).unwrap();
        check(&sqlite);
        check(&InMemoryTelemetryStore::new());
    }

    #[test]
    fn latest_gps_on_empty_store_is_not_found() {
        each_store(|store| {
            assert!(matches!(store.latest_gps(), Err(StoreError::NotFound(_))));
            store.insert_gps(&reading(1_700_000_000)).unwrap();
            assert!(store.latest_gps().is_ok());
        });
    }

    #[test]
    fn gps_round_trips_exact_instant() {
        each_store(|store| {
            let written = store.insert_gps(&reading(1_700_000_000)).unwrap();
            let read = store.latest_gps().unwrap();
            assert_eq!(read, written);
            assert_eq!(timestamp::to_epoch_secs(read.sampled_at), 1_700_000_000);
        });
    }

    #[test]
    fn queries_are_most_recent_first() {
        each_store(|store| {
            for secs in [100, 200, 300] {
                store.insert_gps(&reading(secs)).unwrap();
                store.insert_prediction(&prediction(secs, "car")).unwrap();
            }

            let latest: Vec<i64> = store
                .latest_gps_samples(2)
                .unwrap()
                .iter()
                .map(|s| s.sampled_at.timestamp())
                .collect();
            assert_eq!(latest, vec![300, 200]);

            let all: Vec<i64> = store
                .all_predictions()
                .unwrap()
                .iter()
                .map(|p| p.sampled_at.timestamp())
                .collect();
            assert_eq!(all, vec![300, 200, 100]);

            assert_eq!(store.all_gps().unwrap().len(), 3);
            assert_eq!(store.latest_predictions(10).unwrap().len(), 3);
            assert!(store.latest_predictions(0).unwrap().is_empty());
        });
    }

    #[test]
    fn predictions_round_trip_detections() {
        each_store(|store| {
            let written = store.insert_prediction(&prediction(1_700_000_123, "pothole")).unwrap();
            let read = store.latest_predictions(1).unwrap().remove(0);
            assert_eq!(read, written);
            assert_eq!(read.detections[0].label, "pothole");
            assert_eq!(read.detections[0].bbox, [10, 20, 110, 220]);
        });
    }

    #[test]
    fn invalid_records_are_rejected_without_side_effects() {
        each_store(|store| {
            let bad = Prediction::new(vec![Detection::new("car", 2.0, [0, 0, 1, 1])], 1.0, at(5));
            assert!(matches!(store.insert_prediction(&bad), Err(StoreError::Invalid(_))));
            assert!(store.all_predictions().unwrap().is_empty());

            let mut bad_gps = reading(5);
            bad_gps.latitude = 120.0;
            assert!(matches!(store.insert_gps(&bad_gps), Err(StoreError::Invalid(_))));
            assert!(store.all_gps().unwrap().is_empty());
        });
    }

    #[test]
    fn sqlite_inserts_survive_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("telemetry.db");
        let path = db_path.to_str().unwrap();
        {
            let store = SqliteTelemetryStore::open(path).unwrap();
            store.insert_gps(&reading(1_700_000_000)).unwrap();
            store.insert_prediction(&prediction(1_700_000_001, "car")).unwrap();
        }
        let reopened = SqliteTelemetryStore::open(path).unwrap();
        assert_eq!(reopened.latest_gps().unwrap().sampled_at.timestamp(), 1_700_000_000);
        assert_eq!(reopened.all_predictions().unwrap().len(), 1);
    }

    #[test]
    fn concurrent_writers_each_get_a_row() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("telemetry.db");
        let store: SharedStore =
            Arc::new(SqliteTelemetryStore::open(db_path.to_str().unwrap()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store.insert_gps(&reading(1_000 + i)).unwrap();
                    store.latest_gps_samples(5).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.all_gps().unwrap().len(), 8);
    }
}
