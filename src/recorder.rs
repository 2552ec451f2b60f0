//! Periodic prediction recorder.
//!
//! Every interval the recorder asks the arbiter for a full cycle and appends
//! the resulting prediction to the store. The first recording happens at
//! startup. A failed tick is logged and counted; the next tick runs as usual.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::arbiter::{ArbiterHandle, CycleKind};
use crate::error::PredictError;
use crate::storage::{self, SharedStore};
use crate::telemetry::{Prediction, PredictionRecord};

/// Run one full capture cycle and persist its prediction.
pub async fn record_prediction(
    arbiter: &ArbiterHandle,
    store: &SharedStore,
) -> Result<PredictionRecord, PredictError> {
    let cycle = arbiter.run_cycle(CycleKind::Full).await?;
    let prediction = Prediction::new(cycle.detections, cycle.inference_ms, cycle.sampled_at);
    let record = storage::run_blocking(store, move |store| store.insert_prediction(&prediction)).await?;
    Ok(record)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub records_written: u64,
    pub failed_ticks: u64,
}

#[derive(Default)]
struct Counters {
    records_written: AtomicU64,
    failed_ticks: AtomicU64,
}

pub struct Recorder {
    arbiter: ArbiterHandle,
    store: SharedStore,
    interval: Duration,
}

/// Handle to a running recorder. Dropping it cancels the loop.
pub struct RecorderHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl Recorder {
    pub fn new(arbiter: ArbiterHandle, store: SharedStore, interval: Duration) -> Self {
        Self {
            arbiter,
            store,
            interval,
        }
    }

    /// Spawn the recording loop on the current runtime. The loop stops when
    /// the handle is stopped or `cancel` is cancelled.
    pub fn spawn(self, cancel: CancellationToken) -> RecorderHandle {
        let cancel = cancel.child_token();
        let counters = Arc::new(Counters::default());
        let task_counters = Arc::clone(&counters);
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            log::info!("Recorder: recording every {:?}", self.interval);
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                // A started recording runs to completion before cancellation is observed.
                match record_prediction(&self.arbiter, &self.store).await {
                    Ok(record) => {
                        task_counters.records_written.fetch_add(1, Ordering::Relaxed);
                        log::info!(
                            "Recorder: stored prediction {} ({} detections)",
                            record.id,
                            record.detections.len()
                        );
                    }
                    Err(err) => {
                        task_counters.failed_ticks.fetch_add(1, Ordering::Relaxed);
                        log::warn!("Recorder: tick failed: {}", err);
                    }
                }
            }

            log::info!(
                "Recorder: stopped ({} records, {} failed ticks)",
                task_counters.records_written.load(Ordering::Relaxed),
                task_counters.failed_ticks.load(Ordering::Relaxed)
            );
        });

        RecorderHandle {
            cancel,
            task: Some(task),
            counters,
        }
    }
}

impl RecorderHandle {
    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            records_written: self.counters.records_written.load(Ordering::Relaxed),
            failed_ticks: self.counters.failed_ticks.load(Ordering::Relaxed),
        }
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn stop(mut self) -> RecorderStats {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                log::error!("Recorder: task failed: {}", err);
            }
        }
        self.stats()
    }
}

impl Drop for RecorderHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
