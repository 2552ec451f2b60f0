//! HTTP surface: GPS ingestion, telemetry queries, on-demand prediction and
//! the live stream.
//!
//! - `POST /gps`, `GET /gps`: ingest / latest GPS sample
//! - `GET /gps/latest?limit=N`, `GET /gps/all`
//! - `GET /predictions/latest?limit=N`, `GET /predictions/all`
//! - `GET /predict`: run one capture cycle, persist it, return the record
//! - `GET /combined`: latest GPS sample plus a fresh prediction, or an error
//! - `GET /stream`: multipart MJPEG
//! - `GET /health`: arbiter counters
//!
//! Older dashboards use the `/latest_gps_predictions`-style names; those are
//! served as aliases.

pub mod stream;
pub mod wire;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::arbiter::ArbiterHandle;
use crate::config::{QuerySettings, SightlineConfig, StreamSettings};
use crate::error::{CycleError, PredictError, StoreError, ValidationError};
use crate::recorder::record_prediction;
use crate::storage::{self, SharedStore};

use wire::{
    CombinedBody, GpsReadingBody, GpsSampleBody, HealthBody, LimitQuery, PredictionBody,
};

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub stream: StreamSettings,
    pub query: QuerySettings,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            stream: StreamSettings::default(),
            query: QuerySettings::default(),
        }
    }
}

impl From<&SightlineConfig> for ApiConfig {
    fn from(cfg: &SightlineConfig) -> Self {
        Self {
            addr: cfg.api_addr.clone(),
            stream: cfg.stream.clone(),
            query: cfg.query.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Errors
// ----------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    /// A `/combined` sub-call failed; no partial result is returned.
    #[error("{stage} stage failed: {source}")]
    Combined {
        stage: &'static str,
        source: Box<ApiError>,
    },
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Invalid(invalid) => Self::Validation(invalid),
            other => Self::Store(other),
        }
    }
}

impl From<PredictError> for ApiError {
    fn from(err: PredictError) -> Self {
        match err {
            PredictError::Cycle(err) => err.into(),
            PredictError::Store(err) => err.into(),
        }
    }
}

impl ApiError {
    fn combined(stage: &'static str, source: impl Into<ApiError>) -> Self {
        Self::Combined {
            stage,
            source: Box::new(source.into()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Cycle(CycleError::Capture(_)) | Self::Cycle(CycleError::Unavailable) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Cycle(CycleError::Inference(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Combined { source, .. } => source.status(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_request",
            Self::Store(StoreError::NotFound(_)) => "not_found",
            Self::Store(_) => "storage_failed",
            Self::Cycle(CycleError::Capture(_)) => "capture_failed",
            Self::Cycle(CycleError::Unavailable) => "capture_unavailable",
            Self::Cycle(CycleError::Inference(_)) => "inference_failed",
            Self::Combined { .. } => "combined_failed",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Combined { stage, source } => serde_json::json!({
                "error": self.code(),
                "stage": stage,
                "cause": source.code(),
                "detail": source.to_string(),
            }),
            Self::Validation(invalid) => serde_json::json!({
                "error": self.code(),
                "field": invalid.field,
                "detail": invalid.reason,
            }),
            _ => serde_json::json!({
                "error": self.code(),
                "detail": self.to_string(),
            }),
        };
        if status.is_server_error() {
            log::warn!("api: {} ({})", self, status);
        }
        (status, Json(body)).into_response()
    }
}

fn rejected_body(err: JsonRejection) -> ApiError {
    ApiError::Validation(ValidationError::new("body", err.body_text()))
}

fn rejected_query(err: QueryRejection) -> ApiError {
    ApiError::Validation(ValidationError::new("limit", err.body_text()))
}

// ----------------------------------------------------------------------------
// Server
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub(crate) struct AppState {
    arbiter: ArbiterHandle,
    store: SharedStore,
    stream: StreamSettings,
    query: QuerySettings,
    cancel: CancellationToken,
}

pub struct ApiServer {
    cfg: ApiConfig,
    arbiter: ArbiterHandle,
    store: SharedStore,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    cancel: CancellationToken,
    join: Option<JoinHandle<std::io::Result<()>>>,
}

impl ApiHandle {
    /// Stop accepting connections, end live streams and wait for in-flight
    /// requests to finish.
    pub async fn stop(mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            join.await
                .context("api server task panicked")?
                .context("api server failed")?;
        }
        Ok(())
    }
}

impl Drop for ApiHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, arbiter: ArbiterHandle, store: SharedStore) -> Self {
        Self {
            cfg,
            arbiter,
            store,
        }
    }

    /// Build the routes. Live streams end when `cancel` fires.
    pub fn router(&self, cancel: CancellationToken) -> Router {
        let state = AppState {
            arbiter: self.arbiter.clone(),
            store: self.store.clone(),
            stream: self.cfg.stream.clone(),
            query: self.cfg.query.clone(),
            cancel,
        };

        Router::new()
            .route("/gps", get(get_gps).post(post_gps))
            .route("/gps/latest", get(latest_gps))
            .route("/gps/all", get(all_gps))
            .route("/predictions/latest", get(latest_predictions))
            .route("/predictions/all", get(all_predictions))
            .route("/predict", get(predict))
            .route("/combined", get(combined))
            .route("/stream", get(stream::live_stream))
            .route("/health", get(health))
            .route("/latest_gps_predictions", get(latest_gps))
            .route("/all_gps_predictions", get(all_gps))
            .route("/latest_predictions", get(latest_predictions))
            .route("/all_predictions", get(all_predictions))
            .route("/combined_predictions", get(combined))
            .route("/video_feed", get(stream::live_stream))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind and serve on the current runtime. The server stops when the
    /// returned handle is stopped or `cancel` (or a parent) is cancelled.
    pub async fn spawn(self, cancel: CancellationToken) -> Result<ApiHandle> {
        let listener = tokio::net::TcpListener::bind(&self.cfg.addr)
            .await
            .with_context(|| format!("failed to bind {}", self.cfg.addr))?;
        let addr = listener.local_addr()?;

        let cancel = cancel.child_token();
        let app = self.router(cancel.clone());
        let shutdown = cancel.clone();
        let join = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        });

        log::info!("api listening on http://{}", addr);
        Ok(ApiHandle {
            addr,
            cancel,
            join: Some(join),
        })
    }
}

fn resolve_limit(settings: &QuerySettings, requested: Option<usize>) -> Result<usize, ApiError> {
    let limit = requested.unwrap_or(settings.default_limit);
    if limit == 0 || limit > settings.max_limit {
        return Err(ValidationError::new(
            "limit",
            format!("{} is outside 1..={}", limit, settings.max_limit),
        )
        .into());
    }
    Ok(limit)
}

// ----------------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------------

async fn post_gps(
    State(state): State<AppState>,
    payload: Result<Json<GpsReadingBody>, JsonRejection>,
) -> Result<Json<GpsSampleBody>, ApiError> {
    let Json(body) = payload.map_err(rejected_body)?;
    let reading = body.into_reading()?;
    let sample = storage::run_blocking(&state.store, move |store| store.insert_gps(&reading)).await?;
    log::debug!("api: stored gps sample {}", sample.id);
    Ok(Json(GpsSampleBody::from(&sample)))
}

async fn get_gps(State(state): State<AppState>) -> Result<Json<GpsSampleBody>, ApiError> {
    let sample = storage::run_blocking(&state.store, |store| store.latest_gps()).await?;
    Ok(Json(GpsSampleBody::from(&sample)))
}

async fn latest_gps(
    State(state): State<AppState>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Vec<GpsSampleBody>>, ApiError> {
    let Query(query) = query.map_err(rejected_query)?;
    let limit = resolve_limit(&state.query, query.limit)?;
    let samples =
        storage::run_blocking(&state.store, move |store| store.latest_gps_samples(limit)).await?;
    Ok(Json(samples.iter().map(GpsSampleBody::from).collect()))
}

async fn all_gps(State(state): State<AppState>) -> Result<Json<Vec<GpsSampleBody>>, ApiError> {
    let samples = storage::run_blocking(&state.store, |store| store.all_gps()).await?;
    Ok(Json(samples.iter().map(GpsSampleBody::from).collect()))
}

async fn latest_predictions(
    State(state): State<AppState>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Vec<PredictionBody>>, ApiError> {
    let Query(query) = query.map_err(rejected_query)?;
    let limit = resolve_limit(&state.query, query.limit)?;
    let records =
        storage::run_blocking(&state.store, move |store| store.latest_predictions(limit)).await?;
    Ok(Json(records.iter().map(PredictionBody::from).collect()))
}

async fn all_predictions(
    State(state): State<AppState>,
) -> Result<Json<Vec<PredictionBody>>, ApiError> {
    let records = storage::run_blocking(&state.store, |store| store.all_predictions()).await?;
    Ok(Json(records.iter().map(PredictionBody::from).collect()))
}

async fn predict(State(state): State<AppState>) -> Result<Json<PredictionBody>, ApiError> {
    let record = record_prediction(&state.arbiter, &state.store).await?;
    log::info!(
        "api: stored prediction {} ({} detections)",
        record.id,
        record.detections.len()
    );
    Ok(Json(PredictionBody::from(&record)))
}

/// GPS is read first; without a GPS sample no cycle is run and nothing is
/// persisted.
async fn combined(State(state): State<AppState>) -> Result<Json<CombinedBody>, ApiError> {
    let gps = storage::run_blocking(&state.store, |store| store.latest_gps())
        .await
        .map_err(|err| ApiError::combined("gps", err))?;
    let record = record_prediction(&state.arbiter, &state.store)
        .await
        .map_err(|err| ApiError::combined("prediction", err))?;
    Ok(Json(CombinedBody {
        gps: GpsSampleBody::from(&gps),
        prediction: PredictionBody::from(&record),
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    Json(HealthBody::from(state.arbiter.stats()))
}
