//! HTTP + WebSocket API for proxlock
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /devices - Currently visible peripherals
//! - GET /links - Status of every link
//! - GET /links/{id} - Status of one link
//! - GET /links/{id}/history - Raw, smoothed or distance samples
//! - PUT /links/{id} - Create or replace a link configuration
//! - DELETE /links/{id} - Remove a link
//! - POST /links/{id}/evaluate - Force an evaluation
//! - POST /radio/events - Feed adapter callbacks from an external radio process
//! - WS /ws/transitions - Live Linked/Unlinked transitions
//! - WS /ws/devices - Batched registry updates

use std::time::{Duration, Instant};

use axum::{
    extract::{ws::{Message, WebSocket}, Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::{EngineHandle, UpdateBatcher};
use crate::error::{ConfigError, EngineError};
use crate::types::{
    window, LinkConfiguration, LinkId, LinkState, LinkStatus, LinkTransition, ObservedPeripheral, RadioEvent, RegistryEvent, Series,
    SignalSample,
};
use crate::{DEFAULT_HISTORY_MAX_SAMPLES, DEFAULT_HISTORY_RETENTION_SECS};

/// Device updates per WebSocket frame at most
const DEVICE_BATCH_CAPACITY: usize = 32;
/// Longest a device update waits before being sent
const DEVICE_BATCH_WINDOW: Duration = Duration::from_millis(250);

/// App state
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub links: usize,
    pub linked: usize,
}

/// History query parameters
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub series: Option<Series>,
    pub retention_secs: Option<u64>,
    pub max: Option<usize>,
}

/// History response
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub link: LinkId,
    pub series: Series,
    pub samples: Vec<SignalSample>,
}

/// Evaluation response
#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub link: LinkId,
    pub state: LinkState,
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: EngineError) -> ApiError {
    let status = match &e {
        EngineError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Config(ConfigError::UnknownLink(_)) => StatusCode::NOT_FOUND,
        EngineError::Config(_) => StatusCode::BAD_REQUEST,
    };
    (status, Json(ErrorResponse { error: e.to_string() }))
}

fn not_found(link: &LinkId) -> ApiError {
    api_error(EngineError::Config(ConfigError::UnknownLink(link.clone())))
}

/// Create the API router
pub fn create_router(engine: EngineHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/devices", get(list_devices))
        .route("/links", get(list_links))
        .route("/links/:id", get(get_link).put(put_link).delete(delete_link))
        .route("/links/:id/history", get(get_history))
        .route("/links/:id/evaluate", post(evaluate_link))
        .route("/radio/events", post(radio_event))
        .route("/ws/transitions", get(transitions_ws))
        .route("/ws/devices", get(devices_ws))
        .with_state(AppState { engine })
}

/// Health check endpoint
async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let links = state.engine.links().await.map_err(api_error)?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        links: links.len(),
        linked: links.iter().filter(|s| s.state.is_linked()).count(),
    }))
}

async fn list_devices(State(state): State<AppState>) -> Result<Json<Vec<ObservedPeripheral>>, ApiError> {
    state.engine.devices().await.map(Json).map_err(api_error)
}

async fn list_links(State(state): State<AppState>) -> Result<Json<Vec<LinkStatus>>, ApiError> {
    state.engine.links().await.map(Json).map_err(api_error)
}

async fn get_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LinkStatus>, ApiError> {
    let link = LinkId::from(id);
    state
        .engine
        .link(link.clone())
        .await
        .map_err(api_error)?
        .map(Json)
        .ok_or_else(|| not_found(&link))
}

/// Create or replace a link; answers with the status after its first evaluation
async fn put_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(config): Json<LinkConfiguration>,
) -> Result<Json<LinkStatus>, ApiError> {
    let link = LinkId::from(id);
    state
        .engine
        .configure_link(link.clone(), config)
        .await
        .map_err(api_error)?;
    get_link(State(state), Path(link.as_str().to_string())).await
}

async fn delete_link(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    state
        .engine
        .remove_link(LinkId::from(id))
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let link = LinkId::from(id);
    let series = query.series.unwrap_or(Series::Smoothed);
    let retention = window(query.retention_secs.unwrap_or(DEFAULT_HISTORY_RETENTION_SECS));
    let max = query.max.unwrap_or(DEFAULT_HISTORY_MAX_SAMPLES);

    let samples = state
        .engine
        .history(link.clone(), series, retention, max)
        .await
        .map_err(api_error)?
        .ok_or_else(|| not_found(&link))?;

    Ok(Json(HistoryResponse { link, series, samples }))
}

async fn evaluate_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EvaluateResponse>, ApiError> {
    let link = LinkId::from(id);
    let state = state.engine.evaluate(link.clone()).await.map_err(api_error)?;
    Ok(Json(EvaluateResponse { link, state }))
}

async fn radio_event(State(state): State<AppState>, Json(event): Json<RadioEvent>) -> Result<StatusCode, ApiError> {
    debug!(device = %event.device(), "radio event over http");
    state.engine.radio_event(event).map_err(api_error)?;
    Ok(StatusCode::ACCEPTED)
}

/// WebSocket handler for live transitions
async fn transitions_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Result<impl IntoResponse, ApiError> {
    let rx = state.engine.subscribe_transitions().await.map_err(api_error)?;
    Ok(ws.on_upgrade(move |socket| async move {
        let (sender, receiver) = socket.split();
        let forward = tokio::spawn(forward_transitions(sender, rx));
        drain_client(receiver).await;
        forward.abort();
    }))
}

/// WebSocket handler for batched device updates
async fn devices_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Result<impl IntoResponse, ApiError> {
    let rx = state.engine.subscribe_devices().await.map_err(api_error)?;
    Ok(ws.on_upgrade(move |socket| async move {
        let (sender, receiver) = socket.split();
        let forward = tokio::spawn(forward_devices(sender, rx));
        drain_client(receiver).await;
        forward.abort();
    }))
}

/// Clients only listen; returns once they go away
async fn drain_client(mut receiver: SplitStream<WebSocket>) {
    while let Some(Ok(msg)) = receiver.next().await {
        if let Message::Close(_) = msg {
            break;
        }
    }
    debug!("WebSocket connection closed");
}

async fn forward_transitions(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: broadcast::Receiver<LinkTransition>,
) {
    loop {
        match rx.recv().await {
            Ok(transition) => {
                let Ok(json) = serde_json::to_string(&transition) else {
                    continue;
                };
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "transition subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn forward_devices(mut sender: SplitSink<WebSocket, Message>, mut rx: broadcast::Receiver<RegistryEvent>) {
    let mut batcher = UpdateBatcher::new(DEVICE_BATCH_CAPACITY, DEVICE_BATCH_WINDOW);
    let mut tick = tokio::time::interval(DEVICE_BATCH_WINDOW);

    loop {
        let batch = tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => batcher.push(event, Instant::now()),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "device subscriber lagged");
                    None
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tick.tick() => batcher.is_due(Instant::now()).then(|| batcher.flush()),
        };

        if let Some(batch) = batch {
            let Ok(json) = serde_json::to_string(&batch) else {
                continue;
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    }
}

/// Run the API server
pub async fn run_server(addr: &str, engine: EngineHandle) -> Result<(), Box<dyn std::error::Error>> {
    let router = create_router(engine);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "proxlock API listening");
    axum::serve(listener, router).await?;
    Ok(())
}
