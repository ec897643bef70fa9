use axum::{
    extract::{State, WebSocketUpgrade},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::channel::{serve_socket, RadioChannel};
use crate::rotation::{RotationEngine, RotationSnapshot};

// --- Configuration & State ---

#[derive(Clone)]
pub struct AppState {
    pub channel: RadioChannel,
}

impl AppState {
    fn engine(&self) -> &Arc<RotationEngine> {
        self.channel.engine()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    #[serde(flatten)]
    rotation: RotationSnapshot,
    listeners: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    pool_size: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/radio/ws", get(radio_socket))
        .route("/radio/status", get(radio_status))
        .route("/radio/refresh", post(refresh_pool))
        .with_state(state)
}

/// Upgrades to the radio websocket; the connection becomes a listener.
async fn radio_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state.channel))
}

async fn radio_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusBody {
        rotation: state.engine().snapshot(),
        listeners: state.channel.listener_count(),
    })
}

/// Reloads the rotation pool, e.g. after tracks were added to the catalog.
async fn refresh_pool(State(state): State<AppState>) -> impl IntoResponse {
    let pool_size = state.engine().refresh_pool().await;
    info!("Rotation pool refreshed on request ({} tracks)", pool_size);
    Json(RefreshBody { pool_size })
}
