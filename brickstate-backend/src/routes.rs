use crate::AppState;
use crate::error::AppError;
use crate::host::Host;
use crate::tracker::TrackerStatus;
use crate::validation;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub(crate) struct SubscriptionRequest {
    name: String,
}

#[derive(Serialize)]
pub(crate) struct SubscriptionResponse {
    name: String,
    subscribed: bool,
}

#[derive(Deserialize)]
pub(crate) struct LeaveRequest {
    player: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LeaveResponse {
    player: String,
    /// Display name of the minigame the player was removed from
    left_minigame: Option<String>,
}

pub(crate) async fn status<H: Host>(State(state): State<Arc<AppState<H>>>) -> Json<TrackerStatus> {
    Json(state.tracker.status().await)
}

pub(crate) async fn subscribe<H: Host>(
    State(state): State<Arc<AppState<H>>>,
    Json(payload): Json<SubscriptionRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_consumer_name(&payload.name)?;
    if state.tracker.is_shutting_down() {
        return Err(AppError::ShuttingDown);
    }

    let subscribed = state.tracker.subscribe(&payload.name).await;

    Ok((
        StatusCode::OK,
        Json(SubscriptionResponse {
            name: payload.name,
            subscribed,
        }),
    ))
}

pub(crate) async fn unsubscribe<H: Host>(
    State(state): State<Arc<AppState<H>>>,
    Json(payload): Json<SubscriptionRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_consumer_name(&payload.name)?;

    state.tracker.unsubscribe(&payload.name).await;

    Ok((
        StatusCode::OK,
        Json(SubscriptionResponse {
            name: payload.name,
            subscribed: false,
        }),
    ))
}

/// A player disconnected from the server.
pub(crate) async fn leave<H: Host>(
    State(state): State<Arc<AppState<H>>>,
    Json(payload): Json<LeaveRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_player_name(&payload.player)?;
    if state.tracker.is_shutting_down() {
        return Err(AppError::ShuttingDown);
    }

    let left = state.tracker.player_disconnected(&payload.player).await;

    Ok((
        StatusCode::OK,
        Json(LeaveResponse {
            player: payload.player,
            left_minigame: left.map(|event| event.minigame.display_name),
        }),
    ))
}

/// The game server (re)started.
pub(crate) async fn start<H: Host>(
    State(state): State<Arc<AppState<H>>>,
) -> Result<impl IntoResponse, AppError> {
    if state.tracker.is_shutting_down() {
        return Err(AppError::ShuttingDown);
    }

    state.tracker.server_started().await;

    Ok(StatusCode::OK)
}
