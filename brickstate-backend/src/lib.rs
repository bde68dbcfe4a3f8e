pub mod config;
pub mod console;
pub mod consumers;
pub mod dispatch;
mod error;
pub mod events;
pub mod helpers;
pub mod host;
pub mod log_line;
pub mod matcher;
pub mod minigames;
pub mod players;
mod routes;
pub mod snapshot;
pub mod tracker;
mod validation;

pub use error::{ConsoleError, ConsumerError};
pub use events::{Event, EventKind};
pub use host::{ChunkOptions, Consumer, Host, Row, RowGroup};
pub use tracker::{JoinOutcome, PollOutcome, RetryPolicy, Tracker, TrackerOptions};

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct AppState<H> {
    pub tracker: Arc<Tracker<H>>,
}

/// Create the control API router around a running tracker
pub fn create_app<H: Host>(
    tracker: Arc<Tracker<H>>,
    request_body_limit: usize,
    request_timeout: Duration,
) -> Router {
    let state = Arc::new(AppState { tracker });

    // Subscriber registry (plugin-to-plugin surface)
    let subscription_routes = Router::new()
        .route("/subscribe", post(routes::subscribe::<H>))
        .route("/unsubscribe", post(routes::unsubscribe::<H>));

    // Lifecycle signals from the host
    let signal_routes = Router::new()
        .route("/leave", post(routes::leave::<H>))
        .route("/start", post(routes::start::<H>));

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/status", get(routes::status::<H>))
        .merge(subscription_routes)
        .merge(signal_routes)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(RequestBodyLimitLayer::new(request_body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
