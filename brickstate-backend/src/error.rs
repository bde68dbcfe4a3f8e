use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// API error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<String>,
}

impl ErrorResponse {
  pub fn new(error: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: None,
    }
  }

  pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: Some(details.into()),
    }
  }
}

/// Control API error type
#[derive(Debug)]
pub enum AppError {
  ValidationError(String),
  ShuttingDown,
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    match self {
      AppError::ValidationError(msg) => {
        tracing::warn!(validation_error = %msg, "Validation failed");
        let error_response = ErrorResponse::new(msg);
        (StatusCode::BAD_REQUEST, Json(error_response)).into_response()
      }
      AppError::ShuttingDown => {
        let error_response = ErrorResponse::with_details(
          "Service unavailable",
          "the tracker is shutting down",
        );
        (StatusCode::SERVICE_UNAVAILABLE, Json(error_response)).into_response()
      }
    }
  }
}

impl From<crate::validation::ValidationError> for AppError {
  fn from(err: crate::validation::ValidationError) -> Self {
    AppError::ValidationError(err.to_string())
  }
}

/// A consumer refused or failed to take an event.
#[derive(Debug, Error)]
pub enum ConsumerError {
  #[error("consumer '{0}' is unavailable")]
  Unavailable(String),

  #[error("consumer write failed: {0}")]
  Io(#[from] std::io::Error),

  #[error("event payload could not be encoded: {0}")]
  Encode(#[from] serde_json::Error),
}

/// Failures of the server process console.
#[derive(Debug, Error)]
pub enum ConsoleError {
  #[error("server command is empty")]
  EmptyCommand,

  #[error("failed to spawn server process: {0}")]
  Spawn(#[source] std::io::Error),

  #[error("server process has no {0} pipe")]
  MissingPipe(&'static str),

  #[error("console write failed: {0}")]
  Write(#[from] std::io::Error),
}
