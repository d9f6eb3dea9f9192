//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - [`StreamError`]: everything that can go wrong between the recording device
//!   socket and a published prediction (connect, read, decode, shape, inference).
//! - [`AppError`]: errors returned by HTTP handlers, converted into JSON responses.
//!
//! ## Propagation policy:
//! - **Decode** errors are absorbed per chunk; ingestion keeps going.
//! - **Connect / Io** errors end the current session; a new start may succeed.
//! - **Shape / Inference** errors are misconfigurations of the fitted artifacts.
//!   Every following window would fail the same way, so they end the session too.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Failures of the capture → window → features → inference pipeline.
#[derive(Debug)]
pub enum StreamError {
    /// The TCP connection to the recording device could not be established
    Connect(String),

    /// Read/write failure on an established connection
    Io(std::io::Error),

    /// A chunk whose length is not a whole number of 4-byte samples
    Decode { len: usize },

    /// A vector or tensor did not have the length the fitted artifacts expect
    Shape {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The model runtime rejected the input or produced an unusable output
    Inference(String),
}

impl StreamError {
    /// Stable machine-readable code, used in state events and HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::Connect(_) => "connect_error",
            StreamError::Io(_) => "io_error",
            StreamError::Decode { .. } => "decode_error",
            StreamError::Shape { .. } => "shape_error",
            StreamError::Inference(_) => "inference_error",
        }
    }

    /// Whether this error must terminate the streaming session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StreamError::Decode { .. })
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Connect(msg) => write!(f, "Connect error: {}", msg),
            StreamError::Io(err) => write!(f, "I/O error: {}", err),
            StreamError::Decode { len } => write!(
                f,
                "Decode error: chunk of {} bytes is not a multiple of 4 ({} trailing bytes)",
                len,
                len % 4
            ),
            StreamError::Shape {
                context,
                expected,
                actual,
            } => write!(
                f,
                "Shape error in {}: expected {}, got {}",
                context, expected, actual
            ),
            StreamError::Inference(msg) => write!(f, "Inference error: {}", msg),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io(err)
    }
}

/// Candle errors can only come out of tensor construction or the forward pass.
impl From<candle_core::Error> for StreamError {
    fn from(err: candle_core::Error) -> Self {
        StreamError::Inference(err.to_string())
    }
}

/// Errors returned by HTTP handlers.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500)
/// - **BadRequest**: Client sent invalid data (400)
/// - **Conflict**: Request clashes with the current session state (409)
/// - **ConfigError**: Configuration problems (500)
/// - **ValidationError**: Data validation failed (400)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    Conflict(String),
    ConfigError(String),
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// Maps each variant to a status code and a JSON body:
///
/// ```json
/// { "error": { "type": "conflict", "message": "...", "timestamp": "..." } }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always caused by the client.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Malformed input from a client is a bad request; broken artifacts are internal.
impl From<StreamError> for AppError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Decode { .. } => AppError::BadRequest(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}
