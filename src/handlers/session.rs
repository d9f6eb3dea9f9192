//! Session control: start, stop and inspect the streaming session.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

/// Optional device address overriding the configured one for a single start.
#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// POST /api/v1/session/start
///
/// 409 Conflict while a session is connecting or streaming.
pub async fn start_session(
    state: web::Data<AppState>,
    body: Option<web::Json<StartSessionRequest>>,
) -> Result<HttpResponse, AppError> {
    let request = body.map(|b| b.into_inner()).unwrap_or_default();

    let mut config = state.get_config();
    if let Some(host) = request.host {
        if host.trim().is_empty() {
            return Err(AppError::ValidationError("Device host cannot be empty".to_string()));
        }
        config.stream.host = host;
    }
    if let Some(port) = request.port {
        if port == 0 {
            return Err(AppError::ValidationError("Device port cannot be 0".to_string()));
        }
        config.stream.port = port;
    }

    let snapshot = state.sessions.start(config.clone()).await?;
    tracing::info!(
        session_id = snapshot.session_id.as_deref().unwrap_or_default(),
        host = %config.stream.host,
        port = config.stream.port,
        "Session start requested"
    );

    Ok(HttpResponse::Accepted().json(json!({
        "status": "starting",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "session": snapshot,
        "device": {
            "host": config.stream.host,
            "port": config.stream.port
        }
    })))
}

/// POST /api/v1/session/stop
pub async fn stop_session(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let snapshot = state.sessions.stop().await;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "session": snapshot
    })))
}

/// GET /api/v1/session
pub async fn get_session(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let snapshot = state.sessions.snapshot().await;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "session": snapshot,
        "last_prediction": state.metrics.last_prediction()
    })))
}
