//! Debug endpoints for validating the fitted artifacts without a recording device.

use actix_web::{web, HttpResponse, Result as ActixResult};
use serde::Serialize;

use crate::audio::decoder::{decode_chunk, Sample, SAMPLE_WIDTH};
use crate::error::AppError;
use crate::inference::PredictionResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    pub samples: usize,
    pub window_samples: usize,
    pub result: PredictionResult,
}

/// Classify one window of raw PCM
///
/// POST /api/v1/debug/classify
/// Body: little-endian i32 samples, at least one window long
pub async fn classify_pcm(
    state: web::Data<AppState>,
    body: web::Bytes,
) -> ActixResult<HttpResponse, AppError> {
    let window_samples = state.get_config().audio.window_samples();

    let samples: Vec<Sample> = decode_chunk(&body)?.collect();
    if samples.len() < window_samples {
        return Err(AppError::BadRequest(format!(
            "Need at least {} samples ({} bytes), got {}",
            window_samples,
            window_samples * SAMPLE_WIDTH,
            samples.len()
        )));
    }

    tracing::info!(samples = samples.len(), "Debug: classifying uploaded window");

    let pipeline = state.pipeline.clone();
    let count = samples.len();
    let result = web::block(move || pipeline.predict(&samples))
        .await
        .map_err(|e| AppError::Internal(format!("Inference task failed: {}", e)))??;

    tracing::info!(
        label = %result.label,
        confidence = result.confidence,
        processing_ms = result.processing_time_ms,
        "Debug: classification finished"
    );

    Ok(HttpResponse::Ok().json(ClassifyResponse {
        samples: count,
        window_samples,
        result,
    }))
}

/// Configuration for debug routes
pub fn configure_debug_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/debug")
            // Room for several windows of raw PCM.
            .app_data(web::PayloadConfig::new(8 * 1024 * 1024))
            .route("/classify", web::post().to(classify_pcm)),
    );
}
