//! HTTP surface.
//!
//! JSON in and out. Every failure is answered as `{"error": "<message>"}`
//! with a status derived from [`ServiceError`].

use crate::service::{FaceService, ServiceError};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use facereg_core::QueryResult;
use facereg_store::FaceSummary;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Standard alphabet, padding optional.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const ENDPOINTS: [&str; 5] = ["/upload", "/match", "/faces", "/delete_face", "/health"];

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Map a body rejection; oversized bodies keep their 413.
    fn from_rejection(rejection: JsonRejection, message: &str) -> Self {
        tracing::debug!(error = %rejection.body_text(), "rejected request body");
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self {
                status: StatusCode::PAYLOAD_TOO_LARGE,
                message: rejection.body_text(),
            };
        }
        Self::bad_request(message)
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        let status = match &e {
            ServiceError::Validation(_)
            | ServiceError::Decode(_)
            | ServiceError::NoFaceDetected
            | ServiceError::EmptyFaceRegion => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::DetectionFailure(_)
            | ServiceError::ExtractionFailure(_)
            | ServiceError::EngineUnavailable(_)
            | ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %e, "request failed");
        }
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub image: String,
    pub name: String,
    pub orientation: String,
}

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    pub image: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub name: String,
}

/// Decode a base64 image, accepting an optional `data:<mime>;base64,` prefix.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, ApiError> {
    let encoded = payload.split_once(',').map_or(payload, |(_, data)| data);
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    let bytes = BASE64
        .decode(compact.as_bytes())
        .map_err(|_| ApiError::bad_request("Invalid base64 image data"))?;
    if bytes.is_empty() {
        return Err(ApiError::bad_request("Empty image data"));
    }
    Ok(bytes)
}

pub fn router(service: Arc<FaceService>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/match", post(match_face))
        .route("/faces", get(list_faces))
        .route("/delete_face", post(delete_face))
        .with_state(service)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn home(State(service): State<Arc<FaceService>>) -> Json<Value> {
    Json(json!({
        "message": "Face Recognition API is running",
        "endpoints": ENDPOINTS,
        "backend": service.backend(),
    }))
}

/// Report liveness and start loading the models in the background.
async fn health(State(service): State<Arc<FaceService>>) -> Json<Value> {
    let engine = Arc::clone(service.engine());
    if !engine.is_loaded() {
        tokio::spawn(async move {
            match engine.warm_up().await {
                Ok(()) => tracing::info!("models warmed up"),
                Err(e) => tracing::warn!(error = %e, "background warm-up failed"),
            }
        });
    }

    Json(json!({
        "status": "ok",
        "backend": service.backend(),
        "message": "Warm-up triggered",
    }))
}

async fn upload(
    State(service): State<Arc<FaceService>>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(req) = payload.map_err(|r| ApiError::from_rejection(r, "Incomplete data or invalid JSON"))?;
    let image = decode_image_payload(&req.image)?;

    service.enroll(image, &req.name, &req.orientation).await?;
    Ok(Json(json!({
        "message": "Face registered successfully",
        "name": req.name,
    })))
}

async fn match_face(
    State(service): State<Arc<FaceService>>,
    payload: Result<Json<MatchRequest>, JsonRejection>,
) -> ApiResult<QueryResult> {
    let Json(req) = payload.map_err(|r| ApiError::from_rejection(r, "No image data or invalid JSON"))?;
    let image = decode_image_payload(&req.image)?;

    Ok(Json(service.identify(image).await?))
}

async fn list_faces(State(service): State<Arc<FaceService>>) -> ApiResult<Vec<FaceSummary>> {
    Ok(Json(service.list_faces().await?))
}

async fn delete_face(
    State(service): State<Arc<FaceService>>,
    payload: Result<Json<DeleteRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(req) = payload.map_err(|r| ApiError::from_rejection(r, "Name is required"))?;

    let deleted = service.delete_face(&req.name).await?;
    Ok(Json(json!({
        "message": format!("Deleted {deleted} entries for {}", req.name),
    })))
}
