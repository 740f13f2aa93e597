use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use super::service::{InferenceError, InferenceRequest, InferenceService, UploadedFile};
use crate::server::{ApiError, ApiResponse};

/// Uploads are images; the framework default is too small for them.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

impl From<InferenceError> for ApiError {
    fn from(err: InferenceError) -> Self {
        let status = match &err {
            InferenceError::ModelNotOnDisk { .. } | InferenceError::NotRegistered { .. } => StatusCode::NOT_FOUND,
            InferenceError::BadRequest(_)
            | InferenceError::InvalidTensorType { .. }
            | InferenceError::NotAMapping => StatusCode::BAD_REQUEST,
            InferenceError::InvalidOutputIndex { .. } => StatusCode::CONFLICT,
            InferenceError::Execution { .. } | InferenceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string()).with_details(err.details())
    }
}

/// Splits a request into file parts or a raw body
async fn read_request(request: Request) -> Result<InferenceRequest, ApiError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if !is_multipart {
        let body = Bytes::from_request(request, &())
            .await
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;
        return Ok(InferenceRequest::Body(body.to_vec()));
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;

    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?
    {
        if field.file_name().is_none() {
            continue;
        }
        let name = field.name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;
        files.push(UploadedFile { field: name, bytes: bytes.to_vec() });
    }
    Ok(InferenceRequest::Files(files))
}

/// Runs a model version on the request payload
pub async fn run_inference(
    State(service): State<Arc<InferenceService>>,
    Path((name, version)): Path<(String, String)>,
    request: Request,
) -> Response {
    let span = info_span!("inference", request_id = %Uuid::new_v4(), model = %format!("{}/{}", name, version));

    info!(parent: &span, "Inference requested");
    let request = match read_request(request).instrument(span.clone()).await {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    // Detached so tensor cleanup still runs if the client goes away
    let key = format!("{}/{}", name, version);
    let call = tokio::spawn(async move { service.infer(&name, &version, request).await }.instrument(span));

    match call.await {
        Ok(Ok(output)) => (StatusCode::OK, Json(ApiResponse::success(output))).into_response(),
        Ok(Err(e)) => ApiError::from(e).into_response(),
        Err(e) => ApiError::from(InferenceError::Internal { key, details: e.to_string() }).into_response(),
    }
}

/// Builds the inference service's router
pub fn router(service: InferenceService) -> Router {
    Router::new()
        .route("/inference/{name}/{version}/", get(run_inference).post(run_inference))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(Arc::new(service))
}
