use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use std::sync::Arc;
use tracing::{error, info};

use super::manager::{FileManager, FileManagerError};
use super::types::{CreateModelRequest, CreateOutcome, ModelDetails};
use crate::descriptor::{validate_create_request, DescriptorError};
use crate::server::{ApiError, ApiResponse};

impl From<FileManagerError> for ApiError {
    fn from(err: FileManagerError) -> Self {
        let message = err.to_string();
        match err {
            FileManagerError::Validation(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, message).with_error("Validation Error")
            }
            FileManagerError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, message),
            FileManagerError::Descriptor(e) => descriptor_error(e),
            FileManagerError::Archive(e) => ApiError::new(StatusCode::BAD_GATEWAY, "Model archive could not be retrieved")
                .with_details(Some(e.to_string())),
            FileManagerError::Store(e) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Command could not be queued")
                .with_details(Some(e.to_string())),
            FileManagerError::Io { source, .. } => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, message).with_details(Some(source.to_string()))
            }
            FileManagerError::Interrupted(_) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, message),
            FileManagerError::UpdateFailed(cause) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, message).with_details(Some(cause.to_string()))
            }
        }
    }
}

fn descriptor_error(err: DescriptorError) -> ApiError {
    let message = err.to_string();
    match err {
        DescriptorError::InvalidJson(_) => ApiError::new(StatusCode::BAD_REQUEST, message).with_error("JSONDecodeError"),
        DescriptorError::Schema(_) => ApiError::new(StatusCode::BAD_REQUEST, message).with_error("Validation Error"),
        DescriptorError::NameConflict { .. } | DescriptorError::VersionConflict { .. } => {
            ApiError::new(StatusCode::CONFLICT, message)
        }
        DescriptorError::ModelNotFound { .. }
        | DescriptorError::DescriptorNotFound { .. }
        | DescriptorError::ArtifactNotFound { .. }
        | DescriptorError::ScriptFolderNotFound { .. }
        | DescriptorError::ScriptNotFound { .. } => ApiError::new(StatusCode::NOT_FOUND, message),
        DescriptorError::Io(_) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, message),
    }
}

/// Parses a create/update body, accepting it whatever the content type
fn parse_request(body: &[u8]) -> Result<CreateModelRequest, FileManagerError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| FileManagerError::Validation(format!("Request body is not valid JSON: {}", e)))?;
    validate_create_request(&value).map_err(|v| FileManagerError::Validation(v.to_string()))?;
    serde_json::from_value(value).map_err(|e| FileManagerError::Validation(e.to_string()))
}

type Reply<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

/// Returns the sorted model names
pub async fn list_models(State(manager): State<Arc<FileManager>>) -> Reply<Vec<String>> {
    let models = manager.list_models().map_err(|e| {
        error!("Failed to list models: {}", e);
        ApiError::from(e)
    })?;

    if models.is_empty() {
        return Ok((StatusCode::OK, Json(ApiResponse::success(models).with_message("No models are available"))));
    }
    Ok((StatusCode::OK, Json(ApiResponse::success(models))))
}

/// Returns the versions of a model and their files
pub async fn model_details(
    State(manager): State<Arc<FileManager>>,
    Path(name): Path<String>,
) -> Reply<ModelDetails> {
    let details = manager.model_details(&name)?;
    Ok((StatusCode::OK, Json(ApiResponse::success(details))))
}

/// Validates a model version on disk
pub async fn check_model(
    State(manager): State<Arc<FileManager>>,
    Path((name, version)): Path<(String, String)>,
) -> Reply<()> {
    info!("Check requested for model '{}/{}'", name, version);
    let message = manager.check_model(&name, &version)?;
    Ok((StatusCode::OK, Json(ApiResponse::message(message))))
}

/// Creates a model version from an archive
pub async fn create_model(State(manager): State<Arc<FileManager>>, body: Bytes) -> Reply<()> {
    let request = parse_request(&body)?;
    info!("Create requested for model '{}' version {}", request.name, request.version);

    match manager.create_model(request).await? {
        CreateOutcome::Accepted(msg) => Ok((StatusCode::CREATED, Json(ApiResponse::message(msg)))),
        CreateOutcome::Ready(msg) => Ok((StatusCode::OK, Json(ApiResponse::message(msg)))),
    }
}

/// Replaces a model version with a fresh download
pub async fn update_model(State(manager): State<Arc<FileManager>>, body: Bytes) -> Reply<()> {
    let request = parse_request(&body)?;
    info!("Update requested for model '{}' version {}", request.name, request.version);

    let message = manager.update_model(request).await?;
    Ok((StatusCode::OK, Json(ApiResponse::message(message))))
}

/// Removes every version of a model
pub async fn delete_model(State(manager): State<Arc<FileManager>>, Path(name): Path<String>) -> Reply<()> {
    let message = manager.delete_model(&name).await?;
    Ok((StatusCode::OK, Json(ApiResponse::message(message))))
}

/// Removes one version of a model
pub async fn delete_model_version(
    State(manager): State<Arc<FileManager>>,
    Path((name, version)): Path<(String, String)>,
) -> Reply<()> {
    let message = manager.delete_model_version(&name, &version).await?;
    Ok((StatusCode::OK, Json(ApiResponse::message(message))))
}

/// Builds the file manager's router
pub fn router(manager: FileManager) -> Router {
    Router::new()
        .route("/models/", get(list_models).post(create_model).put(update_model))
        .route("/models/{name}", get(model_details).delete(delete_model))
        .route("/models/{name}/{version}", delete(delete_model_version))
        .route("/models/check/{name}/{version}/", get(check_model))
        .with_state(Arc::new(manager))
}
