use axum::Json;
use tracing::debug;

use super::types::ApiResponse;

/// Returns a health check response
pub async fn health_check() -> Json<ApiResponse<()>> {
    debug!("Health check endpoint called");
    Json(ApiResponse::message("modelhub is running"))
}
