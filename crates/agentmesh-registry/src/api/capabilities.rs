// Capability listing HTTP route

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};

use super::common::{registry_error, ApiError, ErrorResponse};
use crate::services::RegistryService;

/// App state for capabilities routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RegistryService>,
}

impl AppState {
    pub fn new(service: Arc<RegistryService>) -> Self {
        Self { service }
    }
}

/// Create capability routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/capabilities", get(list_capabilities))
        .with_state(state)
}

/// GET /capabilities - Distinct capability names currently provided
#[utoipa::path(
    get,
    path = "/capabilities",
    responses(
        (status = 200, description = "Sorted capability names", body = Vec<String>),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "capabilities"
)]
pub async fn list_capabilities(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, ApiError> {
    let capabilities = state
        .service
        .capabilities()
        .await
        .map_err(|e| registry_error("list capabilities", e))?;

    Ok(Json(capabilities))
}
