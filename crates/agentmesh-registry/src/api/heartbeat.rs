// Heartbeat and registration HTTP routes
//
// HEAD is the cheap liveness ping and answers with a status code only.
// POST carries the full registration and answers with the resolved topology.

use std::collections::BTreeMap;
use std::sync::Arc;

use agentmesh_core::{RegistrationRequest, ResolvedDependency};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{head, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::common::{registry_error, ApiError, ErrorResponse};
use crate::services::{HeartbeatStatus, RegistryService};

/// Query for HEAD /heartbeat
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HeartbeatQuery {
    /// Agent sending the heartbeat.
    pub agent_id: String,
    /// Client send time (RFC 3339); older than the last one seen means stale.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Response to a full registration
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegistrationResponse {
    /// Always "success".
    #[schema(example = "success")]
    pub status: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// Fingerprint of `dependencies_resolved`.
    pub topology_hash: String,
    /// Resolution per consuming function, in declaration order.
    pub dependencies_resolved: BTreeMap<String, Vec<ResolvedDependency>>,
}

/// App state for heartbeat routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RegistryService>,
}

impl AppState {
    pub fn new(service: Arc<RegistryService>) -> Self {
        Self { service }
    }
}

/// Create heartbeat and registration routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/heartbeat", head(head_heartbeat).post(register_agent))
        .route("/heartbeat/:agent_id", head(head_heartbeat_by_path))
        .route("/register", post(register_agent))
        .with_state(state)
}

/// HEAD /heartbeat - Lightweight liveness ping
#[utoipa::path(
    head,
    path = "/heartbeat",
    params(HeartbeatQuery),
    responses(
        (status = 200, description = "Topology unchanged"),
        (status = 202, description = "Topology changed; re-register to fetch it"),
        (status = 410, description = "Unknown agent; register from scratch"),
        (status = 503, description = "Storage unavailable")
    ),
    tag = "heartbeat"
)]
pub async fn head_heartbeat(
    State(state): State<AppState>,
    Query(query): Query<HeartbeatQuery>,
) -> StatusCode {
    heartbeat_status(&state.service, &query.agent_id, query.timestamp).await
}

/// HEAD /heartbeat/{agent_id} - Lightweight liveness ping
#[utoipa::path(
    head,
    path = "/heartbeat/{agent_id}",
    params(
        ("agent_id" = String, Path, description = "Agent ID")
    ),
    responses(
        (status = 200, description = "Topology unchanged"),
        (status = 202, description = "Topology changed; re-register to fetch it"),
        (status = 410, description = "Unknown agent; register from scratch"),
        (status = 503, description = "Storage unavailable")
    ),
    tag = "heartbeat"
)]
pub async fn head_heartbeat_by_path(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> StatusCode {
    heartbeat_status(&state.service, &agent_id, None).await
}

async fn heartbeat_status(
    service: &RegistryService,
    agent_id: &str,
    timestamp: Option<DateTime<Utc>>,
) -> StatusCode {
    match service.heartbeat(agent_id, timestamp).await {
        Ok(HeartbeatStatus::Unchanged) => StatusCode::OK,
        Ok(HeartbeatStatus::Changed) => StatusCode::ACCEPTED,
        Ok(HeartbeatStatus::Unknown) => StatusCode::GONE,
        Err(e) => {
            tracing::error!(agent_id, error = %e, "Failed to record heartbeat");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// POST /heartbeat or /register - Full registration
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegistrationRequest,
    responses(
        (status = 201, description = "Agent registered", body = RegistrationResponse),
        (status = 200, description = "Agent registration replaced", body = RegistrationResponse),
        (status = 400, description = "Malformed registration", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "heartbeat"
)]
pub async fn register_agent(
    State(state): State<AppState>,
    Json(req): Json<RegistrationRequest>,
) -> Result<(StatusCode, Json<RegistrationResponse>), ApiError> {
    let outcome = state
        .service
        .register(req)
        .await
        .map_err(|e| registry_error("register agent", e))?;

    let (status, message) = if outcome.created {
        (StatusCode::CREATED, "Agent registered")
    } else {
        (StatusCode::OK, "Agent registration updated")
    };

    Ok((
        status,
        Json(RegistrationResponse {
            status: "success".to_string(),
            agent_id: outcome.agent_id,
            timestamp: outcome.timestamp,
            message: message.to_string(),
            topology_hash: outcome.topology_hash.into_inner(),
            dependencies_resolved: outcome.topology.into_dependencies(),
        }),
    ))
}
