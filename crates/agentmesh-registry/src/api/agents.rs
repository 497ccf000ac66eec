// Agent query and management HTTP routes

use std::sync::Arc;

use std::collections::BTreeMap;

use agentmesh_core::{Agent, ResolvedDependency};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::common::{registry_error, ApiError, ErrorResponse};
use crate::services::{AgentFilter, AgentSummary, RegistryService};

/// Current resolution for one agent
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DependenciesResponse {
    pub agent_id: String,
    pub topology_hash: String,
    pub dependencies_resolved: BTreeMap<String, Vec<ResolvedDependency>>,
}

/// App state for agents routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RegistryService>,
}

impl AppState {
    pub fn new(service: Arc<RegistryService>) -> Self {
        Self { service }
    }
}

/// Create agent routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/agents", get(list_agents))
        .route("/agents/:agent_id", get(get_agent).delete(delete_agent))
        .route("/agents/:agent_id/dependencies", get(get_dependencies))
        .with_state(state)
}

/// GET /agents - List registered agents
#[utoipa::path(
    get,
    path = "/agents",
    params(AgentFilter),
    responses(
        (status = 200, description = "List of agents", body = Vec<AgentSummary>),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "agents"
)]
pub async fn list_agents(
    State(state): State<AppState>,
    Query(filter): Query<AgentFilter>,
) -> Result<Json<Vec<AgentSummary>>, ApiError> {
    let agents = state
        .service
        .list(&filter)
        .await
        .map_err(|e| registry_error("list agents", e))?;

    Ok(Json(agents))
}

/// GET /agents/{agent_id} - Get agent detail
#[utoipa::path(
    get,
    path = "/agents/{agent_id}",
    params(
        ("agent_id" = String, Path, description = "Agent ID")
    ),
    responses(
        (status = 200, description = "Agent found", body = Agent),
        (status = 404, description = "Agent not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "agents"
)]
pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Agent>, ApiError> {
    let agent = state
        .service
        .get(&agent_id)
        .await
        .map_err(|e| registry_error("get agent", e))?;

    Ok(Json(agent))
}

/// GET /agents/{agent_id}/dependencies - Resolve against current providers
///
/// Read-only: the agent's confirmed hash is left alone, so a pending 202 on
/// the next heartbeat is not swallowed.
#[utoipa::path(
    get,
    path = "/agents/{agent_id}/dependencies",
    params(
        ("agent_id" = String, Path, description = "Agent ID")
    ),
    responses(
        (status = 200, description = "Current resolution", body = DependenciesResponse),
        (status = 404, description = "Agent not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "agents"
)]
pub async fn get_dependencies(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<DependenciesResponse>, ApiError> {
    let topology = state
        .service
        .topology(&agent_id)
        .await
        .map_err(|e| registry_error("resolve dependencies", e))?;

    Ok(Json(DependenciesResponse {
        agent_id,
        topology_hash: topology.hash().into_inner(),
        dependencies_resolved: topology.into_dependencies(),
    }))
}

/// DELETE /agents/{agent_id} - Unregister an agent
///
/// Idempotent: deleting an unknown agent also returns 204.
#[utoipa::path(
    delete,
    path = "/agents/{agent_id}",
    params(
        ("agent_id" = String, Path, description = "Agent ID")
    ),
    responses(
        (status = 204, description = "Agent removed"),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "agents"
)]
pub async fn delete_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .unregister(&agent_id)
        .await
        .map_err(|e| registry_error("delete agent", e))?;

    Ok(StatusCode::NO_CONTENT)
}
