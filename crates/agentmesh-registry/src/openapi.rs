// OpenAPI document generation
//
// Served by the registry at /api-doc/openapi.json with Swagger UI at /swagger-ui.

use agentmesh_core::{
    Agent, AgentStatus, DependencySpec, DependencyStatus, HealthThresholds, RegistrationRequest,
    ResolvedDependency, SelectorSpec, TagSpec, Tool, ToolSpec,
};
use utoipa::OpenApi;

use crate::api;
use crate::services::AgentSummary;

/// OpenAPI documentation for the registry API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::heartbeat::head_heartbeat,
        api::heartbeat::head_heartbeat_by_path,
        api::heartbeat::register_agent,
        api::agents::list_agents,
        api::agents::get_agent,
        api::agents::get_dependencies,
        api::agents::delete_agent,
        api::capabilities::list_capabilities,
        api::health::health,
        api::health::service_info,
    ),
    components(
        schemas(
            Agent, AgentStatus, HealthThresholds, Tool,
            RegistrationRequest, ToolSpec, DependencySpec, SelectorSpec, TagSpec,
            ResolvedDependency, DependencyStatus,
            AgentSummary,
            api::agents::DependenciesResponse,
            api::heartbeat::RegistrationResponse,
            api::health::HealthResponse,
            api::health::ServiceInfo,
            api::ErrorResponse,
        )
    ),
    tags(
        (name = "heartbeat", description = "Registration and liveness endpoints"),
        (name = "agents", description = "Agent query and management endpoints"),
        (name = "capabilities", description = "Capability discovery endpoints"),
        (name = "health", description = "Registry health endpoints")
    ),
    info(
        title = "Agentmesh Registry API",
        version = "0.2.0",
        description = "Service-mesh registry: agent registration, heartbeats, health monitoring and dependency resolution",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;
