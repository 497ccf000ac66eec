// Registry service
//
// Registration, heartbeat, unregister and queries over one RegistryStore.
// Every store call goes through the retry policy; handlers never touch the
// store directly.

use std::sync::Arc;

use agentmesh_core::{
    Agent, AgentStatus, Candidate, RegistrationRequest, ThresholdPolicy, Tool, Topology,
    TopologyHash, ValidationError,
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::storage::retry::with_retry;
use crate::storage::{AgentRecord, RegistryStore, RetryPolicy, StoreError};

/// Errors surfaced by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Malformed registration; nothing was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("agent not found: {0}")]
    NotFound(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result of a full registration.
#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub agent_id: String,
    /// First registration for this agent ID.
    pub created: bool,
    pub topology: Topology,
    pub topology_hash: TopologyHash,
    pub timestamp: DateTime<Utc>,
}

/// Result of a lightweight heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    /// Resolved topology matches what the agent holds.
    Unchanged,
    /// Dependencies resolve differently; the agent must re-register.
    Changed,
    /// No record for this agent.
    Unknown,
}

/// Filters for listing agents.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AgentFilter {
    /// Only agents in this namespace.
    pub namespace: Option<String>,
    /// Only agents providing this capability.
    pub capability: Option<String>,
    /// Only agents with this status.
    pub status: Option<AgentStatus>,
    /// Match `capability` by case-insensitive substring.
    #[serde(default)]
    pub fuzzy: bool,
}

impl AgentFilter {
    fn matches(&self, record: &AgentRecord) -> bool {
        if let Some(namespace) = &self.namespace {
            if &record.namespace != namespace {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        match &self.capability {
            Some(wanted) if self.fuzzy => {
                let wanted = wanted.to_lowercase();
                record
                    .tools
                    .iter()
                    .any(|t| t.capability.to_lowercase().contains(&wanted))
            }
            Some(wanted) => record.tools.iter().any(|t| &t.capability == wanted),
            None => true,
        }
    }
}

/// Agent entry returned by GET /agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    pub namespace: String,
    pub endpoint: String,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub capabilities: Vec<String>,
    pub total_dependencies: usize,
    pub dependencies_resolved: usize,
}

pub struct RegistryService {
    store: Arc<dyn RegistryStore>,
    clock: Arc<dyn Clock + Send + Sync>,
    policy: ThresholdPolicy,
    retry: RetryPolicy,
}

impl RegistryService {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        clock: Arc<dyn Clock + Send + Sync>,
        policy: ThresholdPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            retry: RetryPolicy::storage_default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    /// Validate and store a full registration, then resolve the agent's
    /// dependencies against current providers.
    pub async fn register(&self, request: RegistrationRequest) -> RegistryResult<RegistrationOutcome> {
        let registration = request
            .validate(&self.policy, || Uuid::now_v7().to_string())
            .inspect_err(|e| tracing::warn!(error = %e, "Rejected malformed registration"))?;

        let now = self.clock.utc();
        let outcome = with_retry(&self.retry, "upsert_agent", || {
            self.store.upsert_agent(&registration, now)
        })
        .await?;

        let record = outcome.record;
        let (topology, topology_hash) = self.confirm_topology(&record.id, &record.tools).await?;

        tracing::info!(
            agent_id = %record.id,
            created = outcome.created,
            tools = record.tools.len(),
            dependencies = topology.total(),
            resolved = topology.resolved(),
            topology_hash = %topology_hash,
            "Agent registered"
        );

        Ok(RegistrationOutcome {
            agent_id: record.id,
            created: outcome.created,
            topology,
            topology_hash,
            timestamp: now,
        })
    }

    /// Refresh liveness and report whether the agent's topology moved.
    pub async fn heartbeat(
        &self,
        agent_id: &str,
        client_timestamp: Option<DateTime<Utc>>,
    ) -> RegistryResult<HeartbeatStatus> {
        let now = self.clock.utc();
        let heartbeat = with_retry(&self.retry, "record_heartbeat", || {
            self.store.record_heartbeat(agent_id, client_timestamp, now)
        })
        .await?;

        let Some(heartbeat) = heartbeat else {
            tracing::debug!(agent_id, "Heartbeat from unknown agent");
            return Ok(HeartbeatStatus::Unknown);
        };

        if heartbeat.stale {
            tracing::debug!(agent_id, "Stale heartbeat timestamp; status not advanced");
        } else if heartbeat.previous_status != heartbeat.status {
            tracing::info!(
                agent_id,
                from = %heartbeat.previous_status,
                to = %heartbeat.status,
                "Agent recovered"
            );
        }

        let Some(stored_hash) = heartbeat.topology_hash else {
            return Ok(HeartbeatStatus::Changed);
        };

        let generation =
            with_retry(&self.retry, "topology_generation", || self.store.topology_generation())
                .await?;
        if heartbeat.topology_generation == generation {
            return Ok(HeartbeatStatus::Unchanged);
        }

        // Provider set moved since the hash was confirmed; recompute.
        let record = with_retry(&self.retry, "get_agent", || self.store.get_agent(agent_id)).await?;
        let Some(record) = record else {
            return Ok(HeartbeatStatus::Unknown);
        };
        let providers = self.providers().await?;
        let hash = Topology::resolve(&record.tools, &providers).hash();

        if hash.as_str() == stored_hash {
            with_retry(&self.retry, "confirm_topology", || {
                self.store.confirm_topology(agent_id, hash.as_str(), generation)
            })
            .await?;
            tracing::debug!(agent_id, generation, "Topology unchanged at new generation");
            Ok(HeartbeatStatus::Unchanged)
        } else {
            tracing::debug!(agent_id, generation, "Topology changed");
            Ok(HeartbeatStatus::Changed)
        }
    }

    /// Remove an agent. Returns whether a record existed.
    pub async fn unregister(&self, agent_id: &str) -> RegistryResult<bool> {
        let removed =
            with_retry(&self.retry, "delete_agent", || self.store.delete_agent(agent_id)).await?;
        if removed {
            tracing::info!(agent_id, "Agent unregistered");
        }
        Ok(removed)
    }

    pub async fn get(&self, agent_id: &str) -> RegistryResult<Agent> {
        let record = with_retry(&self.retry, "get_agent", || self.store.get_agent(agent_id)).await?;
        record
            .map(Agent::from)
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))
    }

    /// Current resolution for one agent, without touching its stored hash.
    pub async fn topology(&self, agent_id: &str) -> RegistryResult<Topology> {
        let agent = self.get(agent_id).await?;
        let providers = self.providers().await?;
        Ok(Topology::resolve(&agent.tools, &providers))
    }

    pub async fn list(&self, filter: &AgentFilter) -> RegistryResult<Vec<AgentSummary>> {
        let records = with_retry(&self.retry, "list_agents", || self.store.list_agents()).await?;
        let providers = self.providers().await?;

        Ok(records
            .into_iter()
            .filter(|r| filter.matches(r))
            .map(|r| {
                let resolved = Topology::resolve(&r.tools, &providers).resolved();
                summarize(r, resolved)
            })
            .collect())
    }

    pub async fn capabilities(&self) -> RegistryResult<Vec<String>> {
        Ok(with_retry(&self.retry, "list_capabilities", || self.store.list_capabilities()).await?)
    }

    async fn providers(&self) -> Result<Vec<Candidate>, StoreError> {
        with_retry(&self.retry, "list_providers", || self.store.list_providers()).await
    }

    /// Resolve `tools`, then record the hash at the generation read before
    /// the provider snapshot so a concurrent change is never masked.
    async fn confirm_topology(
        &self,
        agent_id: &str,
        tools: &[Tool],
    ) -> RegistryResult<(Topology, TopologyHash)> {
        let generation =
            with_retry(&self.retry, "topology_generation", || self.store.topology_generation())
                .await?;
        let providers = self.providers().await?;
        let topology = Topology::resolve(tools, &providers);
        let hash = topology.hash();

        with_retry(&self.retry, "confirm_topology", || {
            self.store.confirm_topology(agent_id, hash.as_str(), generation)
        })
        .await?;

        Ok((topology, hash))
    }
}

fn summarize(record: AgentRecord, dependencies_resolved: usize) -> AgentSummary {
    let agent = Agent::from(record);
    AgentSummary {
        capabilities: agent.capabilities(),
        total_dependencies: agent.total_dependencies(),
        dependencies_resolved,
        id: agent.id,
        name: agent.name,
        agent_type: agent.agent_type,
        namespace: agent.namespace,
        endpoint: agent.endpoint,
        status: agent.status,
        version: agent.version,
        last_heartbeat_at: agent.last_heartbeat_at,
        created_at: agent.created_at,
        updated_at: agent.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryRegistryStore;
    use crate::test_support::ManualClock;
    use agentmesh_core::DependencyStatus;
    use chrono::TimeDelta;
    use serde_json::json;

    fn service() -> (RegistryService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let service = RegistryService::new(
            Arc::new(InMemoryRegistryStore::new()),
            clock.clone(),
            ThresholdPolicy::default(),
        );
        (service, clock)
    }

    fn request(value: serde_json::Value) -> RegistrationRequest {
        serde_json::from_value(value).unwrap()
    }

    fn provider(id: &str, capability: &str, tags: &[&str]) -> RegistrationRequest {
        request(json!({
            "agent_id": id,
            "endpoint": format!("http://{id}:9000"),
            "tools": [{"function_name": format!("{id}_fn"), "capability": capability, "tags": tags}]
        }))
    }

    fn consumer(id: &str, dependency: serde_json::Value) -> RegistrationRequest {
        request(json!({
            "agent_id": id,
            "tools": [{"function_name": "consume", "capability": "consumer", "dependencies": [dependency]}]
        }))
    }

    #[tokio::test]
    async fn test_register_resolves_against_existing_providers() {
        let (service, _) = service();
        service.register(provider("p3", "weather", &["api", "fast"])).await.unwrap();

        let outcome = service
            .register(consumer("y", json!({"capability": "weather", "tags": ["api", "+fast"]})))
            .await
            .unwrap();

        assert!(outcome.created);
        let deps = &outcome.topology.dependencies()["consume"];
        assert_eq!(deps[0].status, DependencyStatus::Available);
        assert_eq!(deps[0].agent_id.as_deref(), Some("p3"));
        assert_eq!(deps[0].endpoint.as_deref(), Some("http://p3:9000"));
    }

    #[tokio::test]
    async fn test_register_generates_id_when_absent() {
        let (service, _) = service();
        let outcome = service.register(request(json!({"tools": []}))).await.unwrap();
        assert!(Uuid::parse_str(&outcome.agent_id).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_registration_is_not_applied() {
        let (service, _) = service();
        let err = service
            .register(request(json!({"agent_id": "bad", "tools": [
                {"function_name": "f", "capability": "x", "dependencies": [{"capability": "y", "version": "~>nope"}]}
            ]})))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
        assert!(matches!(service.get("bad").await, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_agent() {
        let (service, _) = service();
        assert_eq!(service.heartbeat("ghost", None).await.unwrap(), HeartbeatStatus::Unknown);
    }

    #[tokio::test]
    async fn test_heartbeat_unchanged_then_changed_when_provider_arrives() {
        let (service, clock) = service();
        service
            .register(consumer("a", json!("date_service")))
            .await
            .unwrap();

        clock.advance(TimeDelta::seconds(5));
        assert_eq!(service.heartbeat("a", None).await.unwrap(), HeartbeatStatus::Unchanged);

        service.register(provider("dates", "date_service", &[])).await.unwrap();

        clock.advance(TimeDelta::seconds(5));
        assert_eq!(service.heartbeat("a", None).await.unwrap(), HeartbeatStatus::Changed);
        assert_eq!(service.heartbeat("a", None).await.unwrap(), HeartbeatStatus::Changed);

        let outcome = service.register(consumer("a", json!("date_service"))).await.unwrap();
        assert_eq!(
            outcome.topology.dependencies()["consume"][0].agent_id.as_deref(),
            Some("dates")
        );
        assert_eq!(service.heartbeat("a", None).await.unwrap(), HeartbeatStatus::Unchanged);
    }

    #[tokio::test]
    async fn test_unrelated_registration_keeps_heartbeat_unchanged() {
        let (service, _) = service();
        service.register(provider("dates", "date_service", &[])).await.unwrap();
        service.register(consumer("a", json!("date_service"))).await.unwrap();

        service.register(provider("other", "unrelated", &[])).await.unwrap();
        assert_eq!(service.heartbeat("a", None).await.unwrap(), HeartbeatStatus::Unchanged);
    }

    #[tokio::test]
    async fn test_unregister_then_heartbeat_is_unknown() {
        let (service, _) = service();
        service.register(provider("p", "weather", &[])).await.unwrap();

        assert!(service.unregister("p").await.unwrap());
        assert!(!service.unregister("p").await.unwrap());
        assert_eq!(service.heartbeat("p", None).await.unwrap(), HeartbeatStatus::Unknown);
    }

    #[tokio::test]
    async fn test_list_filters_and_counts_resolved() {
        let (service, _) = service();
        service.register(provider("weather-1", "weather", &["api"])).await.unwrap();
        service
            .register(request(json!({
                "agent_id": "c",
                "namespace": "prod",
                "tools": [{"function_name": "f", "capability": "report", "dependencies": ["weather", "missing"]}]
            })))
            .await
            .unwrap();

        let all = service.list(&AgentFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let prod = service
            .list(&AgentFilter {
                namespace: Some("prod".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(prod.len(), 1);
        assert_eq!(prod[0].total_dependencies, 2);
        assert_eq!(prod[0].dependencies_resolved, 1);

        let fuzzy = service
            .list(&AgentFilter {
                capability: Some("WEATH".to_string()),
                fuzzy: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(fuzzy.len(), 1);
        assert_eq!(fuzzy[0].id, "weather-1");

        let exact = service
            .list(&AgentFilter {
                capability: Some("WEATH".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(exact.is_empty());
    }

    #[tokio::test]
    async fn test_capabilities_sorted_distinct() {
        let (service, _) = service();
        service.register(provider("a", "weather", &[])).await.unwrap();
        service.register(provider("b", "geo", &[])).await.unwrap();
        service.register(provider("c", "weather", &[])).await.unwrap();

        assert_eq!(service.capabilities().await.unwrap(), vec!["geo", "weather"]);
    }
}
