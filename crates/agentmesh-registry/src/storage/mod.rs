// Storage layer
//
// RegistryStore is the only shared mutable state in the registry. Every
// per-agent mutation is atomic for that agent alone; nothing here takes a
// lock spanning several agents.
//
// Decision: a global topology generation is bumped on every change to the
// provider set (registration, removal, moves into or out of healthy). Agents
// remember the generation their topology hash was confirmed at, so a
// heartbeat only re-resolves when the generation moved.

mod memory;
pub mod retry;
mod sql;

pub use memory::InMemoryRegistryStore;
pub use retry::RetryPolicy;
pub use sql::SqlRegistryStore;

use std::sync::Arc;

use agentmesh_core::{Agent, AgentStatus, Candidate, HealthThresholds, Registration, Tool};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Concurrency conflict (optimistic update lost against a concurrent writer)
    #[error("concurrency conflict on agent {0}")]
    Conflict(String),

    /// Connection could not be established or was lost
    #[error("connection error: {0}")]
    Connection(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Connection(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Stored agent row with its tools.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub agent_type: Option<String>,
    pub namespace: String,
    pub endpoint: String,
    pub version: Option<String>,
    pub status: AgentStatus,
    pub thresholds: HealthThresholds,
    pub metadata: Option<serde_json::Value>,
    /// Server receive time of the last accepted heartbeat.
    pub last_heartbeat_at: DateTime<Utc>,
    /// Latest client-supplied timestamp, used to detect stale heartbeats.
    pub client_timestamp: Option<DateTime<Utc>>,
    /// Hash the agent was last served.
    pub topology_hash: Option<String>,
    /// Generation at which `topology_hash` was last confirmed.
    pub topology_generation: u64,
    /// Monotonic sequence assigned when the record was created.
    pub registration_seq: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tools: Vec<Tool>,
}

impl AgentRecord {
    pub(crate) fn from_registration(
        registration: &Registration,
        registration_seq: i64,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: registration.agent_id.clone(),
            name: registration.name.clone(),
            agent_type: registration.agent_type.clone(),
            namespace: registration.namespace.clone(),
            endpoint: registration.endpoint.clone(),
            version: registration.version.clone(),
            status: AgentStatus::Healthy,
            thresholds: registration.thresholds,
            metadata: registration.metadata.clone(),
            last_heartbeat_at: now,
            client_timestamp: registration.client_timestamp,
            topology_hash: None,
            topology_generation: 0,
            registration_seq,
            created_at,
            updated_at: now,
            tools: registration.tools.clone(),
        }
    }

    /// Provider entries for this agent's tools.
    pub fn candidates(&self) -> impl Iterator<Item = Candidate> + '_ {
        self.tools.iter().enumerate().map(|(position, tool)| Candidate {
            agent_id: self.id.clone(),
            namespace: self.namespace.clone(),
            endpoint: self.endpoint.clone(),
            function_name: tool.function_name.clone(),
            capability: tool.capability.clone(),
            version: tool.version.clone(),
            tags: tool.tags.clone(),
            registration_seq: self.registration_seq,
            position: position as u32,
        })
    }

    /// Guard matching this record's current status and liveness.
    pub fn guard(&self) -> StatusGuard {
        StatusGuard {
            status: self.status,
            last_heartbeat_at: self.last_heartbeat_at,
        }
    }
}

impl From<AgentRecord> for Agent {
    fn from(record: AgentRecord) -> Self {
        Agent {
            id: record.id,
            name: record.name,
            agent_type: record.agent_type,
            namespace: record.namespace,
            endpoint: record.endpoint,
            version: record.version,
            status: record.status,
            thresholds: record.thresholds,
            metadata: record.metadata,
            last_heartbeat_at: record.last_heartbeat_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
            tools: record.tools,
        }
    }
}

/// Result of inserting or replacing an agent.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub record: AgentRecord,
    /// No record with this ID existed before.
    pub created: bool,
}

/// Result of recording a heartbeat for a known agent.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatRecord {
    pub previous_status: AgentStatus,
    pub status: AgentStatus,
    /// Client timestamp was older than the stored one; status did not advance.
    pub stale: bool,
    pub topology_hash: Option<String>,
    pub topology_generation: u64,
}

/// Expected state for a conditional status change.
///
/// A monitor decision is applied only if the agent still has the status and
/// heartbeat time it was assessed with, so a concurrent heartbeat always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusGuard {
    pub status: AgentStatus,
    pub last_heartbeat_at: DateTime<Utc>,
}

/// Registry storage backend.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Insert or wholesale replace an agent and its tools.
    ///
    /// Sets status to healthy and `last_heartbeat_at` to `now`, and bumps the
    /// topology generation.
    async fn upsert_agent(
        &self,
        registration: &Registration,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Refresh liveness of one agent. `None` when the agent is unknown.
    async fn record_heartbeat(
        &self,
        agent_id: &str,
        client_timestamp: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<HeartbeatRecord>, StoreError>;

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, StoreError>;

    /// All agents ordered by registration sequence.
    async fn list_agents(&self) -> Result<Vec<AgentRecord>, StoreError>;

    /// Tools of healthy agents, ordered by (registration_seq, agent_id, position).
    async fn list_providers(&self) -> Result<Vec<Candidate>, StoreError>;

    /// Sorted distinct capability names offered by non-expired agents.
    async fn list_capabilities(&self) -> Result<Vec<String>, StoreError>;

    /// Remove an agent and its tools. Returns whether anything was removed.
    async fn delete_agent(&self, agent_id: &str) -> Result<bool, StoreError>;

    /// Change status if the agent still matches `guard`.
    async fn transition_status(
        &self,
        agent_id: &str,
        guard: StatusGuard,
        to: AgentStatus,
    ) -> Result<bool, StoreError>;

    /// Delete the agent if it still matches `guard`.
    async fn evict_agent(&self, agent_id: &str, guard: StatusGuard) -> Result<bool, StoreError>;

    /// Current topology generation.
    async fn topology_generation(&self) -> Result<u64, StoreError>;

    /// Record the hash served to an agent and the generation it reflects.
    ///
    /// Ignored if the stored generation is already newer.
    async fn confirm_topology(
        &self,
        agent_id: &str,
        topology_hash: &str,
        generation: u64,
    ) -> Result<bool, StoreError>;
}

/// Open the store named by a connection string.
///
/// `memory` selects the in-memory store; anything else is handed to the SQL
/// store (`sqlite:...` or `postgres://...`).
pub async fn connect(database_url: &str) -> Result<Arc<dyn RegistryStore>, StoreError> {
    if database_url.is_empty() || database_url.eq_ignore_ascii_case("memory") {
        tracing::info!("Using in-memory registry store");
        return Ok(Arc::new(InMemoryRegistryStore::new()));
    }

    let store = SqlRegistryStore::connect(database_url).await?;
    Ok(Arc::new(store))
}
