// SQL registry store (sqlx Any driver)
//
// One implementation for SQLite and PostgreSQL. Timestamps are stored as
// epoch milliseconds and structured tool fields as JSON text, so the schema
// only uses types both engines agree on.
//
// Decision: per-agent transactions; the only cross-agent row is registry_state
// Decision: heartbeats are compare-and-set on (status, last_heartbeat_at); a lost race is a Conflict and is retried by the caller

use std::collections::HashMap;
use std::time::Duration;

use agentmesh_core::health::{affects_topology, on_heartbeat, HeartbeatState};
use agentmesh_core::{AgentStatus, Candidate, HealthThresholds, Registration, Tool};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::AnyPoolOptions;
use sqlx::{Any, AnyPool, FromRow, Transaction};

use super::{
    AgentRecord, HeartbeatRecord, RegistryStore, StatusGuard, StoreError, UpsertOutcome,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS registry_state (
        id BIGINT PRIMARY KEY,
        topology_generation BIGINT NOT NULL,
        registration_seq BIGINT NOT NULL
    )
    "#,
    r#"
    INSERT INTO registry_state (id, topology_generation, registration_seq)
    VALUES (1, 0, 0)
    ON CONFLICT (id) DO NOTHING
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        agent_type TEXT,
        namespace TEXT NOT NULL,
        endpoint TEXT NOT NULL,
        version TEXT,
        status TEXT NOT NULL,
        timeout_threshold BIGINT NOT NULL,
        eviction_threshold BIGINT NOT NULL,
        metadata TEXT,
        last_heartbeat_at BIGINT NOT NULL,
        client_timestamp BIGINT,
        topology_hash TEXT,
        topology_generation BIGINT NOT NULL,
        registration_seq BIGINT NOT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tools (
        agent_id TEXT NOT NULL,
        position BIGINT NOT NULL,
        function_name TEXT NOT NULL,
        capability TEXT NOT NULL,
        version TEXT NOT NULL,
        tags TEXT NOT NULL,
        description TEXT,
        dependencies TEXT NOT NULL,
        additional_properties TEXT NOT NULL,
        PRIMARY KEY (agent_id, position)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tools_capability ON tools (capability)",
    "CREATE INDEX IF NOT EXISTS idx_agents_status ON agents (status)",
];

const AGENT_COLUMNS: &str = "id, name, agent_type, namespace, endpoint, version, status, \
     timeout_threshold, eviction_threshold, metadata, last_heartbeat_at, client_timestamp, \
     topology_hash, topology_generation, registration_seq, created_at, updated_at";

const TOOL_COLUMNS: &str = "agent_id, position, function_name, capability, version, tags, \
     description, dependencies, additional_properties";

#[derive(Debug, Clone, FromRow)]
struct AgentRow {
    id: String,
    name: String,
    agent_type: Option<String>,
    namespace: String,
    endpoint: String,
    version: Option<String>,
    status: String,
    timeout_threshold: i64,
    eviction_threshold: i64,
    metadata: Option<String>,
    last_heartbeat_at: i64,
    client_timestamp: Option<i64>,
    topology_hash: Option<String>,
    topology_generation: i64,
    registration_seq: i64,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, Clone, FromRow)]
struct ToolRow {
    agent_id: String,
    function_name: String,
    capability: String,
    version: String,
    tags: String,
    description: Option<String>,
    dependencies: String,
    additional_properties: String,
}

#[derive(Debug, Clone, FromRow)]
struct ProviderRow {
    agent_id: String,
    namespace: String,
    endpoint: String,
    registration_seq: i64,
    position: i64,
    function_name: String,
    capability: String,
    version: String,
    tags: String,
}

#[derive(Debug, Clone, FromRow)]
struct HeartbeatRow {
    status: String,
    last_heartbeat_at: i64,
    client_timestamp: Option<i64>,
    topology_hash: Option<String>,
    topology_generation: i64,
}

/// Registry store backed by SQLite or PostgreSQL.
#[derive(Clone)]
pub struct SqlRegistryStore {
    pool: AnyPool,
}

impl SqlRegistryStore {
    /// Connect and create the schema if missing.
    ///
    /// `sqlite::memory:` keeps a single pinned connection so the database
    /// survives for the life of the pool.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        sqlx::any::install_default_drivers();

        let in_memory = database_url.contains(":memory:");
        let options = if in_memory {
            AnyPoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            AnyPoolOptions::new().max_connections(10)
        };

        let pool = options
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(in_memory, "SQL registry store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await.map_err(db_err)?;
        }
        Ok(())
    }

    async fn tools_for(&self, agent_id: &str) -> Result<Vec<Tool>, StoreError> {
        let rows = sqlx::query_as::<_, ToolRow>(&format!(
            "SELECT {TOOL_COLUMNS} FROM tools WHERE agent_id = $1 ORDER BY position"
        ))
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(tool_from_row).collect()
    }
}

async fn bump_generation(tx: &mut Transaction<'_, Any>) -> Result<(), StoreError> {
    sqlx::query("UPDATE registry_state SET topology_generation = topology_generation + 1 WHERE id = 1")
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    Ok(())
}

async fn next_registration_seq(tx: &mut Transaction<'_, Any>) -> Result<i64, StoreError> {
    let row: (i64,) = sqlx::query_as(
        "UPDATE registry_state SET registration_seq = registration_seq + 1 WHERE id = 1 RETURNING registration_seq",
    )
    .fetch_one(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(row.0)
}

#[async_trait]
impl RegistryStore for SqlRegistryStore {
    async fn upsert_agent(
        &self,
        registration: &Registration,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let existing: Option<(i64, i64)> =
            sqlx::query_as("SELECT registration_seq, created_at FROM agents WHERE id = $1")
                .bind(&registration.agent_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;

        let created = existing.is_none();
        let (seq, created_at) = match existing {
            Some((seq, created_at)) => (seq, from_millis(created_at)?),
            None => (next_registration_seq(&mut tx).await?, now),
        };

        let record = AgentRecord::from_registration(registration, seq, created_at, now);
        let metadata = record
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(&format!(
            r#"
            INSERT INTO agents ({AGENT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NULL, 0, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                name = $2,
                agent_type = $3,
                namespace = $4,
                endpoint = $5,
                version = $6,
                status = $7,
                timeout_threshold = $8,
                eviction_threshold = $9,
                metadata = $10,
                last_heartbeat_at = $11,
                client_timestamp = $12,
                topology_hash = NULL,
                topology_generation = 0,
                updated_at = $15
            "#
        ))
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.agent_type)
        .bind(&record.namespace)
        .bind(&record.endpoint)
        .bind(&record.version)
        .bind(record.status.as_str())
        .bind(record.thresholds.timeout_threshold as i64)
        .bind(record.thresholds.eviction_threshold as i64)
        .bind(metadata)
        .bind(record.last_heartbeat_at.timestamp_millis())
        .bind(record.client_timestamp.map(|t| t.timestamp_millis()))
        .bind(record.registration_seq)
        .bind(record.created_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM tools WHERE agent_id = $1")
            .bind(&record.id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        for (position, tool) in record.tools.iter().enumerate() {
            sqlx::query(&format!(
                "INSERT INTO tools ({TOOL_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
            ))
            .bind(&record.id)
            .bind(position as i64)
            .bind(&tool.function_name)
            .bind(&tool.capability)
            .bind(&tool.version)
            .bind(serde_json::to_string(&tool.tags)?)
            .bind(&tool.description)
            .bind(serde_json::to_string(&tool.dependencies)?)
            .bind(serde_json::to_string(&tool.additional_properties)?)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        bump_generation(&mut tx).await?;
        tx.commit().await.map_err(db_err)?;

        Ok(UpsertOutcome { record, created })
    }

    async fn record_heartbeat(
        &self,
        agent_id: &str,
        client_timestamp: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<HeartbeatRecord>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query_as::<_, HeartbeatRow>(
            "SELECT status, last_heartbeat_at, client_timestamp, topology_hash, topology_generation \
             FROM agents WHERE id = $1",
        )
        .bind(agent_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let previous_status = parse_status(&row.status)?;
        let stored_client = row.client_timestamp.map(from_millis).transpose()?;
        let update = on_heartbeat(
            HeartbeatState {
                status: previous_status,
                last_heartbeat_at: from_millis(row.last_heartbeat_at)?,
                client_timestamp: stored_client,
            },
            client_timestamp,
            now,
        );

        if update.stale {
            tx.commit().await.map_err(db_err)?;
            return Ok(Some(HeartbeatRecord {
                previous_status,
                status: previous_status,
                stale: true,
                topology_hash: row.topology_hash,
                topology_generation: to_generation(row.topology_generation),
            }));
        }

        let result = sqlx::query(
            "UPDATE agents SET status = $1, last_heartbeat_at = $2, client_timestamp = $3 \
             WHERE id = $4 AND status = $5 AND last_heartbeat_at = $6",
        )
        .bind(update.status.as_str())
        .bind(update.last_heartbeat_at.timestamp_millis())
        .bind(update.client_timestamp.map(|t| t.timestamp_millis()))
        .bind(agent_id)
        .bind(previous_status.as_str())
        .bind(row.last_heartbeat_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(agent_id.to_string()));
        }

        if affects_topology(previous_status, update.status) {
            bump_generation(&mut tx).await?;
        }
        tx.commit().await.map_err(db_err)?;

        Ok(Some(HeartbeatRecord {
            previous_status,
            status: update.status,
            stale: update.stale,
            topology_hash: row.topology_hash,
            topology_generation: to_generation(row.topology_generation),
        }))
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, StoreError> {
        let row = sqlx::query_as::<_, AgentRow>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1"
        ))
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => {
                let tools = self.tools_for(agent_id).await?;
                Ok(Some(record_from_row(row, tools)?))
            }
            None => Ok(None),
        }
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>, StoreError> {
        let rows = sqlx::query_as::<_, AgentRow>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents ORDER BY registration_seq, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let tool_rows = sqlx::query_as::<_, ToolRow>(&format!(
            "SELECT {TOOL_COLUMNS} FROM tools ORDER BY agent_id, position"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut tools_by_agent: HashMap<String, Vec<Tool>> = HashMap::new();
        for row in tool_rows {
            let agent_id = row.agent_id.clone();
            tools_by_agent
                .entry(agent_id)
                .or_default()
                .push(tool_from_row(row)?);
        }

        rows.into_iter()
            .map(|row| {
                let tools = tools_by_agent.remove(&row.id).unwrap_or_default();
                record_from_row(row, tools)
            })
            .collect()
    }

    async fn list_providers(&self) -> Result<Vec<Candidate>, StoreError> {
        let rows = sqlx::query_as::<_, ProviderRow>(
            r#"
            SELECT a.id AS agent_id, a.namespace, a.endpoint, a.registration_seq,
                   t.position, t.function_name, t.capability, t.version, t.tags
            FROM tools t
            JOIN agents a ON a.id = t.agent_id
            WHERE a.status = $1
            ORDER BY a.registration_seq, a.id, t.position
            "#,
        )
        .bind(AgentStatus::Healthy.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                Ok(Candidate {
                    agent_id: row.agent_id,
                    namespace: row.namespace,
                    endpoint: row.endpoint,
                    function_name: row.function_name,
                    capability: row.capability,
                    version: row.version,
                    tags: serde_json::from_str(&row.tags)?,
                    registration_seq: row.registration_seq,
                    position: row.position as u32,
                })
            })
            .collect()
    }

    async fn list_capabilities(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT t.capability
            FROM tools t
            JOIN agents a ON a.id = t.agent_id
            WHERE a.status <> $1
            ORDER BY t.capability
            "#,
        )
        .bind(AgentStatus::Expired.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(|(capability,)| capability).collect())
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let result = sqlx::query("DELETE FROM agents WHERE id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let removed = result.rows_affected() > 0;
        if removed {
            sqlx::query("DELETE FROM tools WHERE agent_id = $1")
                .bind(agent_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            bump_generation(&mut tx).await?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(removed)
    }

    async fn transition_status(
        &self,
        agent_id: &str,
        guard: StatusGuard,
        to: AgentStatus,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let result = sqlx::query(
            "UPDATE agents SET status = $1 WHERE id = $2 AND status = $3 AND last_heartbeat_at = $4",
        )
        .bind(to.as_str())
        .bind(agent_id)
        .bind(guard.status.as_str())
        .bind(guard.last_heartbeat_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let changed = result.rows_affected() > 0;
        if changed && affects_topology(guard.status, to) {
            bump_generation(&mut tx).await?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(changed)
    }

    async fn evict_agent(&self, agent_id: &str, guard: StatusGuard) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let result = sqlx::query(
            "DELETE FROM agents WHERE id = $1 AND status = $2 AND last_heartbeat_at = $3",
        )
        .bind(agent_id)
        .bind(guard.status.as_str())
        .bind(guard.last_heartbeat_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let removed = result.rows_affected() > 0;
        if removed {
            sqlx::query("DELETE FROM tools WHERE agent_id = $1")
                .bind(agent_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            bump_generation(&mut tx).await?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(removed)
    }

    async fn topology_generation(&self) -> Result<u64, StoreError> {
        let row: (i64,) =
            sqlx::query_as("SELECT topology_generation FROM registry_state WHERE id = 1")
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(to_generation(row.0))
    }

    async fn confirm_topology(
        &self,
        agent_id: &str,
        topology_hash: &str,
        generation: u64,
    ) -> Result<bool, StoreError> {
        let generation = i64::try_from(generation).unwrap_or(i64::MAX);
        let result = sqlx::query(
            "UPDATE agents SET topology_hash = $1, topology_generation = $2 \
             WHERE id = $3 AND topology_generation <= $2",
        )
        .bind(topology_hash)
        .bind(generation)
        .bind(agent_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn record_from_row(row: AgentRow, tools: Vec<Tool>) -> Result<AgentRecord, StoreError> {
    let thresholds = HealthThresholds::new(
        row.timeout_threshold.max(0) as u64,
        row.eviction_threshold.max(0) as u64,
    )
    .map_err(|e| StoreError::Serialization(format!("agent {}: {e}", row.id)))?;

    Ok(AgentRecord {
        status: parse_status(&row.status)?,
        thresholds,
        metadata: row.metadata.as_deref().map(serde_json::from_str).transpose()?,
        last_heartbeat_at: from_millis(row.last_heartbeat_at)?,
        client_timestamp: row.client_timestamp.map(from_millis).transpose()?,
        topology_hash: row.topology_hash,
        topology_generation: to_generation(row.topology_generation),
        registration_seq: row.registration_seq,
        created_at: from_millis(row.created_at)?,
        updated_at: from_millis(row.updated_at)?,
        id: row.id,
        name: row.name,
        agent_type: row.agent_type,
        namespace: row.namespace,
        endpoint: row.endpoint,
        version: row.version,
        tools,
    })
}

fn tool_from_row(row: ToolRow) -> Result<Tool, StoreError> {
    Ok(Tool {
        function_name: row.function_name,
        capability: row.capability,
        version: row.version,
        tags: serde_json::from_str(&row.tags)?,
        description: row.description,
        dependencies: serde_json::from_str(&row.dependencies)?,
        additional_properties: serde_json::from_str(&row.additional_properties)?,
    })
}

fn parse_status(s: &str) -> Result<AgentStatus, StoreError> {
    s.parse::<AgentStatus>()
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Serialization(format!("timestamp out of range: {ms}")))
}

fn to_generation(value: i64) -> u64 {
    value.max(0) as u64
}

/// Classify a sqlx error; lock contention and dropped connections are transient.
fn db_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => StoreError::Connection(e.to_string()),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // SQLITE_BUSY, SQLITE_LOCKED, serialization_failure, deadlock_detected
            Some("5") | Some("6") | Some("517") | Some("40001") | Some("40P01") => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Database(e.to_string()),
        },
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(e.to_string())
        }
        _ => StoreError::Database(e.to_string()),
    }
}
