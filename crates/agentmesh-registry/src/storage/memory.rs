// In-memory registry store
// Decision: DashMap gives per-shard locking; each operation touches one entry
// Decision: Counters are atomics, never read under an entry lock that could block another agent

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use agentmesh_core::health::{affects_topology, on_heartbeat, HeartbeatState};
use agentmesh_core::{AgentStatus, Candidate, Registration};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{
    AgentRecord, HeartbeatRecord, RegistryStore, StatusGuard, StoreError, UpsertOutcome,
};

/// In-memory store for single-node use and tests.
/// All data is lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryRegistryStore {
    agents: DashMap<String, AgentRecord>,
    generation: AtomicU64,
    registration_seq: AtomicI64,
}

impl InMemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn next_registration_seq(&self) -> i64 {
        self.registration_seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistryStore {
    async fn upsert_agent(
        &self,
        registration: &Registration,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let (record, created) = match self.agents.entry(registration.agent_id.clone()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get();
                let record = AgentRecord::from_registration(
                    registration,
                    existing.registration_seq,
                    existing.created_at,
                    now,
                );
                entry.insert(record.clone());
                (record, false)
            }
            Entry::Vacant(entry) => {
                let record = AgentRecord::from_registration(
                    registration,
                    self.next_registration_seq(),
                    now,
                    now,
                );
                entry.insert(record.clone());
                (record, true)
            }
        };

        self.bump_generation();
        Ok(UpsertOutcome { record, created })
    }

    async fn record_heartbeat(
        &self,
        agent_id: &str,
        client_timestamp: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<HeartbeatRecord>, StoreError> {
        let outcome = {
            let Some(mut record) = self.agents.get_mut(agent_id) else {
                return Ok(None);
            };

            let previous_status = record.status;
            let update = on_heartbeat(
                HeartbeatState {
                    status: previous_status,
                    last_heartbeat_at: record.last_heartbeat_at,
                    client_timestamp: record.client_timestamp,
                },
                client_timestamp,
                now,
            );

            record.last_heartbeat_at = update.last_heartbeat_at;
            record.status = update.status;
            record.client_timestamp = update.client_timestamp;

            HeartbeatRecord {
                previous_status,
                status: record.status,
                stale: update.stale,
                topology_hash: record.topology_hash.clone(),
                topology_generation: record.topology_generation,
            }
        };

        if affects_topology(outcome.previous_status, outcome.status) {
            self.bump_generation();
        }
        Ok(Some(outcome))
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, StoreError> {
        Ok(self.agents.get(agent_id).map(|r| r.value().clone()))
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>, StoreError> {
        let mut records: Vec<AgentRecord> =
            self.agents.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| {
            a.registration_seq
                .cmp(&b.registration_seq)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    async fn list_providers(&self) -> Result<Vec<Candidate>, StoreError> {
        let mut providers: Vec<Candidate> = self
            .agents
            .iter()
            .filter(|r| r.status.is_provider())
            .flat_map(|r| r.value().candidates().collect::<Vec<_>>())
            .collect();
        providers.sort_by(|a, b| {
            a.registration_seq
                .cmp(&b.registration_seq)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
                .then_with(|| a.position.cmp(&b.position))
        });
        Ok(providers)
    }

    async fn list_capabilities(&self) -> Result<Vec<String>, StoreError> {
        let mut capabilities: Vec<String> = self
            .agents
            .iter()
            .filter(|r| r.status != AgentStatus::Expired)
            .flat_map(|r| {
                r.tools
                    .iter()
                    .map(|t| t.capability.clone())
                    .collect::<Vec<_>>()
            })
            .collect();
        capabilities.sort();
        capabilities.dedup();
        Ok(capabilities)
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<bool, StoreError> {
        let removed = self.agents.remove(agent_id).is_some();
        if removed {
            self.bump_generation();
        }
        Ok(removed)
    }

    async fn transition_status(
        &self,
        agent_id: &str,
        guard: StatusGuard,
        to: AgentStatus,
    ) -> Result<bool, StoreError> {
        let changed = {
            let Some(mut record) = self.agents.get_mut(agent_id) else {
                return Ok(false);
            };
            if record.guard() != guard {
                return Ok(false);
            }
            record.status = to;
            true
        };

        if changed && affects_topology(guard.status, to) {
            self.bump_generation();
        }
        Ok(changed)
    }

    async fn evict_agent(&self, agent_id: &str, guard: StatusGuard) -> Result<bool, StoreError> {
        let removed = self
            .agents
            .remove_if(agent_id, |_, record| record.guard() == guard)
            .is_some();
        if removed {
            self.bump_generation();
        }
        Ok(removed)
    }

    async fn topology_generation(&self) -> Result<u64, StoreError> {
        Ok(self.generation.load(Ordering::SeqCst))
    }

    async fn confirm_topology(
        &self,
        agent_id: &str,
        topology_hash: &str,
        generation: u64,
    ) -> Result<bool, StoreError> {
        let Some(mut record) = self.agents.get_mut(agent_id) else {
            return Ok(false);
        };
        if record.topology_generation > generation {
            return Ok(false);
        }
        record.topology_hash = Some(topology_hash.to_string());
        record.topology_generation = generation;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_core::{RegistrationRequest, ThresholdPolicy};
    use chrono::{TimeDelta, TimeZone};
    use serde_json::json;

    fn registration(value: serde_json::Value) -> Registration {
        serde_json::from_value::<RegistrationRequest>(value)
            .unwrap()
            .validate(&ThresholdPolicy::default(), || "unused".to_string())
            .unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_creates_then_replaces() {
        let store = InMemoryRegistryStore::new();
        let reg = registration(json!({
            "agent_id": "weather",
            "tools": [{"function_name": "get_weather", "capability": "weather"}]
        }));

        let first = store.upsert_agent(&reg, t0()).await.unwrap();
        assert!(first.created);
        assert_eq!(first.record.status, AgentStatus::Healthy);
        assert_eq!(store.topology_generation().await.unwrap(), 1);

        let later = t0() + TimeDelta::seconds(30);
        let reg2 = registration(json!({
            "agent_id": "weather",
            "tools": [{"function_name": "forecast", "capability": "forecast"}]
        }));
        let second = store.upsert_agent(&reg2, later).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.record.created_at, t0());
        assert_eq!(second.record.registration_seq, first.record.registration_seq);
        assert_eq!(second.record.tools.len(), 1);
        assert_eq!(second.record.tools[0].function_name, "forecast");
        assert_eq!(store.topology_generation().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_agent() {
        let store = InMemoryRegistryStore::new();
        assert!(store
            .record_heartbeat("ghost", None, t0())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_recovers_and_bumps_generation() {
        let store = InMemoryRegistryStore::new();
        let reg = registration(json!({"agent_id": "a1", "tools": []}));
        let record = store.upsert_agent(&reg, t0()).await.unwrap().record;

        assert!(store
            .transition_status("a1", record.guard(), AgentStatus::Degraded)
            .await
            .unwrap());
        let generation = store.topology_generation().await.unwrap();

        let hb = store
            .record_heartbeat("a1", None, t0() + TimeDelta::seconds(90))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hb.previous_status, AgentStatus::Degraded);
        assert_eq!(hb.status, AgentStatus::Healthy);
        assert_eq!(store.topology_generation().await.unwrap(), generation + 1);
    }

    #[tokio::test]
    async fn test_last_heartbeat_never_moves_backward() {
        let store = InMemoryRegistryStore::new();
        let reg = registration(json!({"agent_id": "a1"}));
        store.upsert_agent(&reg, t0()).await.unwrap();

        store
            .record_heartbeat("a1", None, t0() - TimeDelta::seconds(5))
            .await
            .unwrap();
        let record = store.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(record.last_heartbeat_at, t0());
    }

    #[tokio::test]
    async fn test_stale_heartbeat_leaves_record_untouched() {
        let store = InMemoryRegistryStore::new();
        let reg = registration(json!({"agent_id": "a1", "timestamp": "2026-03-01T09:00:10Z"}));
        let record = store.upsert_agent(&reg, t0()).await.unwrap().record;
        assert!(store
            .transition_status("a1", record.guard(), AgentStatus::Degraded)
            .await
            .unwrap());
        let degraded = store.get_agent("a1").await.unwrap().unwrap();
        let generation = store.topology_generation().await.unwrap();

        let client = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let hb = store
            .record_heartbeat("a1", Some(client), t0() + TimeDelta::seconds(35))
            .await
            .unwrap()
            .unwrap();
        assert!(hb.stale);
        assert_eq!(hb.status, AgentStatus::Degraded);

        let after = store.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(after.last_heartbeat_at, t0());
        assert_eq!(after.guard(), degraded.guard());
        assert_eq!(store.topology_generation().await.unwrap(), generation);
    }

    #[tokio::test]
    async fn test_guarded_transition_loses_to_heartbeat() {
        let store = InMemoryRegistryStore::new();
        let reg = registration(json!({"agent_id": "a1"}));
        let record = store.upsert_agent(&reg, t0()).await.unwrap().record;
        let stale_guard = record.guard();

        store
            .record_heartbeat("a1", None, t0() + TimeDelta::seconds(1))
            .await
            .unwrap();

        assert!(!store
            .transition_status("a1", stale_guard, AgentStatus::Degraded)
            .await
            .unwrap());
        assert!(!store.evict_agent("a1", stale_guard).await.unwrap());
        assert!(store.get_agent("a1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_providers_only_from_healthy_agents_in_order() {
        let store = InMemoryRegistryStore::new();
        let first = registration(json!({"agent_id": "zz", "tools": [
            {"function_name": "a", "capability": "cap"},
            {"function_name": "b", "capability": "cap"}
        ]}));
        let second = registration(json!({"agent_id": "aa", "tools": [
            {"function_name": "c", "capability": "cap"}
        ]}));
        store.upsert_agent(&first, t0()).await.unwrap();
        let aa = store.upsert_agent(&second, t0()).await.unwrap().record;

        let providers = store.list_providers().await.unwrap();
        let order: Vec<(&str, &str)> = providers
            .iter()
            .map(|c| (c.agent_id.as_str(), c.function_name.as_str()))
            .collect();
        assert_eq!(order, vec![("zz", "a"), ("zz", "b"), ("aa", "c")]);

        store
            .transition_status("aa", aa.guard(), AgentStatus::Degraded)
            .await
            .unwrap();
        assert_eq!(store.list_providers().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_capabilities_exclude_expired() {
        let store = InMemoryRegistryStore::new();
        let live = registration(json!({"agent_id": "live", "tools": [
            {"function_name": "f", "capability": "weather"},
            {"function_name": "g", "capability": "geo"}
        ]}));
        let gone = registration(json!({"agent_id": "gone", "tools": [
            {"function_name": "h", "capability": "time"}
        ]}));
        store.upsert_agent(&live, t0()).await.unwrap();
        let gone = store.upsert_agent(&gone, t0()).await.unwrap().record;
        store
            .transition_status("gone", gone.guard(), AgentStatus::Expired)
            .await
            .unwrap();

        assert_eq!(
            store.list_capabilities().await.unwrap(),
            vec!["geo".to_string(), "weather".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = InMemoryRegistryStore::new();
        let reg = registration(json!({"agent_id": "a1"}));
        store.upsert_agent(&reg, t0()).await.unwrap();
        let generation = store.topology_generation().await.unwrap();

        assert!(store.delete_agent("a1").await.unwrap());
        assert!(!store.delete_agent("a1").await.unwrap());
        assert_eq!(store.topology_generation().await.unwrap(), generation + 1);
    }

    #[tokio::test]
    async fn test_confirm_topology_never_regresses_generation() {
        let store = InMemoryRegistryStore::new();
        let reg = registration(json!({"agent_id": "a1"}));
        store.upsert_agent(&reg, t0()).await.unwrap();

        assert!(store.confirm_topology("a1", "h2", 5).await.unwrap());
        assert!(!store.confirm_topology("a1", "h1", 3).await.unwrap());
        let record = store.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(record.topology_hash.as_deref(), Some("h2"));
        assert_eq!(record.topology_generation, 5);
        assert!(!store.confirm_topology("ghost", "h", 9).await.unwrap());
    }
}
