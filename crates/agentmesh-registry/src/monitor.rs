//! Health monitor
//!
//! Background task that ages agents through degraded and expired and
//! deletes expired agents. Each tick works from a snapshot and applies
//! every decision as a guarded per-agent update, so heartbeats are never
//! blocked by a scan and always win a race against one.

use std::sync::Arc;
use std::time::Duration;

use agentmesh_core::{assess, AgentStatus, HealthAction};
use chrono::TimeDelta;
use mockable::Clock;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::storage::retry::with_retry;
use crate::storage::{RegistryStore, RetryPolicy, StoreError};

/// Monitor configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Time between scans
    pub interval: Duration,

    /// Extra time an expired agent is kept before deletion
    pub expired_grace: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            expired_grace: Duration::ZERO,
        }
    }
}

impl MonitorConfig {
    /// Set the scan interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the expired grace period
    pub fn with_expired_grace(mut self, grace: Duration) -> Self {
        self.expired_grace = grace;
        self
    }
}

/// Counts of changes applied by one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub degraded: usize,
    pub expired: usize,
    pub evicted: usize,
}

impl TickSummary {
    pub fn is_empty(&self) -> bool {
        self.degraded == 0 && self.expired == 0 && self.evicted == 0
    }
}

pub struct HealthMonitor {
    store: Arc<dyn RegistryStore>,
    clock: Arc<dyn Clock + Send + Sync>,
    config: MonitorConfig,
    retry: RetryPolicy,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        clock: Arc<dyn Clock + Send + Sync>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            retry: RetryPolicy::storage_default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    ///
    /// The first tick runs immediately so agents left over from before a
    /// restart are aged without waiting a full interval.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            grace_ms = self.config.expired_grace.as_millis() as u64,
            "Health monitor started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.tick().await {
                Ok(summary) if !summary.is_empty() => info!(
                    degraded = summary.degraded,
                    expired = summary.expired,
                    evicted = summary.evicted,
                    "Health check completed"
                ),
                Ok(_) => debug!("Health check completed, no changes"),
                Err(e) => error!(error = %e, "Health check failed; retrying next tick"),
            }
        }

        info!("Health monitor stopped");
    }

    /// Scan every agent once and apply due transitions.
    ///
    /// Fails only if the snapshot cannot be read; a failure on one agent is
    /// logged and does not stop the others.
    pub async fn tick(&self) -> Result<TickSummary, StoreError> {
        let now = self.clock.utc();
        let grace = TimeDelta::seconds(self.config.expired_grace.as_secs().min(u32::MAX as u64) as i64);
        let agents = with_retry(&self.retry, "list_agents", || self.store.list_agents()).await?;

        let mut summary = TickSummary::default();
        for agent in agents {
            let elapsed = now - agent.last_heartbeat_at;
            let guard = agent.guard();

            match assess(agent.status, elapsed, &agent.thresholds, grace) {
                HealthAction::Keep => {}
                HealthAction::Transition(to) => {
                    let result = with_retry(&self.retry, "transition_status", || {
                        self.store.transition_status(&agent.id, guard, to)
                    })
                    .await;
                    match result {
                        Ok(true) => {
                            warn!(
                                agent_id = %agent.id,
                                from = %agent.status,
                                to = %to,
                                silent_secs = elapsed.num_seconds(),
                                "Agent status changed"
                            );
                            match to {
                                AgentStatus::Degraded => summary.degraded += 1,
                                AgentStatus::Expired => summary.expired += 1,
                                _ => {}
                            }
                        }
                        Ok(false) => {
                            debug!(agent_id = %agent.id, "Agent changed during scan; skipped")
                        }
                        Err(e) => error!(
                            agent_id = %agent.id,
                            error = %e,
                            "Failed to update agent status"
                        ),
                    }
                }
                HealthAction::Evict => {
                    let result = with_retry(&self.retry, "evict_agent", || {
                        self.store.evict_agent(&agent.id, guard)
                    })
                    .await;
                    match result {
                        Ok(true) => {
                            info!(
                                agent_id = %agent.id,
                                silent_secs = elapsed.num_seconds(),
                                "Evicted expired agent"
                            );
                            summary.evicted += 1;
                        }
                        Ok(false) => {
                            debug!(agent_id = %agent.id, "Agent changed during scan; skipped")
                        }
                        Err(e) => error!(agent_id = %agent.id, error = %e, "Failed to evict agent"),
                    }
                }
            }
        }

        Ok(summary)
    }
}
