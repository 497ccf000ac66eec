// Agent domain types
//
// These types represent a registered agent, its status and health thresholds.
// Used by storage backends, the health monitor and the HTTP API.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::error::{Result, ValidationError};
use crate::registration::Tool;

/// Upper bound for a per-agent timeout threshold, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 7200;

/// Upper bound for a per-agent eviction threshold, in seconds.
pub const MAX_EVICTION_SECS: u64 = 14400;

/// Agent liveness status.
/// - `pending`: record exists but no heartbeat has been accepted yet
/// - `healthy`: heartbeating within its timeout threshold
/// - `degraded`: silent for longer than its timeout threshold
/// - `expired`: silent for longer than its eviction threshold, awaiting deletion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Pending,
    Healthy,
    Degraded,
    Expired,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Healthy => "healthy",
            AgentStatus::Degraded => "degraded",
            AgentStatus::Expired => "expired",
        }
    }

    /// Only healthy agents are offered as dependency providers.
    pub fn is_provider(&self) -> bool {
        matches!(self, AgentStatus::Healthy)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown agent status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for AgentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AgentStatus::Pending),
            "healthy" => Ok(AgentStatus::Healthy),
            "degraded" => Ok(AgentStatus::Degraded),
            "expired" => Ok(AgentStatus::Expired),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Timeout and eviction thresholds for one agent, in whole seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct HealthThresholds {
    /// Silence after which a healthy agent becomes degraded.
    pub timeout_threshold: u64,
    /// Silence after which an agent becomes expired.
    pub eviction_threshold: u64,
}

impl HealthThresholds {
    /// Build thresholds, rejecting out-of-range or inverted values.
    pub fn new(timeout_threshold: u64, eviction_threshold: u64) -> Result<Self> {
        if !(1..=MAX_TIMEOUT_SECS).contains(&timeout_threshold) {
            return Err(ValidationError::InvalidThresholds(format!(
                "timeout_threshold must be between 1 and {MAX_TIMEOUT_SECS} seconds, got {timeout_threshold}"
            )));
        }
        if !(1..=MAX_EVICTION_SECS).contains(&eviction_threshold) {
            return Err(ValidationError::InvalidThresholds(format!(
                "eviction_threshold must be between 1 and {MAX_EVICTION_SECS} seconds, got {eviction_threshold}"
            )));
        }
        if eviction_threshold < timeout_threshold {
            return Err(ValidationError::InvalidThresholds(format!(
                "eviction_threshold ({eviction_threshold}) must not be less than timeout_threshold ({timeout_threshold})"
            )));
        }
        Ok(Self {
            timeout_threshold,
            eviction_threshold,
        })
    }

    pub fn timeout(&self) -> TimeDelta {
        TimeDelta::seconds(self.timeout_threshold as i64)
    }

    pub fn eviction(&self) -> TimeDelta {
        TimeDelta::seconds(self.eviction_threshold as i64)
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            timeout_threshold: 60,
            eviction_threshold: 120,
        }
    }
}

/// Default thresholds per agent type, with a global fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdPolicy {
    default: HealthThresholds,
    by_type: BTreeMap<String, HealthThresholds>,
}

impl ThresholdPolicy {
    /// Policy with the built-in agent types and the given global default.
    pub fn new(default: HealthThresholds) -> Self {
        let by_type = [
            ("critical", 30, 60),
            ("worker", 45, 90),
            ("file-agent", 90, 180),
        ]
        .into_iter()
        .map(|(name, timeout_threshold, eviction_threshold)| {
            (
                name.to_string(),
                HealthThresholds {
                    timeout_threshold,
                    eviction_threshold,
                },
            )
        })
        .collect();

        Self { default, by_type }
    }

    /// Override or add the defaults for one agent type.
    pub fn with_agent_type(mut self, agent_type: impl Into<String>, thresholds: HealthThresholds) -> Self {
        self.by_type.insert(agent_type.into(), thresholds);
        self
    }

    pub fn default_thresholds(&self) -> HealthThresholds {
        self.default
    }

    pub fn for_agent_type(&self, agent_type: Option<&str>) -> HealthThresholds {
        agent_type
            .and_then(|t| self.by_type.get(t))
            .copied()
            .unwrap_or(self.default)
    }
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self::new(HealthThresholds::default())
    }
}

/// A registered agent as exposed by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Agent {
    /// Stable agent identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Agent type used to pick default thresholds (e.g. "critical", "worker").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    /// Namespace the agent belongs to.
    pub namespace: String,
    /// Address other agents use to reach this one.
    pub endpoint: String,
    /// Agent software version (informational).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Current liveness status.
    pub status: AgentStatus,
    /// Health thresholds applied by the monitor.
    pub thresholds: HealthThresholds,
    /// Free-form metadata supplied at registration.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub metadata: Option<serde_json::Value>,
    /// Server time of the last accepted heartbeat or registration.
    pub last_heartbeat_at: DateTime<Utc>,
    /// Timestamp when the agent record was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp when the agent record was last replaced by a registration.
    pub updated_at: DateTime<Utc>,
    /// Tools the agent provides, in declaration order.
    pub tools: Vec<Tool>,
}

impl Agent {
    /// Distinct capability names in declaration order.
    pub fn capabilities(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for tool in &self.tools {
            if !seen.contains(&tool.capability) {
                seen.push(tool.capability.clone());
            }
        }
        seen
    }

    pub fn total_dependencies(&self) -> usize {
        self.tools.iter().map(|t| t.dependencies.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            AgentStatus::Pending,
            AgentStatus::Healthy,
            AgentStatus::Degraded,
            AgentStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<AgentStatus>().unwrap(), status);
        }
        assert!("deleted".parse::<AgentStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&AgentStatus::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
    }

    #[test]
    fn test_only_healthy_agents_provide() {
        assert!(AgentStatus::Healthy.is_provider());
        assert!(!AgentStatus::Pending.is_provider());
        assert!(!AgentStatus::Degraded.is_provider());
        assert!(!AgentStatus::Expired.is_provider());
    }

    #[test]
    fn test_thresholds_validation() {
        assert!(HealthThresholds::new(20, 60).is_ok());
        assert!(HealthThresholds::new(60, 60).is_ok());
        assert!(HealthThresholds::new(0, 60).is_err());
        assert!(HealthThresholds::new(7201, 8000).is_err());
        assert!(HealthThresholds::new(30, 14401).is_err());
        assert!(matches!(
            HealthThresholds::new(60, 30),
            Err(ValidationError::InvalidThresholds(_))
        ));
    }

    #[test]
    fn test_policy_per_agent_type() {
        let policy = ThresholdPolicy::default();
        assert_eq!(
            policy.for_agent_type(Some("critical")),
            HealthThresholds {
                timeout_threshold: 30,
                eviction_threshold: 60
            }
        );
        assert_eq!(policy.for_agent_type(Some("worker")).timeout_threshold, 45);
        assert_eq!(policy.for_agent_type(Some("file-agent")).eviction_threshold, 180);
        assert_eq!(policy.for_agent_type(Some("unknown")), HealthThresholds::default());
        assert_eq!(policy.for_agent_type(None), HealthThresholds::default());
    }

    #[test]
    fn test_policy_override() {
        let custom = HealthThresholds::new(5, 10).unwrap();
        let policy = ThresholdPolicy::default().with_agent_type("edge", custom);
        assert_eq!(policy.for_agent_type(Some("edge")), custom);
    }
}
