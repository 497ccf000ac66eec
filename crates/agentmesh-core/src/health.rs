// Health state machine
//
// pending --(heartbeat)--> healthy
// healthy --(silent > timeout)--> degraded
// degraded --(silent > eviction)--> expired
// degraded|expired --(heartbeat)--> healthy
// expired --(silent > eviction + grace, seen expired by a previous tick)--> deleted
//
// Decisions are pure functions of (status, elapsed, thresholds); the monitor
// and the heartbeat path apply them with per-agent conditional writes.

use chrono::{DateTime, TimeDelta, Utc};

use crate::agent::{AgentStatus, HealthThresholds};

/// What the monitor should do with one agent on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    Keep,
    Transition(AgentStatus),
    Evict,
}

/// Decide the monitor action for an agent silent for `elapsed`.
///
/// Statuses only move forward here; recovery happens through heartbeats.
/// An agent is evicted only if it was already expired when the tick began,
/// so deletion always lands on a tick after the one that expired it.
pub fn assess(
    status: AgentStatus,
    elapsed: TimeDelta,
    thresholds: &HealthThresholds,
    expired_grace: TimeDelta,
) -> HealthAction {
    match status {
        AgentStatus::Expired => {
            if elapsed > thresholds.eviction() + expired_grace {
                HealthAction::Evict
            } else {
                HealthAction::Keep
            }
        }
        AgentStatus::Pending | AgentStatus::Healthy | AgentStatus::Degraded => {
            if elapsed > thresholds.eviction() {
                HealthAction::Transition(AgentStatus::Expired)
            } else if elapsed > thresholds.timeout() && status != AgentStatus::Degraded {
                HealthAction::Transition(AgentStatus::Degraded)
            } else {
                HealthAction::Keep
            }
        }
    }
}

/// Outcome of applying a heartbeat to a stored agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatUpdate {
    pub status: AgentStatus,
    /// Server-side liveness to store.
    pub last_heartbeat_at: DateTime<Utc>,
    /// Client timestamp to store, if it advanced.
    pub client_timestamp: Option<DateTime<Utc>>,
    /// The heartbeat carried a client timestamp older than the stored one.
    pub stale: bool,
}

/// Stored fields a heartbeat is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatState {
    pub status: AgentStatus,
    pub last_heartbeat_at: DateTime<Utc>,
    pub client_timestamp: Option<DateTime<Utc>>,
}

/// Apply a heartbeat received at `now` to an agent's stored state.
///
/// A heartbeat whose client timestamp is older than the last one seen is
/// stale and changes nothing: status and `last_heartbeat_at` stay as stored,
/// so the monitor keeps aging the agent. Otherwise the agent becomes healthy
/// and `last_heartbeat_at` never moves backwards.
pub fn on_heartbeat(
    stored: HeartbeatState,
    client_timestamp: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> HeartbeatUpdate {
    let stale = matches!(
        (stored.client_timestamp, client_timestamp),
        (Some(stored), Some(incoming)) if incoming < stored
    );

    if stale {
        return HeartbeatUpdate {
            status: stored.status,
            last_heartbeat_at: stored.last_heartbeat_at,
            client_timestamp: stored.client_timestamp,
            stale,
        };
    }

    HeartbeatUpdate {
        status: AgentStatus::Healthy,
        last_heartbeat_at: stored.last_heartbeat_at.max(now),
        client_timestamp: client_timestamp.or(stored.client_timestamp),
        stale,
    }
}

/// Whether the provider set seen by dependents changes with this transition.
pub fn affects_topology(from: AgentStatus, to: AgentStatus) -> bool {
    from.is_provider() != to.is_provider()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn thresholds(timeout: u64, eviction: u64) -> HealthThresholds {
        HealthThresholds::new(timeout, eviction).unwrap()
    }

    fn secs(s: i64) -> TimeDelta {
        TimeDelta::seconds(s)
    }

    #[test]
    fn test_healthy_within_timeout_stays_healthy() {
        let t = thresholds(20, 60);
        assert_eq!(assess(AgentStatus::Healthy, secs(0), &t, secs(0)), HealthAction::Keep);
        assert_eq!(assess(AgentStatus::Healthy, secs(20), &t, secs(0)), HealthAction::Keep);
    }

    #[test]
    fn test_scenario_degrade_expire_delete() {
        let t = thresholds(20, 60);
        let grace = secs(0);

        assert_eq!(
            assess(AgentStatus::Healthy, secs(25), &t, grace),
            HealthAction::Transition(AgentStatus::Degraded)
        );
        assert_eq!(assess(AgentStatus::Degraded, secs(40), &t, grace), HealthAction::Keep);
        assert_eq!(
            assess(AgentStatus::Degraded, secs(65), &t, grace),
            HealthAction::Transition(AgentStatus::Expired)
        );
        assert_eq!(assess(AgentStatus::Expired, secs(75), &t, grace), HealthAction::Evict);
    }

    #[test]
    fn test_missed_ticks_jump_straight_to_expired() {
        let t = thresholds(20, 60);
        assert_eq!(
            assess(AgentStatus::Healthy, secs(600), &t, secs(0)),
            HealthAction::Transition(AgentStatus::Expired)
        );
    }

    #[test]
    fn test_grace_period_delays_eviction() {
        let t = thresholds(20, 60);
        assert_eq!(assess(AgentStatus::Expired, secs(70), &t, secs(30)), HealthAction::Keep);
        assert_eq!(assess(AgentStatus::Expired, secs(91), &t, secs(30)), HealthAction::Evict);
    }

    #[test]
    fn test_never_moves_backward() {
        let t = thresholds(20, 60);
        for elapsed in [0, 10, 30, 59] {
            let action = assess(AgentStatus::Expired, secs(elapsed), &t, secs(0));
            assert_eq!(action, HealthAction::Keep);
        }
        assert_eq!(assess(AgentStatus::Degraded, secs(5), &t, secs(0)), HealthAction::Keep);
    }

    fn state(status: AgentStatus, client_timestamp: Option<DateTime<Utc>>) -> HeartbeatState {
        HeartbeatState {
            status,
            last_heartbeat_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
            client_timestamp,
        }
    }

    #[test]
    fn test_heartbeat_recovers_degraded_and_expired() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 1, 0).unwrap();
        for status in [AgentStatus::Pending, AgentStatus::Degraded, AgentStatus::Expired] {
            let update = on_heartbeat(state(status, None), None, now);
            assert_eq!(update.status, AgentStatus::Healthy);
            assert_eq!(update.last_heartbeat_at, now);
            assert!(!update.stale);
        }
    }

    #[test]
    fn test_stale_heartbeat_changes_nothing() {
        let newer = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 10).unwrap();
        let older = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 5, 0).unwrap();

        let stored = state(AgentStatus::Degraded, Some(newer));
        let update = on_heartbeat(stored, Some(older), now);
        assert!(update.stale);
        assert_eq!(update.status, AgentStatus::Degraded);
        assert_eq!(update.last_heartbeat_at, stored.last_heartbeat_at);
        assert_eq!(update.client_timestamp, Some(newer));

        let update = on_heartbeat(state(AgentStatus::Degraded, Some(older)), Some(newer), now);
        assert!(!update.stale);
        assert_eq!(update.status, AgentStatus::Healthy);
        assert_eq!(update.last_heartbeat_at, now);
        assert_eq!(update.client_timestamp, Some(newer));
    }

    #[test]
    fn test_stale_heartbeat_keeps_status_and_silence_consistent() {
        // A stale ping must not leave a degraded agent looking recently seen.
        let t = thresholds(20, 60);
        let client = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 10).unwrap();
        let stored = state(AgentStatus::Degraded, Some(client));
        let now = stored.last_heartbeat_at + secs(90);

        let update = on_heartbeat(stored, Some(stored.last_heartbeat_at), now);
        let action = assess(update.status, now - update.last_heartbeat_at, &t, secs(0));
        assert_eq!(action, HealthAction::Transition(AgentStatus::Expired));
    }

    #[test]
    fn test_heartbeat_never_moves_liveness_backwards() {
        let stored = state(AgentStatus::Healthy, None);
        let earlier = stored.last_heartbeat_at - secs(30);
        let update = on_heartbeat(stored, None, earlier);
        assert_eq!(update.last_heartbeat_at, stored.last_heartbeat_at);
    }

    #[test]
    fn test_topology_relevant_transitions() {
        assert!(affects_topology(AgentStatus::Healthy, AgentStatus::Degraded));
        assert!(affects_topology(AgentStatus::Expired, AgentStatus::Healthy));
        assert!(!affects_topology(AgentStatus::Degraded, AgentStatus::Expired));
        assert!(!affects_topology(AgentStatus::Healthy, AgentStatus::Healthy));
    }
}
