// Service-Mesh Registry Core
//
// This crate holds the DB-agnostic part of the registry: what an agent
// declares, how declared dependencies resolve against registered tools, how
// a resolution is fingerprinted, and how agent health evolves over time.
//
// Key design decisions:
// - Resolver, hasher and health transitions are pure functions over snapshots
// - Storage and HTTP live in agentmesh-registry; nothing here performs I/O
// - Registration payloads are validated here so every backend sees the same rules
// - OR tag groups become an ordered fallback chain of alternatives

// Domain entity types
pub mod agent;
pub mod registration;

// Resolution
pub mod resolver;
pub mod selector;
pub mod topology;
pub mod version;

// Health state machine
pub mod health;

pub mod error;
pub mod validation;

// Telemetry (tracing subscriber setup)
pub mod telemetry;

// Re-exports for convenience
pub use agent::{Agent, AgentStatus, HealthThresholds, ThresholdPolicy};
pub use error::{Result, ValidationError};
pub use health::{assess, on_heartbeat, HealthAction, HeartbeatState, HeartbeatUpdate};
pub use registration::{
    DependencySpec, Registration, RegistrationRequest, SelectorSpec, TagSpec, Tool, ToolSpec,
};
pub use resolver::{rank, resolve, Candidate, Ranked, Resolution};
pub use selector::{Alternative, DependencySelector, TagFilter, TagTerm};
pub use topology::{DependencyStatus, ResolvedDependency, Topology, TopologyHash};
pub use version::VersionConstraint;
