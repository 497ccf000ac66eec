// Topology resolution and hashing
//
// A topology is the resolution of every dependency of every tool of one
// agent, keyed by (function_name, dep_index). The hash is a SHA-256 over
// that sorted map, so it only moves when the chosen providers move.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::registration::Tool;
use crate::resolver::{resolve, Candidate};

/// Resolution status of one dependency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum DependencyStatus {
    Available,
    Unresolved,
}

impl DependencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyStatus::Available => "available",
            DependencyStatus::Unresolved => "unresolved",
        }
    }
}

/// Where one declared dependency currently points.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ResolvedDependency {
    /// Position of the dependency in the tool's declaration.
    pub dep_index: usize,
    /// Provider capability, or the requested capability when unresolved.
    pub capability: String,
    pub status: DependencyStatus,
    pub agent_id: Option<String>,
    pub endpoint: Option<String>,
    /// Provider's function to call.
    pub function_name: Option<String>,
}

impl ResolvedDependency {
    fn available(dep_index: usize, provider: &Candidate) -> Self {
        Self {
            dep_index,
            capability: provider.capability.clone(),
            status: DependencyStatus::Available,
            agent_id: Some(provider.agent_id.clone()),
            endpoint: Some(provider.endpoint.clone()),
            function_name: Some(provider.function_name.clone()),
        }
    }

    fn unresolved(dep_index: usize, capability: Option<&str>) -> Self {
        Self {
            dep_index,
            capability: capability.unwrap_or_default().to_string(),
            status: DependencyStatus::Unresolved,
            agent_id: None,
            endpoint: None,
            function_name: None,
        }
    }
}

/// Resolved dependencies of one agent, keyed by consuming function name.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Topology {
    dependencies: BTreeMap<String, Vec<ResolvedDependency>>,
}

impl Topology {
    /// Resolve every dependency of `tools` against `providers`.
    ///
    /// Tools without dependencies do not appear in the result.
    pub fn resolve(tools: &[Tool], providers: &[Candidate]) -> Self {
        let mut dependencies = BTreeMap::new();

        for tool in tools.iter().filter(|t| !t.dependencies.is_empty()) {
            let resolved = match tool.selectors() {
                Ok(selectors) => selectors
                    .iter()
                    .enumerate()
                    .map(|(index, selector)| {
                        match resolve(selector, providers).and_then(|r| r.winner()) {
                            Some(provider) => ResolvedDependency::available(index, provider),
                            None => ResolvedDependency::unresolved(index, selector.primary_capability()),
                        }
                    })
                    .collect(),
                Err(e) => {
                    // Stored declarations were validated on the way in.
                    tracing::warn!(function_name = %tool.function_name, error = %e, "Unparseable stored dependency");
                    (0..tool.dependencies.len())
                        .map(|index| ResolvedDependency::unresolved(index, None))
                        .collect()
                }
            };
            dependencies.insert(tool.function_name.clone(), resolved);
        }

        Self { dependencies }
    }

    pub fn dependencies(&self) -> &BTreeMap<String, Vec<ResolvedDependency>> {
        &self.dependencies
    }

    pub fn into_dependencies(self) -> BTreeMap<String, Vec<ResolvedDependency>> {
        self.dependencies
    }

    pub fn total(&self) -> usize {
        self.dependencies.values().map(Vec::len).sum()
    }

    pub fn resolved(&self) -> usize {
        self.dependencies
            .values()
            .flatten()
            .filter(|d| d.status == DependencyStatus::Available)
            .count()
    }

    /// Fingerprint of the resolution.
    pub fn hash(&self) -> TopologyHash {
        let mut hasher = Sha256::new();
        for (function_name, deps) in &self.dependencies {
            for dep in deps {
                let dep_index = dep.dep_index.to_string();
                let fields: [&str; 7] = [
                    function_name.as_str(),
                    dep_index.as_str(),
                    dep.status.as_str(),
                    dep.capability.as_str(),
                    dep.agent_id.as_deref().unwrap_or_default(),
                    dep.endpoint.as_deref().unwrap_or_default(),
                    dep.function_name.as_deref().unwrap_or_default(),
                ];
                for field in fields {
                    hasher.update(field.as_bytes());
                    hasher.update([0x1f]);
                }
                hasher.update([0x1e]);
            }
        }
        TopologyHash(hex::encode(hasher.finalize()))
    }
}

/// Hex-encoded SHA-256 topology fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(transparent)]
pub struct TopologyHash(String);

impl TopologyHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for TopologyHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TopologyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::DependencySpec;
    use serde_json::json;

    fn tool(function_name: &str, deps: serde_json::Value) -> Tool {
        Tool {
            function_name: function_name.to_string(),
            capability: format!("{function_name}_cap"),
            version: "1.0.0".to_string(),
            tags: vec![],
            description: None,
            dependencies: serde_json::from_value::<Vec<DependencySpec>>(deps).unwrap(),
            additional_properties: Default::default(),
        }
    }

    fn provider(agent_id: &str, seq: i64, capability: &str) -> Candidate {
        Candidate {
            agent_id: agent_id.to_string(),
            namespace: "default".to_string(),
            endpoint: format!("http://{agent_id}:8080"),
            function_name: format!("{capability}_fn"),
            capability: capability.to_string(),
            version: "1.0.0".to_string(),
            tags: vec![],
            registration_seq: seq,
            position: 0,
        }
    }

    #[test]
    fn test_resolution_shape() {
        let tools = vec![
            tool("report", json!(["weather", "geo"])),
            tool("noop", json!([])),
        ];
        let providers = vec![provider("w1", 1, "weather")];
        let topology = Topology::resolve(&tools, &providers);

        assert_eq!(topology.dependencies().len(), 1);
        let deps = &topology.dependencies()["report"];
        assert_eq!(deps[0].status, DependencyStatus::Available);
        assert_eq!(deps[0].agent_id.as_deref(), Some("w1"));
        assert_eq!(deps[0].endpoint.as_deref(), Some("http://w1:8080"));
        assert_eq!(deps[1].status, DependencyStatus::Unresolved);
        assert_eq!(deps[1].capability, "geo");
        assert_eq!(deps[1].agent_id, None);
        assert_eq!(topology.total(), 2);
        assert_eq!(topology.resolved(), 1);
    }

    #[test]
    fn test_hash_ignores_provider_order() {
        let tools = vec![tool("a", json!(["x", "y"])), tool("b", json!(["y"]))];
        let providers = vec![provider("p1", 1, "x"), provider("p2", 2, "y"), provider("p3", 3, "y")];
        let mut reversed = providers.clone();
        reversed.reverse();

        let first = Topology::resolve(&tools, &providers).hash();
        let second = Topology::resolve(&tools, &reversed).hash();
        assert_eq!(first, second);

        let mut tools_reversed = tools.clone();
        tools_reversed.reverse();
        assert_eq!(Topology::resolve(&tools_reversed, &providers).hash(), first);
    }

    #[test]
    fn test_hash_changes_when_provider_changes() {
        let tools = vec![tool("a", json!(["x"]))];
        let before = Topology::resolve(&tools, &[]).hash();
        let after = Topology::resolve(&tools, &[provider("p1", 1, "x")]).hash();
        assert_ne!(before, after);

        let moved = Topology::resolve(&tools, &[provider("p2", 2, "x")]).hash();
        assert_ne!(after, moved);
    }

    #[test]
    fn test_hash_ignores_unrelated_providers() {
        let tools = vec![tool("a", json!(["x"]))];
        let base = vec![provider("p1", 1, "x")];
        let mut extra = base.clone();
        extra.push(provider("other", 2, "unrelated"));
        assert_eq!(
            Topology::resolve(&tools, &base).hash(),
            Topology::resolve(&tools, &extra).hash()
        );
    }

    #[test]
    fn test_empty_topology_hash_is_stable() {
        let empty = Topology::default().hash();
        assert_eq!(empty, Topology::resolve(&[], &[]).hash());
        assert_eq!(empty.as_str().len(), 64);
    }

    #[test]
    fn test_serializes_as_map() {
        let tools = vec![tool("a", json!(["x"]))];
        let value = serde_json::to_value(Topology::resolve(&tools, &[])).unwrap();
        assert_eq!(
            value,
            json!({"a": [{
                "dep_index": 0,
                "capability": "x",
                "status": "unresolved",
                "agent_id": null,
                "endpoint": null,
                "function_name": null
            }]})
        );
    }
}
