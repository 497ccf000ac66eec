// Registration payload types
//
// Wire shapes accepted by POST /heartbeat and POST /register, and the
// validated Registration produced from them. Validation is all-or-nothing:
// either every tool and dependency is accepted, or the whole payload is.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::agent::{HealthThresholds, ThresholdPolicy};
use crate::error::{Result, ValidationError};
use crate::selector::DependencySelector;
use crate::validation::{
    check_capability_cycles, validate_agent_id, validate_capability_name, validate_declared_tag,
    MAX_DEPENDENCIES_PER_TOOL, MAX_DESCRIPTION_BYTES, MAX_TOOLS_PER_AGENT,
};
use crate::version::parse_tool_version;

/// Namespace applied when a registration omits one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Tool version applied when a declaration omits one.
pub const DEFAULT_TOOL_VERSION: &str = "1.0.0";

/// One entry of a selector's tag list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(untagged)]
pub enum TagSpec {
    /// `"api"` required, `"+fast"` preferred, `"-deprecated"` excluded.
    Tag(String),
    /// OR group: one member must hold; members are tried in order.
    AnyOf(Vec<String>),
}

/// A dependency selector as declared.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct SelectorSpec {
    /// Capability name; may be omitted when selecting by tags only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    /// Tag terms and OR groups.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagSpec>,
    /// Version constraint, e.g. `">=1.0, <2.0"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Restrict candidates to one namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// One declared dependency of a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(untagged)]
pub enum DependencySpec {
    /// Bare capability name.
    Capability(String),
    /// A single selector.
    Selector(SelectorSpec),
    /// Ordered fallback chain of selectors.
    Chain(Vec<SelectorSpec>),
}

/// A tool declaration as received.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ToolSpec {
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub capability: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    /// Any other fields on the declaration.
    #[serde(flatten)]
    pub additional_properties: BTreeMap<String, serde_json::Value>,
}

/// Full registration payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct RegistrationRequest {
    /// Agent identifier; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Selects default health thresholds ("critical", "worker", "file-agent").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Externally reachable URL; takes precedence over host/port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,
    /// Seconds of silence before the agent is degraded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_threshold: Option<u64>,
    /// Seconds of silence before the agent is expired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_threshold: Option<u64>,
    /// Client-side send time, used to order requests from one agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

/// A validated tool, as stored and served.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Tool {
    pub function_name: String,
    pub capability: String,
    pub version: String,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Dependencies as declared.
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub additional_properties: BTreeMap<String, serde_json::Value>,
}

impl Tool {
    /// Parse the declared dependencies into selectors.
    pub fn selectors(&self) -> Result<Vec<DependencySelector>> {
        self.dependencies
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                DependencySelector::from_spec(spec)
                    .map_err(|e| e.in_dependency(&self.function_name, index))
            })
            .collect()
    }
}

/// A validated registration ready to be written to storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub agent_id: String,
    pub name: String,
    pub agent_type: Option<String>,
    pub namespace: String,
    pub version: Option<String>,
    pub endpoint: String,
    pub thresholds: HealthThresholds,
    pub client_timestamp: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
    pub tools: Vec<Tool>,
}

impl RegistrationRequest {
    /// Validate the payload and resolve defaults.
    ///
    /// `generate_id` is called only when the payload carries no agent ID.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found; nothing is partially accepted.
    pub fn validate(
        self,
        policy: &ThresholdPolicy,
        generate_id: impl FnOnce() -> String,
    ) -> Result<Registration> {
        let agent_id = match self.agent_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => generate_id(),
        };
        validate_agent_id(&agent_id)?;

        if self.tools.len() > MAX_TOOLS_PER_AGENT {
            return Err(ValidationError::LimitExceeded {
                field: "tools",
                limit: MAX_TOOLS_PER_AGENT,
            });
        }

        let defaults = policy.for_agent_type(self.agent_type.as_deref());
        let thresholds = HealthThresholds::new(
            self.timeout_threshold.unwrap_or(defaults.timeout_threshold),
            self.eviction_threshold.unwrap_or(defaults.eviction_threshold),
        )?;

        let mut function_names = HashSet::new();
        let mut tools = Vec::with_capacity(self.tools.len());
        for (position, spec) in self.tools.into_iter().enumerate() {
            let tool = validate_tool(position, spec)?;
            if !function_names.insert(tool.function_name.clone()) {
                return Err(ValidationError::DuplicateFunctionName(tool.function_name));
            }
            tools.push(tool);
        }

        let selectors = tools
            .iter()
            .map(Tool::selectors)
            .collect::<Result<Vec<_>>>()?;
        check_capability_cycles(&tools, &selectors)?;

        let endpoint = match (self.endpoint, self.http_host, self.http_port) {
            (Some(endpoint), _, _) if !endpoint.trim().is_empty() => endpoint.trim().to_string(),
            (_, Some(host), Some(port)) if !host.trim().is_empty() => {
                format!("http://{}:{}", host.trim(), port)
            }
            _ => format!("stdio://{agent_id}"),
        };

        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| agent_id.clone());
        let namespace = self
            .namespace
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        Ok(Registration {
            agent_id,
            name,
            agent_type: self.agent_type,
            namespace,
            version: self.version,
            endpoint,
            thresholds,
            client_timestamp: self.timestamp,
            metadata: self.metadata,
            tools,
        })
    }
}

fn validate_tool(position: usize, spec: ToolSpec) -> Result<Tool> {
    let function_name = spec.function_name.trim().to_string();
    if function_name.is_empty() {
        return Err(ValidationError::MissingFunctionName(position));
    }

    let capability = spec.capability.trim().to_string();
    validate_capability_name(&capability)?;

    let version = spec
        .version
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TOOL_VERSION.to_string());
    parse_tool_version(&function_name, &version)?;

    for tag in &spec.tags {
        validate_declared_tag(tag)?;
    }

    if let Some(description) = &spec.description {
        if description.len() > MAX_DESCRIPTION_BYTES {
            return Err(ValidationError::LimitExceeded {
                field: "description",
                limit: MAX_DESCRIPTION_BYTES,
            });
        }
    }

    if spec.dependencies.len() > MAX_DEPENDENCIES_PER_TOOL {
        return Err(ValidationError::LimitExceeded {
            field: "dependencies",
            limit: MAX_DEPENDENCIES_PER_TOOL,
        });
    }

    Ok(Tool {
        function_name,
        capability,
        version: version.trim().to_string(),
        tags: spec.tags,
        description: spec.description,
        dependencies: spec.dependencies,
        additional_properties: spec.additional_properties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixed_id() -> String {
        "generated-id".to_string()
    }

    fn request(value: serde_json::Value) -> RegistrationRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_dependency_shapes_deserialize() {
        let deps: Vec<DependencySpec> = serde_json::from_value(json!([
            "time_service",
            {"capability": "weather", "tags": ["api", "+fast", ["us", "eu"]]},
            [{"capability": "llm", "tags": ["claude"]}, {"capability": "llm"}]
        ]))
        .unwrap();

        assert_eq!(deps[0], DependencySpec::Capability("time_service".to_string()));
        match &deps[1] {
            DependencySpec::Selector(s) => {
                assert_eq!(s.capability.as_deref(), Some("weather"));
                assert_eq!(
                    s.tags[2],
                    TagSpec::AnyOf(vec!["us".to_string(), "eu".to_string()])
                );
            }
            other => panic!("expected selector, got {other:?}"),
        }
        assert!(matches!(&deps[2], DependencySpec::Chain(chain) if chain.len() == 2));
    }

    #[test]
    fn test_unknown_tool_fields_become_additional_properties() {
        let req = request(json!({
            "agent_id": "weather-agent",
            "tools": [{
                "function_name": "get_weather",
                "capability": "weather",
                "timeout": 30,
                "kwargs": {"retries": 2}
            }]
        }));
        let reg = req.validate(&ThresholdPolicy::default(), fixed_id).unwrap();
        let tool = &reg.tools[0];
        assert_eq!(tool.additional_properties["timeout"], json!(30));
        assert_eq!(tool.additional_properties["kwargs"], json!({"retries": 2}));
        assert_eq!(tool.version, DEFAULT_TOOL_VERSION);
    }

    #[test]
    fn test_defaults_applied() {
        let reg = request(json!({"tools": []}))
            .validate(&ThresholdPolicy::default(), fixed_id)
            .unwrap();
        assert_eq!(reg.agent_id, "generated-id");
        assert_eq!(reg.name, "generated-id");
        assert_eq!(reg.namespace, DEFAULT_NAMESPACE);
        assert_eq!(reg.endpoint, "stdio://generated-id");
        assert_eq!(reg.thresholds, HealthThresholds::default());
    }

    #[test]
    fn test_endpoint_precedence() {
        let reg = request(json!({
            "agent_id": "a1",
            "endpoint": "https://a1.example.com",
            "http_host": "10.0.0.1",
            "http_port": 9000
        }))
        .validate(&ThresholdPolicy::default(), fixed_id)
        .unwrap();
        assert_eq!(reg.endpoint, "https://a1.example.com");

        let reg = request(json!({"agent_id": "a1", "http_host": "10.0.0.1", "http_port": 9000}))
            .validate(&ThresholdPolicy::default(), fixed_id)
            .unwrap();
        assert_eq!(reg.endpoint, "http://10.0.0.1:9000");
    }

    #[test]
    fn test_thresholds_from_agent_type_and_explicit_values() {
        let policy = ThresholdPolicy::default();
        let reg = request(json!({"agent_id": "c1", "agent_type": "critical"}))
            .validate(&policy, fixed_id)
            .unwrap();
        assert_eq!(reg.thresholds.timeout_threshold, 30);
        assert_eq!(reg.thresholds.eviction_threshold, 60);

        let reg = request(json!({"agent_id": "x", "timeout_threshold": 20, "eviction_threshold": 60}))
            .validate(&policy, fixed_id)
            .unwrap();
        assert_eq!(reg.thresholds.timeout_threshold, 20);
        assert_eq!(reg.thresholds.eviction_threshold, 60);

        let err = request(json!({"agent_id": "x", "timeout_threshold": 300}))
            .validate(&policy, fixed_id)
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidThresholds(_)));
    }

    #[test]
    fn test_rejects_invalid_agent_id() {
        let err = request(json!({"agent_id": "Bad_ID"}))
            .validate(&ThresholdPolicy::default(), fixed_id)
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAgentId(_)));
    }

    #[test]
    fn test_rejects_bad_tool_fields() {
        let policy = ThresholdPolicy::default();

        let err = request(json!({"agent_id": "a", "tools": [{"capability": "x"}]}))
            .validate(&policy, fixed_id)
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingFunctionName(0));

        let err = request(json!({"agent_id": "a", "tools": [{"function_name": "f", "capability": "9x"}]}))
            .validate(&policy, fixed_id)
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidCapability(_)));

        let err = request(json!({"agent_id": "a", "tools": [
            {"function_name": "f", "capability": "x", "version": "one"}
        ]}))
        .validate(&policy, fixed_id)
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidToolVersion { .. }));

        let err = request(json!({"agent_id": "a", "tools": [
            {"function_name": "f", "capability": "x"},
            {"function_name": "f", "capability": "y"}
        ]}))
        .validate(&policy, fixed_id)
        .unwrap_err();
        assert_eq!(err, ValidationError::DuplicateFunctionName("f".to_string()));
    }

    #[test]
    fn test_rejects_invalid_version_constraint() {
        let err = request(json!({"agent_id": "a", "tools": [{
            "function_name": "f",
            "capability": "x",
            "dependencies": [{"capability": "y", "version": ">=banana"}]
        }]}))
        .validate(&ThresholdPolicy::default(), fixed_id)
        .unwrap_err();
        match err {
            ValidationError::InvalidDependency { index, source, .. } => {
                assert_eq!(index, 0);
                assert!(matches!(*source, ValidationError::InvalidVersionConstraint { .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_rejects_self_dependency() {
        let err = request(json!({"agent_id": "a", "tools": [{
            "function_name": "f",
            "capability": "weather",
            "dependencies": ["weather"]
        }]}))
        .validate(&ThresholdPolicy::default(), fixed_id)
        .unwrap_err();
        assert!(matches!(err, ValidationError::CapabilityCycle(_)));
    }
}
