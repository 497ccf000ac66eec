// Input validation for registrations
//
// Hard limits and naming rules checked before anything reaches storage.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, ValidationError};
use crate::registration::Tool;
use crate::selector::DependencySelector;

// =============================================================================
// Limits
// =============================================================================

/// Maximum length of agent IDs and capability names (DNS label set size).
pub const MAX_NAME_LEN: usize = 253;

/// Maximum number of tools one agent may declare.
pub const MAX_TOOLS_PER_AGENT: usize = 250;

/// Maximum number of dependencies one tool may declare.
pub const MAX_DEPENDENCIES_PER_TOOL: usize = 64;

/// Maximum size of a tool description.
pub const MAX_DESCRIPTION_BYTES: usize = 10 * 1024; // 10 KB

// =============================================================================
// Naming rules
// =============================================================================

/// Agent IDs: lowercase alphanumerics and '-', starting and ending alphanumeric.
pub fn validate_agent_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_NAME_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !id.starts_with('-')
        && !id.ends_with('-');

    if !valid {
        return Err(ValidationError::InvalidAgentId(id.to_string()));
    }
    Ok(())
}

/// Capability names: `^[a-zA-Z][a-zA-Z0-9_-]*$`.
pub fn validate_capability_name(name: &str) -> Result<()> {
    let mut bytes = name.bytes();
    let valid = name.len() <= MAX_NAME_LEN
        && bytes.next().is_some_and(|b| b.is_ascii_alphabetic())
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');

    if !valid {
        return Err(ValidationError::InvalidCapability(name.to_string()));
    }
    Ok(())
}

/// Declared tags are plain strings: no operator prefix, not blank.
pub fn validate_declared_tag(tag: &str) -> Result<()> {
    let trimmed = tag.trim();
    if trimmed.is_empty() || trimmed.starts_with(['+', '-']) {
        return Err(ValidationError::InvalidTag(tag.to_string()));
    }
    Ok(())
}

// =============================================================================
// Capability cycles
// =============================================================================

/// Reject registrations whose own tools depend on each other in a cycle.
///
/// Nodes are the capabilities this agent provides; a tool adds an edge from
/// its capability to every capability its dependencies could select. Edges to
/// capabilities the agent does not provide are ignored.
pub fn check_capability_cycles(tools: &[Tool], selectors: &[Vec<DependencySelector>]) -> Result<()> {
    let provided: BTreeSet<&str> = tools.iter().map(|t| t.capability.as_str()).collect();

    let mut edges: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (tool, tool_selectors) in tools.iter().zip(selectors) {
        let targets = edges.entry(tool.capability.as_str()).or_default();
        for selector in tool_selectors {
            targets.extend(selector.capabilities().filter(|c| provided.contains(c)));
        }
    }

    let mut state: BTreeMap<&str, Visit> = BTreeMap::new();
    let mut path = Vec::new();
    for &start in edges.keys() {
        if let Some(cycle) = visit(start, &edges, &mut state, &mut path) {
            return Err(ValidationError::CapabilityCycle(cycle));
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

fn visit<'a>(
    node: &'a str,
    edges: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    state: &mut BTreeMap<&'a str, Visit>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    match state.get(node) {
        Some(Visit::Done) => return None,
        Some(Visit::InProgress) => {
            let start = path.iter().position(|n| *n == node).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        None => {}
    }

    state.insert(node, Visit::InProgress);
    path.push(node);
    if let Some(targets) = edges.get(node) {
        for &next in targets {
            if let Some(cycle) = visit(next, edges, state, path) {
                return Some(cycle);
            }
        }
    }
    path.pop();
    state.insert(node, Visit::Done);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::DependencySpec;
    use serde_json::json;

    fn tool(capability: &str, deps: serde_json::Value) -> Tool {
        Tool {
            function_name: format!("{capability}_fn"),
            capability: capability.to_string(),
            version: "1.0.0".to_string(),
            tags: vec![],
            description: None,
            dependencies: serde_json::from_value::<Vec<DependencySpec>>(deps).unwrap(),
            additional_properties: Default::default(),
        }
    }

    fn check(tools: &[Tool]) -> Result<()> {
        let selectors = tools
            .iter()
            .map(Tool::selectors)
            .collect::<Result<Vec<_>>>()?;
        check_capability_cycles(tools, &selectors)
    }

    #[test]
    fn test_agent_id_rules() {
        assert!(validate_agent_id("hello-world-5f3a").is_ok());
        assert!(validate_agent_id("a").is_ok());
        assert!(validate_agent_id("0190f1e2-7b3c-7def-8000-000000000000").is_ok());
        assert!(validate_agent_id("").is_err());
        assert!(validate_agent_id("Hello").is_err());
        assert!(validate_agent_id("under_score").is_err());
        assert!(validate_agent_id("-leading").is_err());
        assert!(validate_agent_id("trailing-").is_err());
        assert!(validate_agent_id(&"a".repeat(254)).is_err());
        assert!(validate_agent_id(&"a".repeat(253)).is_ok());
    }

    #[test]
    fn test_capability_name_rules() {
        assert!(validate_capability_name("weather").is_ok());
        assert!(validate_capability_name("date_service").is_ok());
        assert!(validate_capability_name("LLM-v2").is_ok());
        assert!(validate_capability_name("").is_err());
        assert!(validate_capability_name("2fa").is_err());
        assert!(validate_capability_name("_private").is_err());
        assert!(validate_capability_name("has space").is_err());
        assert!(validate_capability_name("dot.name").is_err());
    }

    #[test]
    fn test_declared_tag_rules() {
        assert!(validate_declared_tag("fast").is_ok());
        assert!(validate_declared_tag("").is_err());
        assert!(validate_declared_tag("+fast").is_err());
        assert!(validate_declared_tag("-slow").is_err());
    }

    #[test]
    fn test_no_cycle_for_external_dependencies() {
        let tools = vec![
            tool("weather", json!(["geo", "time"])),
            tool("report", json!(["weather"])),
        ];
        assert!(check(&tools).is_ok());
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let tools = vec![tool("weather", json!([{"capability": "weather", "tags": ["v1"]}]))];
        assert_eq!(
            check(&tools).unwrap_err(),
            ValidationError::CapabilityCycle(vec!["weather".into(), "weather".into()])
        );
    }

    #[test]
    fn test_indirect_cycle_detected() {
        let tools = vec![
            tool("alpha", json!(["beta"])),
            tool("beta", json!(["gamma"])),
            tool("gamma", json!([[{"capability": "delta"}, {"capability": "alpha"}]])),
        ];
        match check(&tools).unwrap_err() {
            ValidationError::CapabilityCycle(path) => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&"alpha".to_string()));
                assert!(path.contains(&"gamma".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
