// Version constraints for dependency selectors
//
// Grammar: comparators joined by ',' or whitespace form an AND clause,
// clauses joined by '||' are alternatives. Each clause is a semver::VersionReq,
// so bare versions use caret semantics ("1.2" means ">=1.2.0, <2.0.0").

use std::fmt;
use std::str::FromStr;

use semver::{Version, VersionReq};

use crate::error::{Result, ValidationError};

/// Parsed version constraint, e.g. `>=1.0 <2.0 || ^3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    raw: String,
    clauses: Vec<VersionReq>,
}

impl VersionConstraint {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid(raw, "empty expression"));
        }

        let clauses = trimmed
            .split("||")
            .map(|clause| {
                let normalized = normalize_clause(clause);
                if normalized.is_empty() {
                    return Err(invalid(raw, "empty alternative"));
                }
                VersionReq::parse(&normalized).map_err(|e| invalid(raw, &e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw: trimmed.to_string(),
            clauses,
        })
    }

    /// The expression as declared.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether a provider version satisfies the constraint.
    ///
    /// A provider version that is not valid semver never satisfies a constraint.
    pub fn matches(&self, version: &str) -> bool {
        match Version::parse(version.trim()) {
            Ok(parsed) => self.clauses.iter().any(|req| req.matches(&parsed)),
            Err(_) => false,
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Validate a declared tool version.
pub fn parse_tool_version(function_name: &str, version: &str) -> Result<Version> {
    Version::parse(version.trim()).map_err(|e| ValidationError::InvalidToolVersion {
        function_name: function_name.to_string(),
        version: version.to_string(),
        reason: e.to_string(),
    })
}

fn invalid(raw: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidVersionConstraint {
        constraint: raw.to_string(),
        reason: reason.to_string(),
    }
}

// Rewrites ">= 1.0 <2.0" into ">=1.0, <2.0" so whitespace-separated
// comparators are accepted alongside the comma form.
fn normalize_clause(clause: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut pending_op = String::new();

    for token in clause
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        if token
            .chars()
            .all(|c| matches!(c, '<' | '>' | '=' | '~' | '^'))
        {
            pending_op.push_str(token);
            continue;
        }
        parts.push(format!("{pending_op}{token}"));
        pending_op.clear();
    }

    if !pending_op.is_empty() {
        parts.push(pending_op);
    }

    parts.join(", ")
}
