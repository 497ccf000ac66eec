// Dependency selectors
//
// A declared dependency is normalized into an ordered fallback chain of
// alternatives. Each alternative is one AND clause (capability, version,
// namespace, tag terms) that the resolver pipeline runs on its own.
//
// Decision: OR groups expand into the chain instead of a boolean expression
// tree. ["add", ["python", "typescript"]] becomes [add+python, add+typescript],
// so an earlier OR member is always preferred over a later one.
//
// Inside an OR group `+tag` is still a member that must match (and scores as a
// preference), while `-tag` is not a member at all: it excludes in every
// alternative the group produces.

use crate::error::{Result, ValidationError};
use crate::registration::{DependencySpec, SelectorSpec, TagSpec};
use crate::validation::validate_capability_name;
use crate::version::VersionConstraint;

/// Upper bound on alternatives one dependency may expand into.
pub const MAX_ALTERNATIVES: usize = 64;

/// One parsed tag term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagTerm {
    /// Plain tag: candidate must carry it.
    Required(String),
    /// `+tag`: one point when the candidate carries it.
    Preferred(String),
    /// `-tag`: candidate carrying it is disqualified.
    Excluded(String),
}

impl TagTerm {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Some(name) = raw.strip_prefix('+') {
            Ok(TagTerm::Preferred(tag_name(raw, name)?))
        } else if let Some(name) = raw.strip_prefix('-') {
            Ok(TagTerm::Excluded(tag_name(raw, name)?))
        } else {
            Ok(TagTerm::Required(tag_name(raw, raw)?))
        }
    }
}

fn tag_name(raw: &str, name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() || name.starts_with(['+', '-']) {
        return Err(ValidationError::InvalidTag(raw.to_string()));
    }
    Ok(name.to_string())
}

/// Tag terms of one alternative, split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    pub required: Vec<String>,
    pub preferred: Vec<String>,
    pub excluded: Vec<String>,
}

impl TagFilter {
    fn push(&mut self, term: TagTerm) {
        match term {
            TagTerm::Required(tag) => self.required.push(tag),
            TagTerm::Preferred(tag) => self.preferred.push(tag),
            TagTerm::Excluded(tag) => self.excluded.push(tag),
        }
    }
}

/// One AND clause of a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternative {
    pub capability: Option<String>,
    pub version: Option<VersionConstraint>,
    pub namespace: Option<String>,
    pub tags: TagFilter,
}

/// A dependency normalized into an ordered, non-empty fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySelector {
    alternatives: Vec<Alternative>,
}

impl DependencySelector {
    pub fn from_spec(spec: &DependencySpec) -> Result<Self> {
        let bare;
        let chain: &[SelectorSpec] = match spec {
            DependencySpec::Capability(name) => {
                bare = [SelectorSpec {
                    capability: Some(name.clone()),
                    ..SelectorSpec::default()
                }];
                &bare
            }
            DependencySpec::Selector(selector) => std::slice::from_ref(selector),
            DependencySpec::Chain(chain) => chain,
        };

        if chain.is_empty() {
            return Err(ValidationError::EmptySelector);
        }

        let mut alternatives = Vec::new();
        for selector in chain {
            alternatives.extend(expand(selector)?);
            if alternatives.len() > MAX_ALTERNATIVES {
                return Err(ValidationError::TooManyAlternatives {
                    limit: MAX_ALTERNATIVES,
                });
            }
        }

        Ok(Self { alternatives })
    }

    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }

    /// Capability of the first alternative that names one.
    pub fn primary_capability(&self) -> Option<&str> {
        self.alternatives
            .iter()
            .find_map(|alt| alt.capability.as_deref())
    }

    /// Every capability this selector could resolve to.
    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        self.alternatives
            .iter()
            .filter_map(|alt| alt.capability.as_deref())
    }
}

// Cartesian product of OR groups, leftmost group varying slowest.
fn expand(spec: &SelectorSpec) -> Result<Vec<Alternative>> {
    let capability = match spec.capability.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => {
            validate_capability_name(name)?;
            Some(name.to_string())
        }
        _ => None,
    };

    if capability.is_none() && spec.tags.is_empty() {
        return Err(ValidationError::EmptySelector);
    }

    let version = spec
        .version
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .map(VersionConstraint::parse)
        .transpose()?;

    let namespace = spec
        .namespace
        .as_deref()
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
        .map(str::to_string);

    let mut combos = vec![TagFilter::default()];
    for entry in &spec.tags {
        let options = match entry {
            TagSpec::Tag(raw) => vec![vec![TagTerm::parse(raw)?]],
            TagSpec::AnyOf(group) => group_options(group)?,
        };

        if combos.len() * options.len() > MAX_ALTERNATIVES {
            return Err(ValidationError::TooManyAlternatives {
                limit: MAX_ALTERNATIVES,
            });
        }

        combos = combos
            .iter()
            .flat_map(|base| {
                options.iter().map(move |terms| {
                    let mut next = base.clone();
                    for term in terms {
                        next.push(term.clone());
                    }
                    next
                })
            })
            .collect();
    }

    Ok(combos
        .into_iter()
        .map(|tags| Alternative {
            capability: capability.clone(),
            version: version.clone(),
            namespace: namespace.clone(),
            tags,
        })
        .collect())
}

// One option per matchable member, in declaration order. Exclusions from the
// group are carried by every option.
fn group_options(group: &[String]) -> Result<Vec<Vec<TagTerm>>> {
    let mut members = Vec::new();
    let mut excluded = Vec::new();
    for raw in group {
        match TagTerm::parse(raw)? {
            TagTerm::Required(tag) => members.push(vec![TagTerm::Required(tag)]),
            TagTerm::Preferred(tag) => members.push(vec![
                TagTerm::Required(tag.clone()),
                TagTerm::Preferred(tag),
            ]),
            excluded_term @ TagTerm::Excluded(_) => excluded.push(excluded_term),
        }
    }

    if members.is_empty() {
        return Err(ValidationError::EmptyTagGroup);
    }
    for option in &mut members {
        option.extend(excluded.iter().cloned());
    }
    Ok(members)
}
