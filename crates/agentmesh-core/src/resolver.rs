// Capability resolver
//
// Pure function over a snapshot of provider tools: filter -> require ->
// score -> select, run once per alternative of a fallback chain.
//
// Tie-break: higher score first, then earlier registration sequence, then
// agent_id, then the tool's position in its agent's declaration. The order
// never depends on the order candidates are supplied in.

use std::cmp::Ordering;

use crate::selector::{Alternative, DependencySelector, TagFilter};

/// One provider tool offered to the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub agent_id: String,
    pub namespace: String,
    pub endpoint: String,
    pub function_name: String,
    pub capability: String,
    pub version: String,
    pub tags: Vec<String>,
    /// Monotonic sequence assigned when the providing agent record was created.
    pub registration_seq: i64,
    /// Position of the tool in its agent's declaration.
    pub position: u32,
}

impl Candidate {
    fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    fn order(&self, other: &Candidate) -> Ordering {
        self.registration_seq
            .cmp(&other.registration_seq)
            .then_with(|| self.agent_id.cmp(&other.agent_id))
            .then_with(|| self.position.cmp(&other.position))
    }
}

/// A candidate that passed filtering, with its preference score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ranked<'a> {
    pub candidate: &'a Candidate,
    pub score: u32,
}

/// Outcome of resolving one selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<'a> {
    /// Index of the alternative that produced candidates.
    pub alternative: usize,
    /// Qualifying candidates, best first. Never empty.
    pub ranking: Vec<Ranked<'a>>,
}

impl<'a> Resolution<'a> {
    /// The selected provider.
    pub fn winner(&self) -> Option<&'a Candidate> {
        self.ranking.first().map(|r| r.candidate)
    }

    /// Every candidate sharing the maximum score, in tie-break order.
    pub fn best(&self) -> &[Ranked<'a>] {
        let top = self.ranking.first().map(|r| r.score).unwrap_or(0);
        let end = self
            .ranking
            .iter()
            .position(|r| r.score < top)
            .unwrap_or(self.ranking.len());
        &self.ranking[..end]
    }
}

/// Run the full pipeline for one alternative.
pub fn rank<'a>(alternative: &Alternative, candidates: &'a [Candidate]) -> Vec<Ranked<'a>> {
    let mut ranked: Vec<Ranked<'a>> = candidates
        .iter()
        .filter(|c| passes_filter(alternative, c))
        .filter(|c| meets_requirements(&alternative.tags, c))
        .map(|candidate| Ranked {
            candidate,
            score: score(&alternative.tags, candidate),
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.candidate.order(b.candidate))
    });
    ranked
}

/// Resolve a selector: the first alternative with any candidate wins.
///
/// Returns `None` when every alternative is exhausted; that is an
/// unresolved dependency, not an error.
pub fn resolve<'a>(selector: &DependencySelector, candidates: &'a [Candidate]) -> Option<Resolution<'a>> {
    selector
        .alternatives()
        .iter()
        .enumerate()
        .find_map(|(alternative, alt)| {
            let ranking = rank(alt, candidates);
            (!ranking.is_empty()).then_some(Resolution {
                alternative,
                ranking,
            })
        })
}

fn passes_filter(alternative: &Alternative, candidate: &Candidate) -> bool {
    if let Some(capability) = &alternative.capability {
        if &candidate.capability != capability {
            return false;
        }
    }
    if let Some(namespace) = &alternative.namespace {
        if &candidate.namespace != namespace {
            return false;
        }
    }
    if let Some(constraint) = &alternative.version {
        if !constraint.matches(&candidate.version) {
            return false;
        }
    }
    !alternative.tags.excluded.iter().any(|t| candidate.has_tag(t))
}

fn meets_requirements(tags: &TagFilter, candidate: &Candidate) -> bool {
    tags.required.iter().all(|t| candidate.has_tag(t))
}

fn score(tags: &TagFilter, candidate: &Candidate) -> u32 {
    tags.preferred.iter().filter(|t| candidate.has_tag(t)).count() as u32
}
