use std::collections::HashSet;

use tracing::trace;

use crate::hypothesis::FeatureHypothesis;
use crate::trace::MassTrace;

use super::node::HypothesisKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClusterState {
    #[default]
    Pending,
    Resolving,
    Resolved,
}

/// A collection of hypotheses connected through shared mass traces
#[derive(Debug, Clone)]
pub struct HypothesisCluster {
    /// The member hypothesis keys in ascending order
    pub dependencies: Vec<HypothesisKey>,
    pub state: ClusterState,
    /// The earliest RT of any member
    pub start: f64,
    /// The latest RT of any member
    pub end: f64,
}

impl HypothesisCluster {
    pub fn new(mut dependencies: Vec<HypothesisKey>, start: f64, end: f64) -> Self {
        dependencies.sort();
        Self {
            dependencies,
            state: ClusterState::Pending,
            start,
            end,
        }
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn contains(&self, key: &HypothesisKey) -> bool {
        self.dependencies.contains(key)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HypothesisKey> {
        self.dependencies.iter()
    }

    /// Greedily select a mutually exclusive subset of `members`.
    ///
    /// The best scoring hypothesis is accepted, its traces are removed from every other
    /// member, members that are no longer viable are discarded, and the rest re-ranked
    /// until no member reaches `min_score`. Ties go to the lower key.
    pub fn resolve(
        &mut self,
        mut members: Vec<FeatureHypothesis>,
        traces: &[MassTrace],
        min_isotopes: usize,
        min_score: f64,
    ) -> Vec<FeatureHypothesis> {
        if members.len() < 2 {
            self.state = ClusterState::Resolved;
            return members
                .into_iter()
                .filter(|h| h.feature_score >= min_score)
                .collect();
        }

        self.state = ClusterState::Resolving;
        let mut accepted = Vec::new();
        while !members.is_empty() {
            members.sort_by(|a, b| {
                b.feature_score
                    .total_cmp(&a.feature_score)
                    .then_with(|| a.id.cmp(&b.id))
            });
            if members[0].feature_score < min_score {
                break;
            }
            let best = members.remove(0);
            let consumed: HashSet<usize> = best.trace_ids().collect();
            members.retain_mut(|h| {
                h.remove_traces(&consumed, traces);
                let keep = !h.is_empty() && h.is_viable(min_isotopes);
                if !keep {
                    trace!("Hypothesis {} lost its traces to {}", h.id, best.id);
                }
                keep
            });
            accepted.push(best);
        }
        self.state = ClusterState::Resolved;
        accepted
    }
}

impl std::ops::Index<usize> for HypothesisCluster {
    type Output = HypothesisKey;

    fn index(&self, index: usize) -> &Self::Output {
        &self.dependencies[index]
    }
}

impl IntoIterator for HypothesisCluster {
    type Item = HypothesisKey;

    type IntoIter = <std::vec::Vec<HypothesisKey> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.dependencies.into_iter()
    }
}
