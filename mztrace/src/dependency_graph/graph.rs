use std::collections::{HashMap, HashSet, VecDeque};
use std::mem;

use identity_hash::BuildIdentityHasher;
use tracing::debug;

use crate::hypothesis::FeatureHypothesis;
use crate::trace::MassTrace;

use super::cluster::HypothesisCluster;
use super::node::{HypothesisKey, TraceGraph, TraceKey};

type HypothesisSet = HashSet<HypothesisKey, BuildIdentityHasher<HypothesisKey>>;

/// A graph relating mass traces to the hypotheses that bind them, from which groups of
/// hypotheses competing for the same traces are gathered and resolved.
#[derive(Debug, Default)]
pub struct HypothesisDependenceGraph {
    pub trace_nodes: TraceGraph,
    pub hypotheses: HashMap<HypothesisKey, FeatureHypothesis, BuildIdentityHasher<HypothesisKey>>,
    pub clusters: Vec<HypothesisCluster>,
}

impl HypothesisDependenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            trace_nodes: TraceGraph::with_capacity(capacity * 4),
            hypotheses: HashMap::with_capacity_and_hasher(capacity, Default::default()),
            clusters: Vec::with_capacity(capacity / 2),
        }
    }

    pub fn reset(&mut self) {
        self.trace_nodes.reset();
        self.hypotheses.clear();
        self.clusters.clear();
    }

    pub fn len(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }

    pub fn add_hypothesis(&mut self, hypothesis: FeatureHypothesis) {
        let key = HypothesisKey(hypothesis.id);
        for binding in hypothesis.bindings.iter() {
            let node = self.trace_nodes.get_or_create_mut(TraceKey(binding.trace));
            node.links.insert(key, binding.score);
        }
        self.hypotheses.insert(key, hypothesis);
    }

    pub fn remove_hypothesis(&mut self, key: &HypothesisKey) -> Option<FeatureHypothesis> {
        let hypothesis = self.hypotheses.remove(key)?;
        self.trace_nodes
            .drop_hypothesis_dependence(hypothesis.trace_ids().map(TraceKey), key);
        Some(hypothesis)
    }

    fn gather_independent_clusters(&self) -> Vec<HypothesisSet> {
        let traversal = BreadFirstTraversal::new(self);
        traversal.collect()
    }

    /// Partition the hypotheses into clusters linked by shared traces, ordered by their
    /// smallest key
    pub fn find_clusters(&mut self) {
        let components = self.gather_independent_clusters();
        self.clusters.clear();
        for keys in components {
            let mut start = f64::INFINITY;
            let mut end = f64::NEG_INFINITY;
            for k in keys.iter() {
                let h = &self.hypotheses[k];
                start = start.min(h.rt_start);
                end = end.max(h.rt_end);
            }
            self.clusters
                .push(HypothesisCluster::new(keys.into_iter().collect(), start, end));
        }
        self.clusters.sort_by_key(|c| c.dependencies.first().copied());
    }

    /// Resolve every cluster, returning each cluster with the hypotheses it kept
    pub fn solutions(
        &mut self,
        traces: &[MassTrace],
        min_isotopes: usize,
        min_score: f64,
    ) -> Vec<(HypothesisCluster, Vec<FeatureHypothesis>)> {
        self.find_clusters();
        let clusters = mem::take(&mut self.clusters);
        let mut solutions = Vec::with_capacity(clusters.len());
        for mut cluster in clusters {
            let members: Vec<FeatureHypothesis> = cluster
                .iter()
                .filter_map(|k| self.remove_hypothesis(k))
                .collect();
            let accepted = cluster.resolve(members, traces, min_isotopes, min_score);
            solutions.push((cluster, accepted));
        }
        debug!(
            "Resolved {} clusters into {} hypotheses",
            solutions.len(),
            solutions.iter().map(|(_, s)| s.len()).sum::<usize>()
        );
        solutions
    }
}

struct BreadFirstTraversal<'a> {
    graph: &'a HypothesisDependenceGraph,
    /// The hypothesis keys that have not yet been visited
    nodes: HashSet<HypothesisKey>,
    /// A record of the traces that have been visited already
    trace_mask: Vec<bool>,
}

impl Iterator for BreadFirstTraversal<'_> {
    type Item = HypothesisSet;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_component()
    }
}

impl<'a> BreadFirstTraversal<'a> {
    fn new(graph: &'a HypothesisDependenceGraph) -> Self {
        let nodes = graph.hypotheses.keys().copied().collect();
        let trace_mask = match graph.trace_nodes.keys().map(|k| k.0).max() {
            Some(n) => vec![false; n + 1],
            None => Vec::new(),
        };
        Self {
            graph,
            nodes,
            trace_mask,
        }
    }

    fn edges_from(&mut self, node: HypothesisKey) -> HypothesisSet {
        let mut next_keys = HypothesisSet::default();
        let Some(hypothesis) = self.graph.hypotheses.get(&node) else {
            return next_keys;
        };
        for trace in hypothesis.trace_ids() {
            // Traces already walked have already contributed their links
            if self.trace_mask[trace] {
                continue;
            }
            self.trace_mask[trace] = true;
            if let Some(trace_node) = self.graph.trace_nodes.get(&TraceKey(trace)) {
                next_keys.extend(
                    trace_node
                        .links
                        .keys()
                        .filter(|k| self.nodes.contains(k))
                        .copied(),
                );
            }
        }
        next_keys
    }

    fn visit(&mut self, node: HypothesisKey) -> HypothesisSet {
        let mut component = HypothesisSet::default();
        let mut nodes = VecDeque::from(vec![node]);

        while let Some(node) = nodes.pop_front() {
            if !self.nodes.remove(&node) {
                continue;
            }
            component.insert(node);
            nodes.extend(self.edges_from(node));
        }
        component
    }

    fn next_component(&mut self) -> Option<HypothesisSet> {
        let node = self.nodes.iter().next().copied()?;
        Some(self.visit(node))
    }
}
