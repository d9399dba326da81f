use std::collections::hash_map::{Entry, Keys};
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use identity_hash::{BuildIdentityHasher, IdentityHashable};

use crate::hypothesis::ScoreType;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HypothesisKey(pub usize);

impl Hash for HypothesisKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_usize(self.0);
    }
}

impl IdentityHashable for HypothesisKey {}

impl Display for HypothesisKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<usize> for HypothesisKey {
    fn from(value: usize) -> Self {
        HypothesisKey(value)
    }
}

/// The id of a [`MassTrace`](crate::trace::MassTrace)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TraceKey(pub usize);

impl Hash for TraceKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_usize(self.0);
    }
}

impl IdentityHashable for TraceKey {}

impl From<usize> for TraceKey {
    fn from(value: usize) -> Self {
        TraceKey(value)
    }
}

pub(crate) type HypothesisLinks = HashMap<HypothesisKey, ScoreType, BuildIdentityHasher<HypothesisKey>>;

/// A mass trace and the hypotheses that bind it
#[derive(Debug)]
pub struct TraceNode {
    pub key: TraceKey,
    pub links: HypothesisLinks,
}

impl TraceNode {
    pub fn new<T: Into<TraceKey>>(key: T) -> Self {
        Self {
            key: key.into(),
            links: HashMap::default(),
        }
    }

    pub fn contains(&self, hypothesis: &HypothesisKey) -> bool {
        self.links.contains_key(hypothesis)
    }

    pub fn remove(&mut self, hypothesis: &HypothesisKey) -> Option<ScoreType> {
        self.links.remove(hypothesis)
    }
}

#[derive(Debug, Default)]
pub struct TraceGraph {
    pub nodes: HashMap<TraceKey, TraceNode, BuildIdentityHasher<TraceKey>>,
}

impl TraceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: HashMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    pub fn reset(&mut self) {
        self.nodes.clear();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, key: &TraceKey) -> Option<&TraceNode> {
        self.nodes.get(key)
    }

    pub fn get_or_create_mut(&mut self, key: TraceKey) -> &mut TraceNode {
        match self.nodes.entry(key) {
            Entry::Occupied(o) => o.into_mut(),
            Entry::Vacant(v) => v.insert(TraceNode::new(key)),
        }
    }

    pub fn keys(&self) -> Keys<'_, TraceKey, TraceNode> {
        self.nodes.keys()
    }

    pub fn drop_hypothesis_dependence<I: Iterator<Item = TraceKey>>(
        &mut self,
        trace_iter: I,
        hypothesis: &HypothesisKey,
    ) {
        for t in trace_iter {
            if let Some(node) = self.nodes.get_mut(&t) {
                node.remove(hypothesis);
            } else {
                tracing::warn!("Failed to remove {hypothesis} for {t:?}");
            }
        }
    }
}
