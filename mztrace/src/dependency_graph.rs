//! Conflict resolution between hypotheses that share mass traces.
mod cluster;
mod graph;
mod node;

pub use cluster::{ClusterState, HypothesisCluster};
pub use graph::HypothesisDependenceGraph;
pub use node::{HypothesisKey, TraceGraph, TraceKey, TraceNode};
