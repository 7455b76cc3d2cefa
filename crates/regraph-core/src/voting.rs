//! k-nearest-neighbor subgraph for redundant registrations.
//!
//! Each frame keeps its `k` easiest registrations. Registering along all of
//! them gives several independent paths between frames, which a later
//! consensus step can reconcile.

use crate::graph::{DifficultyGraph, FrameId};
use crate::GraphError;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Result of [`make_voting_subgraph`].
#[derive(Debug, Clone, PartialEq)]
pub struct VotingSubgraph {
    pub k: usize,
    out_edges: BTreeMap<FrameId, Vec<(FrameId, f64)>>,
    /// Frames that ended up with no edge at all.
    pub disconnected: Vec<FrameId>,
}

impl VotingSubgraph {
    /// The neighbors `frame` selected, easiest first.
    pub fn out_neighbors(&self, frame: FrameId) -> &[(FrameId, f64)] {
        self.out_edges.get(&frame).map_or(&[], |e| e.as_slice())
    }

    pub fn out_degree(&self, frame: FrameId) -> usize {
        self.out_neighbors(frame).len()
    }

    /// Union of all selections as undirected `(a, b, weight)` with `a < b`.
    pub fn edges(&self) -> Vec<(FrameId, FrameId, f64)> {
        let mut seen = BTreeSet::new();
        let mut edges = Vec::new();
        for (&frame, selected) in &self.out_edges {
            for &(neighbor, weight) in selected {
                let key = (frame.min(neighbor), frame.max(neighbor));
                if seen.insert(key) {
                    edges.push((key.0, key.1, weight));
                }
            }
        }
        edges.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        edges
    }

    /// The undirected union as a graph over the same frames.
    pub fn to_graph(&self) -> Result<DifficultyGraph, GraphError> {
        let mut graph = DifficultyGraph::with_frames(self.out_edges.keys().copied());
        for (a, b, w) in self.edges() {
            graph.set_edge(a, b, w)?;
        }
        Ok(graph)
    }
}

/// Connect every frame to its `k` lowest-weight neighbors.
///
/// Frames with fewer than `k` neighbors keep all of them. Equal weights are
/// resolved by frame id. Infinite (failed) edges are never selected.
pub fn make_voting_subgraph(
    graph: &DifficultyGraph,
    k: usize,
) -> Result<VotingSubgraph, GraphError> {
    if k == 0 {
        return Err(GraphError::InvalidParameter(
            "voting degree must be at least 1".into(),
        ));
    }

    let mut out_edges = BTreeMap::new();
    let mut disconnected = Vec::new();
    for frame in graph.frames() {
        let mut candidates: Vec<(FrameId, f64)> =
            graph.neighbors(frame).filter(|(_, w)| w.is_finite()).collect();
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        candidates.truncate(k);
        if candidates.is_empty() {
            disconnected.push(frame);
        }
        out_edges.insert(frame, candidates);
    }

    let subgraph = VotingSubgraph {
        k,
        out_edges,
        disconnected,
    };
    info!(
        "Voting subgraph with k={}: {} edges over {} frames",
        k,
        subgraph.edges().len(),
        graph.frame_count()
    );
    if !subgraph.disconnected.is_empty() {
        warn!(
            "{} frames disconnected from the voting subgraph: {:?}",
            subgraph.disconnected.len(),
            subgraph.disconnected
        );
    }
    Ok(subgraph)
}
