//! Weighted undirected difficulty graph over frame indices.

use crate::GraphError;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Index of a frame (time point) in the recording.
pub type FrameId = usize;

/// Undirected graph whose edge weights estimate registration difficulty.
///
/// Weights are symmetric and nonnegative. A missing edge means the pair was
/// never considered (infinite cost), which is not the same as a zero weight.
/// `+inf` is a legal weight: it marks a pair that failed quality checks and is
/// kept only so it can still be inspected.
///
/// Frames are never renumbered. Removing a frame leaves every other id as it
/// was, so iteration order of the remaining frames is unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DifficultyGraph {
    adjacency: BTreeMap<FrameId, BTreeMap<FrameId, f64>>,
}

impl DifficultyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a graph with the given frames and no edges.
    pub fn with_frames<I: IntoIterator<Item = FrameId>>(frames: I) -> Self {
        let mut graph = Self::new();
        for frame in frames {
            graph.add_frame(frame);
        }
        graph
    }

    /// Add a frame. Adding an existing frame is a no-op.
    pub fn add_frame(&mut self, frame: FrameId) {
        self.adjacency.entry(frame).or_default();
    }

    /// Set the weight of the undirected edge `(a, b)`, replacing any previous one.
    pub fn set_edge(&mut self, a: FrameId, b: FrameId, weight: f64) -> Result<(), GraphError> {
        if a == b {
            return Err(GraphError::InvalidParameter(format!(
                "self-loop on frame {}",
                a
            )));
        }
        if weight.is_nan() || weight < 0.0 {
            return Err(GraphError::InvalidWeight { a, b, weight });
        }
        for frame in [a, b] {
            if !self.adjacency.contains_key(&frame) {
                return Err(GraphError::UnknownFrame(frame));
            }
        }
        if let Some(neighbors) = self.adjacency.get_mut(&a) {
            neighbors.insert(b, weight);
        }
        if let Some(neighbors) = self.adjacency.get_mut(&b) {
            neighbors.insert(a, weight);
        }
        Ok(())
    }

    pub fn contains_frame(&self, frame: FrameId) -> bool {
        self.adjacency.contains_key(&frame)
    }

    /// Frames in ascending order.
    pub fn frames(&self) -> impl Iterator<Item = FrameId> + '_ {
        self.adjacency.keys().copied()
    }

    pub fn frame_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(|n| n.len()).sum::<usize>() / 2
    }

    pub fn weight(&self, a: FrameId, b: FrameId) -> Option<f64> {
        self.adjacency.get(&a).and_then(|n| n.get(&b)).copied()
    }

    /// Neighbors of `frame` in ascending frame order.
    pub fn neighbors(&self, frame: FrameId) -> impl Iterator<Item = (FrameId, f64)> + '_ {
        self.adjacency
            .get(&frame)
            .into_iter()
            .flat_map(|n| n.iter().map(|(&id, &w)| (id, w)))
    }

    pub fn degree(&self, frame: FrameId) -> usize {
        self.adjacency.get(&frame).map_or(0, |n| n.len())
    }

    /// Every edge once, as `(a, b, weight)` with `a < b`, in lexicographic order.
    pub fn edges(&self) -> impl Iterator<Item = (FrameId, FrameId, f64)> + '_ {
        self.adjacency.iter().flat_map(|(&a, neighbors)| {
            neighbors
                .range((Bound::Excluded(a), Bound::Unbounded))
                .map(move |(&b, &weight)| (a, b, weight))
        })
    }

    /// Largest finite edge weight, if the graph has any finite edge.
    pub fn max_finite_weight(&self) -> Option<f64> {
        self.edges()
            .map(|(_, _, w)| w)
            .filter(|w| w.is_finite())
            .fold(None, |acc: Option<f64>, w| Some(acc.map_or(w, |m| m.max(w))))
    }

    /// Copy of the graph without `frame` and its edges.
    ///
    /// Used when a frame is declared unusable. Other frame ids are untouched.
    pub fn without_frame(&self, frame: FrameId) -> Result<Self, GraphError> {
        if !self.contains_frame(frame) {
            return Err(GraphError::UnknownFrame(frame));
        }
        let mut adjacency = self.adjacency.clone();
        adjacency.remove(&frame);
        for neighbors in adjacency.values_mut() {
            neighbors.remove(&frame);
        }
        Ok(Self { adjacency })
    }

    /// Adjacency view: frame => {neighbor => weight}.
    pub fn to_adjacency(&self) -> BTreeMap<FrameId, BTreeMap<FrameId, f64>> {
        self.adjacency.clone()
    }

    /// New graph with `f` applied to every weight. Symmetry is preserved
    /// because each undirected edge is mapped once.
    pub(crate) fn map_weights<F: FnMut(f64) -> f64>(&self, mut f: F) -> Self {
        let mut mapped = Self::with_frames(self.frames());
        for (a, b, weight) in self.edges() {
            let w = f(weight);
            if let Some(n) = mapped.adjacency.get_mut(&a) {
                n.insert(b, w);
            }
            if let Some(n) = mapped.adjacency.get_mut(&b) {
                n.insert(a, w);
            }
        }
        mapped
    }
}
