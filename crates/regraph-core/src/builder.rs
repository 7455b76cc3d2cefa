//! Difficulty graphs from pairwise heuristics.

use crate::adjacency::DifficultyMatrix;
use crate::graph::{DifficultyGraph, FrameId};
use crate::GraphError;

/// Heuristic estimate of how hard it is to register `moving` onto `fixed`.
///
/// Returning `None` (or a non-finite value) means the pair should not become
/// an edge. Any `Fn(FrameId, FrameId) -> Option<f64>` is a heuristic.
pub trait DifficultyHeuristic {
    fn difficulty(&self, fixed: FrameId, moving: FrameId) -> Option<f64>;
}

impl<F> DifficultyHeuristic for F
where
    F: Fn(FrameId, FrameId) -> Option<f64>,
{
    fn difficulty(&self, fixed: FrameId, moving: FrameId) -> Option<f64> {
        self(fixed, moving)
    }
}

/// Difficulty proportional to the time gap between two frames.
///
/// Suitable for recordings where motion accumulates steadily with time.
/// Pairs further apart than `max_gap` get no edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGapHeuristic {
    pub scale: f64,
    pub max_gap: Option<usize>,
}

impl Default for FrameGapHeuristic {
    fn default() -> Self {
        Self {
            scale: 1.0,
            max_gap: None,
        }
    }
}

impl DifficultyHeuristic for FrameGapHeuristic {
    fn difficulty(&self, fixed: FrameId, moving: FrameId) -> Option<f64> {
        let gap = fixed.abs_diff(moving);
        match self.max_gap {
            Some(max) if gap > max => None,
            _ => Some(self.scale * gap as f64),
        }
    }
}

impl DifficultyGraph {
    /// Evaluate `heuristic` on every ordered pair of `frames` and build the graph.
    ///
    /// Goes through [`DifficultyMatrix`] so a graph built here is identical to
    /// one written to an adjacency file and loaded back.
    pub fn from_heuristic(
        frames: &[FrameId],
        heuristic: &dyn DifficultyHeuristic,
    ) -> Result<Self, GraphError> {
        DifficultyMatrix::from_heuristic(frames, heuristic)?.to_graph()
    }
}
