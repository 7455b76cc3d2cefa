//! Graph snapshots across registration iterations.

use crate::graph::DifficultyGraph;
use std::sync::Arc;

/// Append-only list of graph snapshots, one per iteration.
///
/// Snapshots are shared, so handing one to a running optimization never
/// copies the graph.
#[derive(Debug, Clone, Default)]
pub struct GraphHistory {
    snapshots: Vec<Arc<DifficultyGraph>>,
}

impl GraphHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial(graph: DifficultyGraph) -> Self {
        let mut history = Self::new();
        history.push(graph);
        history
    }

    /// Record the graph of the next iteration and return its index.
    pub fn push(&mut self, graph: DifficultyGraph) -> usize {
        self.snapshots.push(Arc::new(graph));
        self.snapshots.len() - 1
    }

    pub fn get(&self, iteration: usize) -> Option<Arc<DifficultyGraph>> {
        self.snapshots.get(iteration).cloned()
    }

    pub fn latest(&self) -> Option<Arc<DifficultyGraph>> {
        self.snapshots.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DifficultyGraph>> {
        self.snapshots.iter()
    }
}
