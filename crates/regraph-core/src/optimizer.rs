//! Root selection and shortest-path arborescence.
//!
//! Every frame is registered along the shortest difficulty path from a single
//! root frame. The root is the frame with the smallest mean shortest-path
//! distance to all other frames; the registration order is the tree of
//! shortest-path predecessors from that root.

use crate::graph::{DifficultyGraph, FrameId};
use crate::GraphError;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, VecDeque};
use tracing::{debug, info};

/// Directed tree of registration problems, edges pointing away from the root.
#[derive(Debug, Clone, PartialEq)]
pub struct Arborescence {
    root: FrameId,
    parent: BTreeMap<FrameId, FrameId>,
    children: BTreeMap<FrameId, Vec<FrameId>>,
    depth: BTreeMap<FrameId, usize>,
}

impl Arborescence {
    /// Build from a predecessor map. Every predecessor chain must end at `root`.
    fn from_predecessors(
        root: FrameId,
        parent: BTreeMap<FrameId, FrameId>,
    ) -> Result<Self, GraphError> {
        let mut children: BTreeMap<FrameId, Vec<FrameId>> = BTreeMap::new();
        children.entry(root).or_default();
        for (&child, &p) in &parent {
            children.entry(p).or_default().push(child);
            children.entry(child).or_default();
        }
        for kids in children.values_mut() {
            kids.sort_unstable();
        }

        let mut depth = BTreeMap::new();
        depth.insert(root, 0);
        let mut queue = VecDeque::from([root]);
        while let Some(node) = queue.pop_front() {
            let d = depth[&node];
            for &child in &children[&node] {
                if depth.insert(child, d + 1).is_some() {
                    return Err(GraphError::InvalidParameter(format!(
                        "frame {} reached twice while building arborescence",
                        child
                    )));
                }
                queue.push_back(child);
            }
        }
        if depth.len() != children.len() {
            return Err(GraphError::InvalidParameter(
                "predecessor map contains a cycle".into(),
            ));
        }

        Ok(Self {
            root,
            parent,
            children,
            depth,
        })
    }

    pub fn root(&self) -> FrameId {
        self.root
    }

    pub fn parent(&self, frame: FrameId) -> Option<FrameId> {
        self.parent.get(&frame).copied()
    }

    pub fn children(&self, frame: FrameId) -> &[FrameId] {
        self.children.get(&frame).map_or(&[], |c| c.as_slice())
    }

    /// Number of edges between the root and `frame`.
    pub fn depth(&self, frame: FrameId) -> Option<usize> {
        self.depth.get(&frame).copied()
    }

    pub fn contains(&self, frame: FrameId) -> bool {
        self.depth.contains_key(&frame)
    }

    /// Frames covered by the tree, root included, ascending.
    pub fn frames(&self) -> impl Iterator<Item = FrameId> + '_ {
        self.depth.keys().copied()
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Longest root-to-leaf chain, in edges.
    pub fn max_depth(&self) -> usize {
        self.depth.values().copied().max().unwrap_or(0)
    }

    /// `(fixed, moving)` edges in breadth-first order from the root.
    pub fn edges(&self) -> Vec<(FrameId, FrameId)> {
        let mut edges = Vec::with_capacity(self.parent.len());
        let mut queue = VecDeque::from([self.root]);
        while let Some(node) = queue.pop_front() {
            for &child in self.children(node) {
                edges.push((node, child));
                queue.push_back(child);
            }
        }
        edges
    }

    /// Frames from the root down to `frame`, inclusive.
    pub fn path_to(&self, frame: FrameId) -> Option<Vec<FrameId>> {
        if !self.contains(frame) {
            return None;
        }
        let mut path = vec![frame];
        let mut current = frame;
        while let Some(p) = self.parent(current) {
            path.push(p);
            current = p;
        }
        path.reverse();
        Some(path)
    }
}

/// Output of [`optimize_subgraph`].
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedSubgraph {
    pub root: FrameId,
    pub arborescence: Arborescence,
    /// Frames on the longest root-to-leaf chain, root included, so one more
    /// than the arborescence depth. Callers scale timeouts and resources by it.
    pub maximum_problem_chain: usize,
    /// Shortest-path distance from the root to every reachable frame.
    pub root_distances: BTreeMap<FrameId, f64>,
    /// Mean distance (with the disconnection penalty) used to rank candidates.
    pub mean_distances: BTreeMap<FrameId, f64>,
    /// Frames outside the root's component; they get no registration.
    pub unreachable: Vec<FrameId>,
}

/// Pick the root frame and derive the registration arborescence.
///
/// The root minimizes the mean shortest-path distance to all other frames,
/// ties going to the lowest frame id. Pairs with no connecting path count as
/// the graph's maximum finite edge weight. That penalty is an approximation
/// carried over as-is: it is not a bound on any real distance, it only keeps
/// the mean defined for frames in small components.
pub fn optimize_subgraph(graph: &DifficultyGraph) -> Result<OptimizedSubgraph, GraphError> {
    if graph.is_empty() {
        return Err(GraphError::EmptyGraph);
    }

    let penalty = graph.max_finite_weight().unwrap_or(0.0);
    let others = (graph.frame_count() - 1).max(1) as f64;

    let mut best: Option<(FrameId, f64, ShortestPaths)> = None;
    let mut mean_distances = BTreeMap::new();
    for source in graph.frames() {
        let paths = dijkstra(graph, source);
        let total: f64 = graph
            .frames()
            .filter(|&f| f != source)
            .map(|f| paths.dist.get(&f).copied().unwrap_or(penalty))
            .sum();
        let mean = total / others;
        mean_distances.insert(source, mean);
        let better = match &best {
            None => true,
            Some((_, best_mean, _)) => mean < *best_mean,
        };
        if better {
            best = Some((source, mean, paths));
        }
    }
    let (root, mean, paths) = best.ok_or(GraphError::EmptyGraph)?;

    let arborescence = Arborescence::from_predecessors(root, paths.pred)?;
    let unreachable: Vec<FrameId> = graph.frames().filter(|&f| !arborescence.contains(f)).collect();
    let maximum_problem_chain = arborescence.max_depth() + 1;

    info!(
        "Selected root frame {} (mean distance {:.4}), {} registrations, longest chain {}",
        root,
        mean,
        arborescence.len(),
        maximum_problem_chain
    );
    if !unreachable.is_empty() {
        debug!("{} frames unreachable from root: {:?}", unreachable.len(), unreachable);
    }

    Ok(OptimizedSubgraph {
        root,
        arborescence,
        maximum_problem_chain,
        root_distances: paths.dist,
        mean_distances,
        unreachable,
    })
}

struct ShortestPaths {
    dist: BTreeMap<FrameId, f64>,
    pred: BTreeMap<FrameId, FrameId>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct HeapEntry {
    dist: f64,
    frame: FrameId,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    // BinaryHeap is a max-heap: reverse so the closest (then lowest id) pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.frame.cmp(&self.frame))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Single-source shortest paths. Only finite edges are traversed.
///
/// A predecessor always points at a frame settled earlier, so the predecessor
/// map is acyclic. Equal-length alternatives go to the lower frame id among
/// those settled before the target.
fn dijkstra(graph: &DifficultyGraph, source: FrameId) -> ShortestPaths {
    let mut dist: BTreeMap<FrameId, f64> = BTreeMap::new();
    let mut pred: BTreeMap<FrameId, FrameId> = BTreeMap::new();
    let mut settled: BTreeSet<FrameId> = BTreeSet::new();
    let mut heap = BinaryHeap::new();

    dist.insert(source, 0.0);
    heap.push(HeapEntry {
        dist: 0.0,
        frame: source,
    });

    while let Some(HeapEntry { dist: d, frame: u }) = heap.pop() {
        if !settled.insert(u) {
            continue;
        }
        for (v, w) in graph.neighbors(u) {
            if !w.is_finite() || settled.contains(&v) {
                continue;
            }
            let candidate = d + w;
            let improves = match dist.get(&v) {
                None => true,
                Some(&current) => {
                    candidate < current
                        || (candidate == current && pred.get(&v).is_some_and(|&p| u < p))
                }
            };
            if improves {
                dist.insert(v, candidate);
                pred.insert(v, u);
                heap.push(HeapEntry {
                    dist: candidate,
                    frame: v,
                });
            }
        }
    }

    ShortestPaths { dist, pred }
}
