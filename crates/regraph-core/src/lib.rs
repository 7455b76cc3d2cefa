//! # Regraph Core
//!
//! Scheduling graph for pairwise registration of time-lapse volumes.
//!
//! Every frame of a recording is a node; every candidate registration between
//! two frames is an edge weighted by its estimated difficulty. Instead of
//! registering every frame directly against one reference, the optimizer picks
//! a root frame and a shortest-path arborescence so that hard pairs are split
//! into chains of easier ones.
//!
//! ## Modules
//!
//! - [`graph`]: the immutable [`DifficultyGraph`] snapshot
//! - [`builder`] / [`adjacency`]: graphs from heuristics or adjacency files
//! - [`transform`]: monotone reweighting (`w -> w^(1+k)` by default)
//! - [`optimizer`]: root selection and shortest-path arborescence
//! - [`voting`]: k-nearest-neighbor subgraph for redundant registrations
//! - [`evaluation`] / [`quality`]: registration quality and graph feedback
//! - [`problem`] / [`edge_list`]: registration problems and edge-list files
//! - [`history`]: per-iteration graph snapshots
//!
//! ## Quick Start
//!
//! ```
//! use regraph_core::{optimize_subgraph, DifficultyGraph};
//!
//! let mut graph = DifficultyGraph::with_frames(0..5);
//! for (a, b, w) in [(0, 1, 1.0), (1, 2, 1.0), (2, 3, 1.0), (3, 4, 1.0), (0, 4, 10.0)] {
//!     graph.set_edge(a, b, w).unwrap();
//! }
//!
//! let plan = optimize_subgraph(&graph).unwrap();
//! assert_eq!(plan.root, 2);
//! assert_eq!(plan.maximum_problem_chain, 3);
//! ```

pub mod adjacency;
pub mod builder;
pub mod edge_list;
pub mod evaluation;
pub mod graph;
pub mod history;
pub mod optimizer;
pub mod problem;
pub mod quality;
pub mod transform;
pub mod voting;

pub use adjacency::DifficultyMatrix;
pub use builder::{DifficultyHeuristic, FrameGapHeuristic};
pub use edge_list::{remove_previous_registrations, EdgeList, SelectedEdge};
pub use evaluation::{
    calculate_ncc, AnnotationEvaluator, CentroidEvaluator, CentroidSource, EvaluationTarget,
    EvaluatorKind, EvaluatorSet, EvaluatorSources, NccEvaluator, RegistrationEvaluator,
    VolumeSource,
};
pub use graph::{DifficultyGraph, FrameId};
pub use history::GraphHistory;
pub use optimizer::{optimize_subgraph, Arborescence, OptimizedSubgraph};
pub use problem::{ProblemStatus, RegistrationProblem, Resolution};
pub use quality::{
    update_graph, CeilingCost, IdentityCost, ProblemQuality, QualityCost, QualityReport,
    ResolutionQuality, ThresholdCost, UpdateOutcome, DEFAULT_QUALITY_THRESHOLD,
};
pub use transform::{
    transform_graph, PowerTransform, WeightTransform, DEFAULT_DIFFICULTY_IMPORTANCE,
};
pub use voting::{make_voting_subgraph, VotingSubgraph};

use std::path::PathBuf;

/// Errors raised while building, transforming or reading difficulty graphs.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Failed to access {0}: {1}")]
    Io(PathBuf, String),

    #[error("Graph has no frames")]
    EmptyGraph,

    #[error("Invalid weight {weight} for edge ({a}, {b})")]
    InvalidWeight { a: FrameId, b: FrameId, weight: f64 },

    #[error("Unknown frame: {0}")]
    UnknownFrame(FrameId),

    #[error(
        "Transform is not strictly increasing: \
         f({lower}) = {mapped_lower}, f({upper}) = {mapped_upper}"
    )]
    NonMonotoneTransform {
        lower: f64,
        upper: f64,
        mapped_lower: f64,
        mapped_upper: f64,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid quality report: {0}")]
    QualityParse(String),
}

/// Errors raised by a [`RegistrationEvaluator`].
///
/// These never abort a quality run; the affected resolution is recorded as
/// failed instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("Missing input for {0}")]
    MissingInput(String),

    #[error("Shape mismatch: fixed has {fixed} voxels, moving has {moving}")]
    ShapeMismatch { fixed: usize, moving: usize },

    #[error("Metric is undefined: {0}")]
    Undefined(String),

    #[error("{0}")]
    Other(String),
}
