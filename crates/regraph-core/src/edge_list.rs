//! Edge-list files: the registrations selected for one iteration.
//!
//! One `fixed moving [weight]` triple per line. Separators may be whitespace
//! or commas, and a line may be wrapped in parentheses, so `(3, 7, 1.25)` and
//! `3 7 1.25` are the same edge.

use crate::graph::{DifficultyGraph, FrameId};
use crate::optimizer::Arborescence;
use crate::problem::RegistrationProblem;
use crate::voting::VotingSubgraph;
use crate::GraphError;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// A selected registration with its difficulty, when known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedEdge {
    pub fixed: FrameId,
    pub moving: FrameId,
    pub weight: Option<f64>,
}

impl SelectedEdge {
    pub fn problem(&self) -> RegistrationProblem {
        RegistrationProblem::new(self.fixed, self.moving)
    }
}

/// Ordered list of selected registrations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeList {
    pub edges: Vec<SelectedEdge>,
}

impl EdgeList {
    /// Arborescence edges in breadth-first order, weighted from `graph`.
    ///
    /// With `max_fixed_t` set, only edges crossing between frames
    /// `<= max_fixed_t` and frames above it are kept, oriented so the fixed
    /// frame is the one at or below the marker (dataset alignment).
    pub fn from_arborescence(
        arborescence: &Arborescence,
        graph: &DifficultyGraph,
        max_fixed_t: Option<FrameId>,
    ) -> Self {
        let edges = arborescence
            .edges()
            .into_iter()
            .map(|(fixed, moving)| SelectedEdge {
                fixed,
                moving,
                weight: graph.weight(fixed, moving),
            })
            .collect();
        Self { edges }.aligned(max_fixed_t)
    }

    /// Undirected voting edges, lower frame as fixed.
    pub fn from_voting(voting: &VotingSubgraph, max_fixed_t: Option<FrameId>) -> Self {
        let edges = voting
            .edges()
            .into_iter()
            .map(|(fixed, moving, w)| SelectedEdge {
                fixed,
                moving,
                weight: Some(w),
            })
            .collect();
        Self { edges }.aligned(max_fixed_t)
    }

    fn aligned(self, max_fixed_t: Option<FrameId>) -> Self {
        let Some(marker) = max_fixed_t else {
            return self;
        };
        let edges = self
            .edges
            .into_iter()
            .filter_map(|e| match (e.fixed <= marker, e.moving <= marker) {
                (true, false) => Some(e),
                (false, true) => Some(SelectedEdge {
                    fixed: e.moving,
                    moving: e.fixed,
                    weight: e.weight,
                }),
                _ => None,
            })
            .collect();
        Self { edges }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn problems(&self) -> Vec<RegistrationProblem> {
        self.edges.iter().map(SelectedEdge::problem).collect()
    }

    pub fn parse(content: &str) -> Result<Self, GraphError> {
        let mut edges = Vec::new();
        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let err = |message: String| GraphError::Parse {
                line: idx + 1,
                message,
            };
            let tokens: Vec<&str> = line
                .trim_start_matches('(')
                .trim_end_matches(')')
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|t| !t.is_empty())
                .collect();
            if !(2..=3).contains(&tokens.len()) {
                return Err(err(format!(
                    "expected 'fixed moving [weight]', found {} fields",
                    tokens.len()
                )));
            }
            let fixed = tokens[0]
                .parse()
                .map_err(|_| err(format!("invalid fixed frame '{}'", tokens[0])))?;
            let moving = tokens[1]
                .parse()
                .map_err(|_| err(format!("invalid moving frame '{}'", tokens[1])))?;
            let weight = match tokens.get(2) {
                Some(t) => Some(
                    t.parse::<f64>()
                        .map_err(|_| err(format!("invalid weight '{}'", t)))?,
                ),
                None => None,
            };
            edges.push(SelectedEdge {
                fixed,
                moving,
                weight,
            });
        }
        debug!("Parsed {} edges", edges.len());
        Ok(Self { edges })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GraphError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GraphError::Io(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), GraphError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_string())
            .map_err(|e| GraphError::Io(path.to_path_buf(), e.to_string()))
    }
}

impl fmt::Display for EdgeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in &self.edges {
            match e.weight {
                Some(w) => writeln!(f, "{} {} {}", e.fixed, e.moving, w)?,
                None => writeln!(f, "{} {}", e.fixed, e.moving)?,
            }
        }
        Ok(())
    }
}

/// Drop edges whose frame pair was already registered, in either orientation.
pub fn remove_previous_registrations(
    previous: &[RegistrationProblem],
    edges: &EdgeList,
) -> EdgeList {
    let kept: Vec<SelectedEdge> = edges
        .edges
        .iter()
        .filter(|e| {
            let p = e.problem();
            !previous.iter().any(|prev| prev.same_pair(&p))
        })
        .copied()
        .collect();
    debug!(
        "Removed {} previously registered edges",
        edges.len() - kept.len()
    );
    EdgeList { edges: kept }
}
