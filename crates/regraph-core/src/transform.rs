//! Monotone reweighting of difficulty graphs.
//!
//! Heuristics that obey the triangle inequality make every indirect path at
//! least as expensive as the direct edge, so shortest paths degenerate into a
//! star around the easiest frame. Raising weights to a power slightly above
//! one makes a hard pair cheaper to cross in several easier steps, while still
//! penalizing long chains that accumulate error.

use crate::graph::DifficultyGraph;
use crate::GraphError;
use tracing::debug;

/// Default exponent offset: weights become `w^(1 + 0.05)`.
pub const DEFAULT_DIFFICULTY_IMPORTANCE: f64 = 0.05;

/// Strictly increasing map applied to every edge weight.
pub trait WeightTransform {
    fn apply(&self, weight: f64) -> f64;
}

impl<F> WeightTransform for F
where
    F: Fn(f64) -> f64,
{
    fn apply(&self, weight: f64) -> f64 {
        self(weight)
    }
}

/// `w -> w^(1 + importance)`.
///
/// Larger `importance` splits difficult registrations into more steps; if too
/// many registrations along long chains accumulate error, lower it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerTransform {
    pub importance: f64,
}

impl PowerTransform {
    pub fn new(importance: f64) -> Result<Self, GraphError> {
        if !importance.is_finite() || importance <= -1.0 {
            return Err(GraphError::InvalidParameter(format!(
                "difficulty importance must be finite and > -1, got {}",
                importance
            )));
        }
        Ok(Self { importance })
    }
}

impl Default for PowerTransform {
    fn default() -> Self {
        Self {
            importance: DEFAULT_DIFFICULTY_IMPORTANCE,
        }
    }
}

impl WeightTransform for PowerTransform {
    fn apply(&self, weight: f64) -> f64 {
        weight.powf(1.0 + self.importance)
    }
}

/// Apply `transform` to every edge of `graph`, returning a new snapshot.
///
/// The transform is checked on the distinct finite weights actually present:
/// it must map them to finite, nonnegative values in strictly increasing order.
/// Infinite weights stay infinite.
pub fn transform_graph(
    graph: &DifficultyGraph,
    transform: &dyn WeightTransform,
) -> Result<DifficultyGraph, GraphError> {
    let mut weights: Vec<f64> = graph
        .edges()
        .map(|(_, _, w)| w)
        .filter(|w| w.is_finite())
        .collect();
    weights.sort_by(f64::total_cmp);
    weights.dedup();

    let mut previous: Option<(f64, f64)> = None;
    for &w in &weights {
        let mapped = transform.apply(w);
        if !mapped.is_finite() || mapped < 0.0 {
            return Err(GraphError::InvalidParameter(format!(
                "transform maps weight {} to {}",
                w, mapped
            )));
        }
        if let Some((lower, mapped_lower)) = previous {
            if mapped <= mapped_lower {
                return Err(GraphError::NonMonotoneTransform {
                    lower,
                    upper: w,
                    mapped_lower,
                    mapped_upper: mapped,
                });
            }
        }
        previous = Some((w, mapped));
    }

    debug!(
        "Transforming {} edges ({} distinct weights)",
        graph.edge_count(),
        weights.len()
    );
    Ok(graph.map_weights(|w| if w.is_finite() { transform.apply(w) } else { w }))
}
