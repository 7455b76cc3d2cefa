//! Registration quality reports and quality-driven graph reweighting.
//!
//! After a round of registrations, every problem is scored at every
//! resolution. The best resolution's score is mapped to a new edge cost, so
//! the next optimization routes around registrations that went badly. Failing
//! registrations stay in the graph with an infinite cost.

use crate::evaluation::{EvaluationTarget, RegistrationEvaluator};
use crate::graph::DifficultyGraph;
use crate::problem::{ProblemStatus, RegistrationProblem, Resolution};
use crate::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use tracing::{debug, info, warn};

/// Similarity below which a registration is treated as failed.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.9;

/// Metric values of one resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionQuality {
    pub resolution: Resolution,
    pub metrics: BTreeMap<String, f64>,
}

/// Everything measured for one registration problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemQuality {
    pub problem: RegistrationProblem,
    pub resolutions: Vec<ResolutionQuality>,
    /// Resolution with the best selection-metric score, if any succeeded.
    pub best: Option<Resolution>,
    /// Resolutions where some metric errored or was not finite.
    #[serde(default)]
    pub failed: Vec<Resolution>,
}

impl ProblemQuality {
    pub fn metrics_at(&self, resolution: &Resolution) -> Option<&BTreeMap<String, f64>> {
        self.resolutions
            .iter()
            .find(|r| &r.resolution == resolution)
            .map(|r| &r.metrics)
    }

    /// Value of `metric` at the best resolution.
    pub fn best_metric(&self, metric: &str) -> Option<f64> {
        let best = self.best.as_ref()?;
        self.metrics_at(best)?.get(metric).copied()
    }
}

/// Quality of a batch of registrations, as written next to their outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub selection_metric: String,
    pub higher_is_better: bool,
    pub problems: Vec<ProblemQuality>,
}

impl QualityReport {
    /// Run every evaluator on every problem at every resolution.
    ///
    /// Evaluator failures are recorded, not propagated. The best resolution
    /// is the one with the best `selection_metric` score among those that
    /// did not fail; ties go to the earlier resolution.
    pub fn evaluate(
        problems: &[RegistrationProblem],
        evaluators: &[Box<dyn RegistrationEvaluator>],
        selection_metric: &str,
        resolutions: &[Resolution],
        mask: Option<&Path>,
    ) -> Result<Self, GraphError> {
        let selector = evaluators
            .iter()
            .find(|e| e.metric() == selection_metric)
            .ok_or_else(|| {
                GraphError::InvalidParameter(format!(
                    "selection metric '{}' has no evaluator",
                    selection_metric
                ))
            })?;
        if resolutions.is_empty() {
            return Err(GraphError::InvalidParameter(
                "no resolutions to evaluate".into(),
            ));
        }
        let higher_is_better = selector.higher_is_better();

        let mut report = Self {
            selection_metric: selection_metric.to_string(),
            higher_is_better,
            problems: Vec::with_capacity(problems.len()),
        };

        for &problem in problems {
            let mut quality = ProblemQuality {
                problem,
                resolutions: Vec::with_capacity(resolutions.len()),
                best: None,
                failed: Vec::new(),
            };
            let mut best_score: Option<f64> = None;

            for &resolution in resolutions {
                let target = EvaluationTarget {
                    problem,
                    resolution,
                    mask,
                };
                let mut metrics = BTreeMap::new();
                let mut failed = false;
                for evaluator in evaluators {
                    match evaluator.evaluate(&target) {
                        Ok(value) if value.is_finite() => {
                            metrics.insert(evaluator.metric().to_string(), value);
                        }
                        Ok(value) => {
                            debug!(
                                "{} at {} gave non-finite {} = {}",
                                problem,
                                resolution,
                                evaluator.metric(),
                                value
                            );
                            failed = true;
                        }
                        Err(e) => {
                            debug!(
                                "{} at {} failed {}: {}",
                                problem,
                                resolution,
                                evaluator.metric(),
                                e
                            );
                            failed = true;
                        }
                    }
                }

                if failed {
                    quality.failed.push(resolution);
                } else if let Some(&score) = metrics.get(selection_metric) {
                    let better = match best_score {
                        None => true,
                        Some(current) if higher_is_better => score > current,
                        Some(current) => score < current,
                    };
                    if better {
                        best_score = Some(score);
                        quality.best = Some(resolution);
                    }
                }
                quality.resolutions.push(ResolutionQuality {
                    resolution,
                    metrics,
                });
            }

            if quality.best.is_none() {
                warn!("No resolution of {} passed evaluation", problem);
            }
            report.problems.push(quality);
        }

        info!(
            "Evaluated {} problems at {} resolutions ({} without a usable result)",
            report.problems.len(),
            resolutions.len(),
            report.problems.iter().filter(|p| p.best.is_none()).count()
        );
        Ok(report)
    }

    pub fn get(&self, problem: &RegistrationProblem) -> Option<&ProblemQuality> {
        self.problems.iter().find(|p| &p.problem == problem)
    }

    pub fn best_resolution(&self, problem: &RegistrationProblem) -> Option<Resolution> {
        self.get(problem).and_then(|p| p.best)
    }

    /// Failed resolutions per problem, omitting problems with none.
    pub fn failed_resolutions(&self) -> BTreeMap<RegistrationProblem, Vec<Resolution>> {
        self.problems
            .iter()
            .filter(|p| !p.failed.is_empty())
            .map(|p| (p.problem, p.failed.clone()))
            .collect()
    }

    /// `Succeeded` when some resolution is usable, `Failed` when none is,
    /// `None` when the problem was not part of this report.
    pub fn status_of(&self, problem: &RegistrationProblem) -> Option<ProblemStatus> {
        self.get(problem).map(|p| {
            if p.best.is_some() {
                ProblemStatus::Succeeded
            } else {
                ProblemStatus::Failed
            }
        })
    }

    pub fn to_json(&self) -> Result<String, GraphError> {
        serde_json::to_string_pretty(self).map_err(|e| GraphError::QualityParse(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        serde_json::from_str(json).map_err(|e| GraphError::QualityParse(e.to_string()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), GraphError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)
            .map_err(|e| GraphError::Io(path.to_path_buf(), e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GraphError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GraphError::Io(path.to_path_buf(), e.to_string()))?;
        Self::from_json(&content)
    }

    /// One line per problem with its metrics at the best resolution.
    pub fn summary(&self) -> String {
        let mut metric_names: Vec<&str> = self
            .problems
            .iter()
            .flat_map(|p| p.resolutions.iter())
            .flat_map(|r| r.metrics.keys().map(String::as_str))
            .collect();
        metric_names.sort_unstable();
        metric_names.dedup();

        let mut out = String::new();
        let _ = writeln!(out, "problem\tresolution\t{}", metric_names.join("\t"));
        for p in &self.problems {
            match (p.best, p.best.as_ref().and_then(|b| p.metrics_at(b))) {
                (Some(best), Some(metrics)) => {
                    let values: Vec<String> = metric_names
                        .iter()
                        .map(|m| metrics.get(*m).map_or("-".to_string(), |v| format!("{:.4}", v)))
                        .collect();
                    let _ = writeln!(out, "{}\t{}\t{}", p.problem, best, values.join("\t"));
                }
                _ => {
                    let _ = writeln!(out, "{}\tfailed", p.problem);
                }
            }
        }
        out
    }

    /// Write [`summary`](Self::summary) to a text file.
    pub fn write_summary<P: AsRef<Path>>(&self, path: P) -> Result<(), GraphError> {
        let path = path.as_ref();
        std::fs::write(path, self.summary())
            .map_err(|e| GraphError::Io(path.to_path_buf(), e.to_string()))
    }
}

/// Maps a quality metric value to an edge cost.
pub trait QualityCost {
    fn cost(&self, value: f64) -> f64;
}

impl<F: Fn(f64) -> f64> QualityCost for F {
    fn cost(&self, value: f64) -> f64 {
        self(value)
    }
}

/// Use the metric value itself as the cost (for lower-is-better metrics).
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCost;

impl QualityCost for IdentityCost {
    fn cost(&self, value: f64) -> f64 {
        value
    }
}

/// Cost that diverges as a similarity score falls to `threshold`.
///
/// `cost(q) = scale * (1 - threshold) / (q - threshold)` above the threshold,
/// `+inf` at or below it. A perfect score of 1 costs exactly `scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdCost {
    pub threshold: f64,
    pub scale: f64,
}

impl ThresholdCost {
    pub fn new(threshold: f64, scale: f64) -> Result<Self, GraphError> {
        if !threshold.is_finite() || threshold >= 1.0 {
            return Err(GraphError::InvalidParameter(format!(
                "quality threshold must be finite and below 1, got {}",
                threshold
            )));
        }
        if !scale.is_finite() || scale <= 0.0 {
            return Err(GraphError::InvalidParameter(format!(
                "cost scale must be positive, got {}",
                scale
            )));
        }
        Ok(Self { threshold, scale })
    }
}

impl Default for ThresholdCost {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_QUALITY_THRESHOLD,
            scale: 1.0,
        }
    }
}

impl QualityCost for ThresholdCost {
    fn cost(&self, value: f64) -> f64 {
        if value > self.threshold {
            self.scale * (1.0 - self.threshold) / (value - self.threshold)
        } else {
            f64::INFINITY
        }
    }
}

/// Cost for lower-is-better metrics: `scale * value` up to `ceiling`, `+inf`
/// above it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CeilingCost {
    pub ceiling: f64,
    pub scale: f64,
}

impl CeilingCost {
    pub fn new(ceiling: f64, scale: f64) -> Result<Self, GraphError> {
        if ceiling.is_nan() || ceiling < 0.0 {
            return Err(GraphError::InvalidParameter(format!(
                "quality ceiling must be nonnegative, got {}",
                ceiling
            )));
        }
        if !scale.is_finite() || scale <= 0.0 {
            return Err(GraphError::InvalidParameter(format!(
                "cost scale must be positive, got {}",
                scale
            )));
        }
        Ok(Self { ceiling, scale })
    }
}

impl QualityCost for CeilingCost {
    fn cost(&self, value: f64) -> f64 {
        if value <= self.ceiling {
            self.scale * value
        } else {
            f64::INFINITY
        }
    }
}

/// Result of [`update_graph`].
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub graph: DifficultyGraph,
    /// Every edge that received a new cost, in report order.
    pub updated: Vec<(RegistrationProblem, f64)>,
    /// Edges whose new cost is infinite.
    pub excluded: Vec<RegistrationProblem>,
    /// Problems that referenced frames missing from the graph.
    pub skipped: Vec<RegistrationProblem>,
}

/// Reweight `graph` from quality reports.
///
/// Each reported problem's edge gets `cost(metric at best resolution)`.
/// Problems with no usable resolution get `+inf`. Later reports override
/// earlier ones. Edges not mentioned keep their exact previous weight.
pub fn update_graph(
    graph: &DifficultyGraph,
    reports: &[QualityReport],
    metric: &str,
    cost: &dyn QualityCost,
) -> Result<UpdateOutcome, GraphError> {
    let mut latest: BTreeMap<RegistrationProblem, Option<f64>> = BTreeMap::new();
    let mut order = Vec::new();
    for report in reports {
        for p in &report.problems {
            let value = match p.best {
                Some(_) => Some(p.best_metric(metric).ok_or_else(|| {
                    GraphError::QualityParse(format!(
                        "{} has no '{}' value at its best resolution",
                        p.problem, metric
                    ))
                })?),
                None => None,
            };
            if latest.insert(p.problem, value).is_none() {
                order.push(p.problem);
            }
        }
    }

    let mut next = graph.clone();
    let mut outcome_updated = Vec::new();
    let mut excluded = Vec::new();
    let mut skipped = Vec::new();
    for problem in order {
        if !graph.contains_frame(problem.fixed) || !graph.contains_frame(problem.moving) {
            warn!("Skipping {}: frame not in graph", problem);
            skipped.push(problem);
            continue;
        }
        let new_weight = match latest.get(&problem).copied().flatten() {
            Some(value) => cost.cost(value),
            None => f64::INFINITY,
        };
        next.set_edge(problem.fixed, problem.moving, new_weight)?;
        if new_weight.is_infinite() {
            excluded.push(problem);
        }
        outcome_updated.push((problem, new_weight));
    }

    info!(
        "Updated {} edges from quality ({} excluded, {} skipped)",
        outcome_updated.len(),
        excluded.len(),
        skipped.len()
    );
    Ok(UpdateOutcome {
        graph: next,
        updated: outcome_updated,
        excluded,
        skipped,
    })
}
