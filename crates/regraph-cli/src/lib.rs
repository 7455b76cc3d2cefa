//! regraph CLI library - testable pipeline steps behind the `regraph` binary
//!
//! Each function here is one step of the registration loop: build the
//! difficulty matrix, plan registrations along the optimal arborescence (or
//! the voting subgraph), evaluate results, feed quality back into the graph,
//! and drive the cluster orchestrator.

pub mod config;

use anyhow::Result;
use config::{Config, GraphConfig, QualityConfig};
use regraph_cluster::{JobBatch, Orchestrator, SshShell};
use regraph_core::{
    make_voting_subgraph, optimize_subgraph, remove_previous_registrations, transform_graph,
    update_graph, CeilingCost, DifficultyGraph, DifficultyMatrix, EdgeList, EvaluatorSet,
    EvaluatorSources, FrameGapHeuristic, FrameId, OptimizedSubgraph, PowerTransform,
    QualityCost, QualityReport, RegistrationProblem, Resolution, ThresholdCost, UpdateOutcome,
    VotingSubgraph,
};
use std::path::Path;
use tracing::info;

/// Load a configuration file, or the defaults when no path is given, and
/// validate it.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Apply command-line values on top of the loaded graph settings. Unlike
/// [`Config::merge`], a value equal to the default still wins.
pub fn override_graph(graph: &mut GraphConfig, frames: Option<usize>, k: Option<usize>) {
    if let Some(frames) = frames {
        graph.frame_count = Some(frames);
    }
    if let Some(k) = k {
        graph.voting_k = k;
    }
}

/// Frame-gap difficulties for frames `0..frame_count`.
pub fn build_difficulty(frame_count: usize, graph: &GraphConfig) -> Result<DifficultyMatrix> {
    if frame_count == 0 {
        anyhow::bail!("frame count must be at least 1");
    }
    let frames: Vec<FrameId> = (0..frame_count).collect();
    let heuristic = FrameGapHeuristic {
        scale: graph.gap_scale,
        max_gap: graph.max_gap,
    };
    Ok(DifficultyMatrix::from_heuristic(&frames, &heuristic)?)
}

pub fn load_graph(path: &Path) -> Result<DifficultyGraph> {
    Ok(DifficultyMatrix::load(path)?.to_graph()?)
}

/// Registrations from the optimal arborescence.
pub struct Plan {
    pub optimized: OptimizedSubgraph,
    pub edges: EdgeList,
}

/// Transform `graph`, pick the root and list the arborescence edges not
/// already in `previous`. Edge weights come from the untransformed graph.
pub fn plan_registrations(
    graph: &DifficultyGraph,
    config: &GraphConfig,
    previous: &[RegistrationProblem],
) -> Result<Plan> {
    let transform = PowerTransform::new(config.difficulty_importance)?;
    let transformed = transform_graph(graph, &transform)?;
    let optimized = optimize_subgraph(&transformed)?;
    let edges = EdgeList::from_arborescence(&optimized.arborescence, graph, config.max_fixed_t);
    let edges = remove_previous_registrations(previous, &edges);
    info!(
        "Planned {} registrations from root {} (longest chain {})",
        edges.len(),
        optimized.root,
        optimized.maximum_problem_chain
    );
    Ok(Plan { optimized, edges })
}

/// Registrations from the `voting_k` nearest neighbors of every frame.
pub fn vote_registrations(
    graph: &DifficultyGraph,
    config: &GraphConfig,
    previous: &[RegistrationProblem],
) -> Result<(VotingSubgraph, EdgeList)> {
    let voting = make_voting_subgraph(graph, config.voting_k)?;
    let edges = EdgeList::from_voting(&voting, config.max_fixed_t);
    let edges = remove_previous_registrations(previous, &edges);
    info!(
        "Selected {} voting registrations (k = {})",
        edges.len(),
        voting.k
    );
    Ok((voting, edges))
}

/// Run the configured evaluators over every resolution of `problems`.
pub fn evaluate_registrations(
    problems: &[RegistrationProblem],
    config: &QualityConfig,
    sources: &EvaluatorSources,
    mask: Option<&Path>,
) -> Result<QualityReport> {
    let set = EvaluatorSet::build(&config.evaluators, sources)?;
    let resolutions = Resolution::all(&config.levels_per_parameter_file);
    Ok(QualityReport::evaluate(
        problems,
        set.evaluators(),
        config.selection_metric.metric(),
        &resolutions,
        mask,
    )?)
}

/// Cost function for the selection metric: a threshold for similarity
/// scores, a ceiling for distance-like scores.
pub fn quality_cost(config: &QualityConfig) -> Result<Box<dyn QualityCost>> {
    if config.selection_metric.higher_is_better() {
        Ok(Box::new(ThresholdCost::new(
            config.threshold,
            config.cost_scale,
        )?))
    } else {
        Ok(Box::new(CeilingCost::new(
            config.ceiling.unwrap_or(f64::INFINITY),
            config.cost_scale,
        )?))
    }
}

/// Reweight `graph` from `reports`, later reports taking precedence.
pub fn apply_quality(
    graph: &DifficultyGraph,
    reports: &[QualityReport],
    config: &QualityConfig,
) -> Result<UpdateOutcome> {
    let cost = quality_cost(config)?;
    Ok(update_graph(
        graph,
        reports,
        config.selection_metric.metric(),
        cost.as_ref(),
    )?)
}

/// Orchestrator over ssh for the configured cluster, resumed from the
/// ledger in the work directory.
pub fn open_orchestrator(config: &Config) -> Result<Orchestrator<SshShell>> {
    let shell = SshShell::new(&config.cluster.host, &config.cluster.user);
    Ok(Orchestrator::open(
        shell,
        config.cluster.clone(),
        config.paths.work_dir.clone(),
    )?)
}

/// One line per batch: index, state, job id, problem count, submission time.
pub fn format_batches(batches: &[JobBatch]) -> String {
    let mut out = String::from("batch\tstate\tjob\tproblems\tsubmitted\n");
    for batch in batches {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\n",
            batch.index,
            batch.state,
            batch.job_id.as_deref().unwrap_or("-"),
            batch.len(),
            batch
                .submitted_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        ));
    }
    out
}
