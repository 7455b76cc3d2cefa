//! regraph CLI - plan, run and refine registrations of a time-lapse recording

use anyhow::Result;
use clap::{Parser, Subcommand};
use regraph_cli::config::{Config, LoggingConfig};
use regraph_cli::{
    apply_quality, build_difficulty, evaluate_registrations, format_batches, load_config,
    load_graph, open_orchestrator, override_graph, plan_registrations, vote_registrations,
};
use regraph_core::{
    AnnotationEvaluator, DifficultyMatrix, EdgeList, EvaluatorSources, QualityReport,
    RegistrationProblem,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "regraph")]
#[command(author = "regraph Contributors")]
#[command(version = "0.1.0")]
#[command(about = "regraph - registration planning over difficulty graphs", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, global = true, env = "REGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level regardless of the configured level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a frame-gap difficulty matrix
    Difficulty {
        /// Number of frames (overrides graph.frame_count)
        #[arg(short = 'n', long)]
        frames: Option<usize>,

        /// Adjacency matrix output path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Plan registrations along the optimal arborescence
    Plan {
        /// Adjacency matrix of difficulties
        adjacency: PathBuf,

        /// Edge list output path
        #[arg(short, long)]
        output: PathBuf,

        /// Edge list of registrations already done
        #[arg(long)]
        previous: Option<PathBuf>,
    },

    /// Plan redundant registrations to each frame's nearest neighbors
    Vote {
        /// Adjacency matrix of difficulties
        adjacency: PathBuf,

        /// Neighbors per frame (overrides graph.voting_k)
        #[arg(short)]
        k: Option<usize>,

        /// Edge list output path
        #[arg(short, long)]
        output: PathBuf,

        /// Edge list of registrations already done
        #[arg(long)]
        previous: Option<PathBuf>,
    },

    /// Score finished registrations and write a quality report
    Evaluate {
        /// Edge list of registrations to score
        edges: PathBuf,

        /// Edge list of registrations an operator flagged as bad
        #[arg(long)]
        annotations: Option<PathBuf>,

        /// Quality report output path (JSON)
        #[arg(short, long)]
        output: PathBuf,

        /// Also write a tab-separated summary
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Reweight the difficulty matrix from quality reports
    Update {
        /// Adjacency matrix of difficulties
        adjacency: PathBuf,

        /// Quality reports, oldest first
        #[arg(short, long, required = true, num_args = 1..)]
        reports: Vec<PathBuf>,

        /// Updated adjacency matrix output path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Submit registrations to the cluster in array jobs
    Submit {
        /// Edge list of registrations to run
        edges: PathBuf,
    },

    /// Wait until submitted jobs leave the queue
    Wait {
        /// Give up after this many seconds (overrides cluster.max_wait_secs)
        #[arg(long)]
        max_wait: Option<u64>,

        /// Seconds between polls (overrides cluster.poll_interval_secs)
        #[arg(long)]
        poll_interval: Option<u64>,
    },

    /// Copy finished registrations back and fix their parameter paths
    Sync,

    /// Show submitted batches
    Status,

    /// Generate an example configuration file
    Config {
        /// Output format (yaml, toml)
        #[arg(short, long, default_value = "yaml")]
        format: String,

        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        logging.level.parse().unwrap_or(Level::INFO)
    };
    let builder = FmtSubscriber::builder().with_max_level(level);
    match (logging.format.as_str(), logging.timestamps) {
        ("compact", true) => tracing::subscriber::set_global_default(builder.compact().finish())?,
        ("compact", false) => {
            tracing::subscriber::set_global_default(builder.compact().without_time().finish())?
        }
        (_, true) => tracing::subscriber::set_global_default(builder.finish())?,
        (_, false) => tracing::subscriber::set_global_default(builder.without_time().finish())?,
    }
    Ok(())
}

fn load_previous(path: Option<&Path>) -> Result<Vec<RegistrationProblem>> {
    match path {
        Some(path) => Ok(EdgeList::load(path)?.problems()),
        None => Ok(Vec::new()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Difficulty { frames, output } => {
            override_graph(&mut config.graph, frames, None);

            let Some(count) = config.graph.frame_count else {
                anyhow::bail!("Either --frames or graph.frame_count must be provided");
            };
            let matrix = build_difficulty(count, &config.graph)?;
            matrix.write(&output)?;
            println!("Difficulty matrix for {} frames written to: {}", count, output.display());
        }

        Commands::Plan {
            adjacency,
            output,
            previous,
        } => {
            let graph = load_graph(&adjacency)?;
            let previous = load_previous(previous.as_deref())?;
            let plan = plan_registrations(&graph, &config.graph, &previous)?;
            plan.edges.write(&output)?;

            println!("Root frame: {}", plan.optimized.root);
            println!("Longest chain: {} frames", plan.optimized.maximum_problem_chain);
            if !plan.optimized.unreachable.is_empty() {
                warn!(
                    "{} frames are unreachable from the root: {:?}",
                    plan.optimized.unreachable.len(),
                    plan.optimized.unreachable
                );
            }
            println!("{} registrations written to: {}", plan.edges.len(), output.display());
        }

        Commands::Vote {
            adjacency,
            k,
            output,
            previous,
        } => {
            override_graph(&mut config.graph, None, k);
            let graph = load_graph(&adjacency)?;
            let previous = load_previous(previous.as_deref())?;
            let (voting, edges) = vote_registrations(&graph, &config.graph, &previous)?;
            edges.write(&output)?;

            if !voting.disconnected.is_empty() {
                warn!(
                    "{} frames have no usable neighbor: {:?}",
                    voting.disconnected.len(),
                    voting.disconnected
                );
            }
            println!("{} registrations written to: {}", edges.len(), output.display());
        }

        Commands::Evaluate {
            edges,
            annotations,
            output,
            summary,
        } => {
            let problems = EdgeList::load(&edges)?.problems();
            let sources = EvaluatorSources {
                annotations: annotations
                    .as_deref()
                    .map(AnnotationEvaluator::load)
                    .transpose()?,
                ..Default::default()
            };
            let report = evaluate_registrations(
                &problems,
                &config.quality,
                &sources,
                config.paths.mask.as_deref(),
            )?;
            report.save(&output)?;
            match summary {
                Some(path) => {
                    report.write_summary(&path)?;
                    println!("Summary written to: {}", path.display());
                }
                None => print!("{}", report.summary()),
            }
            println!("Quality report written to: {}", output.display());
        }

        Commands::Update {
            adjacency,
            reports,
            output,
        } => {
            let graph = load_graph(&adjacency)?;
            let reports = reports
                .iter()
                .map(QualityReport::load)
                .collect::<Result<Vec<_>, _>>()?;
            let outcome = apply_quality(&graph, &reports, &config.quality)?;
            DifficultyMatrix::from_graph(&outcome.graph).write(&output)?;

            for problem in &outcome.excluded {
                println!("Excluded: {}", problem);
            }
            if !outcome.skipped.is_empty() {
                warn!("{} reported problems are not in the graph", outcome.skipped.len());
            }
            println!(
                "{} edges reweighted, updated matrix written to: {}",
                outcome.updated.len(),
                output.display()
            );
        }

        Commands::Submit { edges } => {
            let problems = EdgeList::load(&edges)?.problems();
            let mut orchestrator = open_orchestrator(&config)?;
            let summary = orchestrator.submit(&problems).await;
            orchestrator.save_ledger()?;
            let summary = summary?;

            if !summary.skipped.is_empty() {
                println!(
                    "{} registrations already submitted, skipped",
                    summary.skipped.len()
                );
            }
            for (index, job_id) in &summary.submitted {
                println!("Batch {} submitted as job {}", index, job_id);
            }
            if !summary.failed.is_empty() {
                for (index, error) in &summary.failed {
                    println!("Batch {} failed: {}", index, error);
                }
                anyhow::bail!("{} batches failed to submit", summary.failed.len());
            }
        }

        Commands::Wait {
            max_wait,
            poll_interval,
        } => {
            let mut orchestrator = open_orchestrator(&config)?;
            let max_wait = max_wait
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.cluster.max_wait());
            let poll_interval = poll_interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.cluster.poll_interval());

            let (cancel_tx, mut cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, remote jobs keep running");
                    let _ = cancel_tx.send(true);
                }
            });

            let outcome = orchestrator
                .wait(max_wait, poll_interval, &mut cancel_rx)
                .await;
            orchestrator.save_ledger()?;
            let outcome = outcome?;

            println!("Wait {}", outcome);
            if !outcome.is_completed() {
                anyhow::bail!("Jobs did not finish: {}", outcome);
            }
        }

        Commands::Sync => {
            let mut orchestrator = open_orchestrator(&config)?;
            let report = orchestrator.sync().await;
            orchestrator.save_ledger()?;
            let report = report?;

            println!("{} parameter files rewritten", report.rewritten);
            if !report.errors.is_empty() {
                for error in &report.errors {
                    match error.resolution {
                        Some(resolution) => {
                            println!("{} {}: {}", error.problem, resolution, error.message)
                        }
                        None => println!("{}: {}", error.problem, error.message),
                    }
                }
                anyhow::bail!("{} outputs could not be rewritten", report.errors.len());
            }
        }

        Commands::Status => {
            let orchestrator = open_orchestrator(&config)?;
            print!("{}", format_batches(orchestrator.batches()));
        }

        Commands::Config { format, output } => {
            let content = match format.to_lowercase().as_str() {
                "yaml" | "yml" => Config::example_yaml(),
                "toml" => Config::example_toml(),
                _ => anyhow::bail!("Unsupported format: {}. Use 'yaml' or 'toml'", format),
            };

            if let Some(path) = output {
                std::fs::write(&path, &content)?;
                println!("Configuration written to: {}", path.display());
            } else {
                println!("{}", content);
            }
        }
    }

    Ok(())
}
