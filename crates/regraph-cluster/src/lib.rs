//! # Regraph Cluster
//!
//! Runs registration problems as array jobs on a remote Slurm cluster.
//!
//! ## Lifecycle
//!
//! Each batch of problems moves through
//! `queued -> submitted -> running -> {succeeded, failed} -> synced`:
//!
//! - **submit**: one command line per problem and one `sbatch` script per
//!   batch are staged locally, pushed to the remote root and submitted.
//! - **poll / wait**: the scheduler only reports how many of our jobs are
//!   still running or pending; waiting ends when that count reaches zero,
//!   when `max_wait` runs out, or when the operator cancels.
//! - **sync**: registration outputs are pulled back and the transform
//!   parameter files are rewritten to point at local paths.
//!
//! Per-job failures are not visible here; they show up later when the
//! registration quality is evaluated.
//!
//! One [`Orchestrator`] must own a remote root exclusively. Nothing locks the
//! directory, so two orchestrators on the same root will clobber each other's
//! staged files.

pub mod batch;
pub mod config;
pub mod job;
pub mod orchestrator;
pub mod remote;
pub mod scheduler;
pub mod script;
pub mod sync;

pub use batch::{load_batches, plan_batches, save_batches, BatchState, JobBatch};
pub use config::{ClusterConfig, RetryConfig, SlurmOptions};
pub use job::{CommandBuilder, ImageNaming};
pub use orchestrator::{Orchestrator, SubmitSummary, WaitOutcome};
pub use remote::{RemoteShell, SshShell};
pub use scheduler::{parse_queue_count, parse_submission};
pub use script::BatchScript;
pub use sync::{rewrite_parameter_paths, RewriteError, RewriteReport};

use std::path::PathBuf;

/// Errors that can occur while running jobs on the cluster.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Remote command failed: {0}")]
    Remote(String),

    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("Cluster unreachable after {attempts} attempts: {last_error}")]
    Stalled { attempts: u32, last_error: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Failed to access {0}: {1}")]
    Io(PathBuf, String),

    #[error("Invalid cluster configuration: {0}")]
    Config(String),
}
