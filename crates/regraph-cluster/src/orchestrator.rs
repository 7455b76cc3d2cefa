//! Submit, poll, wait for and sync registration batches.

use crate::batch::{load_batches, plan_batches, save_batches, BatchState, JobBatch};
use crate::config::{ClusterConfig, RetryConfig};
use crate::job::{registration_dir, CommandBuilder};
use crate::remote::RemoteShell;
use crate::scheduler::{parse_queue_count, parse_submission, queue_command, submit_command};
use crate::script::{batch_dir, BatchScript};
use crate::sync::{rewrite_parameter_paths, RewriteReport};
use crate::ClusterError;
use chrono::Utc;
use regraph_core::{ProblemStatus, RegistrationProblem};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How a [`Orchestrator::wait`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The queue drained after `intervals` sleeps.
    Completed { intervals: u32 },
    /// `max_wait` ran out with `remaining` jobs still queued.
    TimedOut { remaining: usize, intervals: u32 },
    /// The operator stopped waiting. Remote jobs keep running.
    Cancelled { remaining: usize },
}

impl WaitOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

impl std::fmt::Display for WaitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed { intervals } => {
                write!(f, "completed after {} poll intervals", intervals)
            }
            Self::TimedOut {
                remaining,
                intervals,
            } => write!(
                f,
                "timed out after {} poll intervals with {} jobs remaining",
                intervals, remaining
            ),
            Self::Cancelled { remaining } => {
                write!(f, "cancelled with {} jobs remaining", remaining)
            }
        }
    }
}

/// Result of [`Orchestrator::submit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitSummary {
    /// `(batch index, job id)` of every accepted batch
    pub submitted: Vec<(usize, String)>,
    /// `(batch index, error)` of every rejected batch
    pub failed: Vec<(usize, String)>,
    /// Problems left out because a batch that has not failed already holds them
    pub skipped: Vec<RegistrationProblem>,
}

/// Owns one remote root and the batches submitted into it.
pub struct Orchestrator<S: RemoteShell> {
    shell: S,
    config: ClusterConfig,
    commands: CommandBuilder,
    local_root: PathBuf,
    batches: Vec<JobBatch>,
    last_poll: Option<(Instant, usize)>,
}

impl<S: RemoteShell> Orchestrator<S> {
    pub const LEDGER_FILE: &'static str = "batches.json";

    /// A relative `local_root` is resolved against the current directory.
    pub fn new(shell: S, config: ClusterConfig, local_root: PathBuf) -> Result<Self, ClusterError> {
        config.validate()?;
        let local_root = if local_root.is_absolute() {
            local_root
        } else {
            std::env::current_dir()
                .map_err(|e| ClusterError::Io(local_root.clone(), e.to_string()))?
                .join(local_root)
        };
        Ok(Self {
            shell,
            commands: CommandBuilder::from_config(&config),
            config,
            local_root,
            batches: Vec::new(),
            last_poll: None,
        })
    }

    /// Like [`new`](Self::new), resuming from the batch ledger in
    /// `local_root` if one was saved.
    pub fn open(
        shell: S,
        config: ClusterConfig,
        local_root: PathBuf,
    ) -> Result<Self, ClusterError> {
        let mut orchestrator = Self::new(shell, config, local_root)?;
        let ledger = orchestrator.ledger_path();
        if ledger.exists() {
            orchestrator.batches = load_batches(&ledger)?;
            info!(
                "Resumed {} batches from {}",
                orchestrator.batches.len(),
                ledger.display()
            );
        }
        Ok(orchestrator)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.local_root.join(Self::LEDGER_FILE)
    }

    pub fn save_ledger(&self) -> Result<(), ClusterError> {
        std::fs::create_dir_all(&self.local_root)
            .map_err(|e| ClusterError::Io(self.local_root.clone(), e.to_string()))?;
        save_batches(&self.ledger_path(), &self.batches)
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn batches(&self) -> &[JobBatch] {
        &self.batches
    }

    /// Status from the most recent batch holding `problem`, `None` if it was
    /// never planned.
    pub fn problem_status(&self, problem: &RegistrationProblem) -> Option<ProblemStatus> {
        self.batches
            .iter()
            .rev()
            .find(|b| b.contains(problem))
            .map(|b| b.state.problem_status())
    }

    /// Plan `problems` into array-sized batches and submit each one.
    ///
    /// Problems already held by a batch that has not failed are skipped, so
    /// only failed work is ever resubmitted. A batch that fails to submit is
    /// marked failed and the remaining batches are still submitted.
    pub async fn submit(
        &mut self,
        problems: &[RegistrationProblem],
    ) -> Result<SubmitSummary, ClusterError> {
        let mut summary = SubmitSummary::default();
        let mut fresh = Vec::with_capacity(problems.len());
        for &problem in problems {
            let taken = self
                .batches
                .iter()
                .any(|b| b.state != BatchState::Failed && b.contains(&problem));
            if taken {
                if !summary.skipped.contains(&problem) {
                    summary.skipped.push(problem);
                }
            } else {
                fresh.push(problem);
            }
        }
        if !summary.skipped.is_empty() {
            info!(
                "Skipping {} problems already submitted",
                summary.skipped.len()
            );
        }

        let planned = plan_batches(&fresh, self.config.array_size, self.batches.len())?;
        info!(
            "Submitting {} problems in {} batches",
            planned.iter().map(JobBatch::len).sum::<usize>(),
            planned.len()
        );

        for batch in planned {
            let index = batch.index;
            self.batches.push(batch);
            match self.submit_batch(index).await {
                Ok(job_id) => {
                    info!("Batch {} submitted as job {}", index, job_id);
                    summary.submitted.push((index, job_id));
                }
                Err(e) => {
                    warn!("Batch {} failed to submit: {}", index, e);
                    let batch = &mut self.batches[index];
                    batch.error = Some(e.to_string());
                    batch.transition(BatchState::Failed)?;
                    summary.failed.push((index, e.to_string()));
                }
            }
        }
        Ok(summary)
    }

    async fn submit_batch(&mut self, index: usize) -> Result<String, ClusterError> {
        let batch = &self.batches[index];
        let script = BatchScript::new(&self.config.remote_root, batch, &self.config.slurm);
        let commands = self.commands.command_file(&batch.problems);

        let staging = batch_dir(&self.local_root, index);
        write_file(&staging, BatchScript::COMMANDS_FILE, &commands).await?;
        write_file(&staging, BatchScript::SCRIPT_FILE, &script.text).await?;

        let retry = &self.config.retry;
        let shell = &self.shell;
        with_retry(retry, "Push", || shell.push(&staging, &script.dir)).await?;
        let command = submit_command(&script.script_path);
        let output = with_retry(retry, "Submission", || shell.run(&command)).await?;
        let job_id = parse_submission(&output)?;

        let batch = &mut self.batches[index];
        batch.job_id = Some(job_id.clone());
        batch.submitted_at = Some(Utc::now());
        batch.transition(BatchState::Submitted)?;
        Ok(job_id)
    }

    /// Number of our jobs still running or pending.
    ///
    /// Calls closer together than `min_poll_interval` return the previous
    /// count without contacting the cluster.
    pub async fn poll(&mut self) -> Result<usize, ClusterError> {
        if let Some((at, count)) = self.last_poll {
            if at.elapsed() < self.config.min_poll_interval() {
                debug!("Returning cached queue count {}", count);
                return Ok(count);
            }
        }

        self.refresh().await
    }

    /// Query the queue unconditionally and record the count.
    async fn refresh(&mut self) -> Result<usize, ClusterError> {
        let count = self.query_queue().await?;
        self.last_poll = Some((Instant::now(), count));
        if count > 0 {
            for batch in self
                .batches
                .iter_mut()
                .filter(|b| b.state == BatchState::Submitted)
            {
                batch.transition(BatchState::Running)?;
            }
        }
        Ok(count)
    }

    async fn query_queue(&self) -> Result<usize, ClusterError> {
        let command = queue_command(&self.config.user);
        let shell = &self.shell;
        let output =
            with_retry(&self.config.retry, "Queue query", || shell.run(&command)).await?;
        Ok(parse_queue_count(&output))
    }

    /// Poll every `poll_interval` until the queue drains, `max_wait` has
    /// elapsed, or `cancel` becomes true.
    ///
    /// Every poll contacts the cluster; `min_poll_interval` only throttles
    /// [`poll`](Self::poll). On completion every in-flight batch is marked succeeded. Timing out
    /// and cancelling leave batch states alone.
    pub async fn wait(
        &mut self,
        max_wait: Duration,
        poll_interval: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<WaitOutcome, ClusterError> {
        let started = Instant::now();
        let mut intervals = 0u32;

        loop {
            let remaining = self.refresh().await?;
            if remaining == 0 {
                for batch in self.batches.iter_mut().filter(|b| b.state.is_in_flight()) {
                    batch.transition(BatchState::Succeeded)?;
                }
                info!("Queue drained after {} poll intervals", intervals);
                return Ok(WaitOutcome::Completed { intervals });
            }
            if started.elapsed() >= max_wait {
                warn!(
                    "Stopped waiting after {:?}: {} jobs still queued",
                    max_wait, remaining
                );
                return Ok(WaitOutcome::TimedOut {
                    remaining,
                    intervals,
                });
            }
            debug!("{} jobs running or pending", remaining);

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {
                    intervals += 1;
                }
                _ = cancelled(cancel) => {
                    info!("Wait cancelled with {} jobs remaining", remaining);
                    return Ok(WaitOutcome::Cancelled { remaining });
                }
            }
        }
    }

    /// Pull registration outputs of finished batches and point their
    /// parameter files at local paths. Safe to repeat.
    pub async fn sync(&mut self) -> Result<RewriteReport, ClusterError> {
        let ready: Vec<usize> = self
            .batches
            .iter()
            .filter(|b| matches!(b.state, BatchState::Succeeded | BatchState::Synced))
            .map(|b| b.index)
            .collect();
        if ready.is_empty() {
            info!("No finished batches to sync");
            return Ok(RewriteReport::default());
        }

        let remote_reg = registration_dir(&self.config.remote_root);
        let local_reg = registration_dir(&self.local_root);
        self.shell.pull(&remote_reg, &local_reg).await?;

        let problems: Vec<RegistrationProblem> = ready
            .iter()
            .flat_map(|&i| self.batches[i].problems.iter().copied())
            .collect();
        let report = rewrite_parameter_paths(
            &local_reg,
            &problems,
            &self.config.remote_root,
            &self.local_root,
        );

        for &i in &ready {
            if self.batches[i].state == BatchState::Succeeded {
                self.batches[i].transition(BatchState::Synced)?;
            }
        }
        info!("Synced {} problems from {} batches", problems.len(), ready.len());
        Ok(report)
    }
}

/// Run `op` until it succeeds, backing off exponentially between attempts.
///
/// Only [`ClusterError::Remote`] is retried. Once `retry.max_attempts` is
/// used up the last error is reported as [`ClusterError::Stalled`].
async fn with_retry<T, F, Fut>(
    retry: &RetryConfig,
    what: &str,
    mut op: F,
) -> Result<T, ClusterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClusterError>>,
{
    let mut backoff = retry.initial_backoff();
    let max_backoff = retry.max_backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(ClusterError::Remote(e)) if attempt >= retry.max_attempts => {
                return Err(ClusterError::Stalled {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(ClusterError::Remote(e)) => {
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    what, attempt, retry.max_attempts, e, backoff
                );
            }
            Err(e) => return Err(e),
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

/// Resolves once `rx` holds `true`. Never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn write_file(dir: &Path, name: &str, contents: &str) -> Result<(), ClusterError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ClusterError::Io(dir.to_path_buf(), e.to_string()))?;
    let path = dir.join(name);
    tokio::fs::write(&path, contents)
        .await
        .map_err(|e| ClusterError::Io(path, e.to_string()))
}
