//! Orchestrator lifecycle tests against a scripted in-memory shell.
//!
//! Waiting and retry tests run on a paused tokio clock, so sleeps complete
//! instantly while elapsed time is still tracked exactly.

use async_trait::async_trait;
use regraph_cluster::{
    BatchState, ClusterConfig, ClusterError, Orchestrator, RemoteShell, WaitOutcome,
};
use regraph_core::{ProblemStatus, RegistrationProblem};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

// =============================================================================
// Helpers
// =============================================================================

#[derive(Default)]
struct Script {
    queue: VecDeque<Result<String, String>>,
    queue_fallback: String,
    submissions: VecDeque<Result<String, String>>,
    push_failures: usize,
    commands: Vec<String>,
    pushed: Vec<(PathBuf, PathBuf, String)>,
    pulls: usize,
    remote_files: Vec<(String, String)>,
}

/// Answers `squeue` and `sbatch` from queued responses and records everything.
#[derive(Clone, Default)]
struct ScriptedShell {
    script: Arc<Mutex<Script>>,
}

impl ScriptedShell {
    fn queue_counts(self, counts: &[usize]) -> Self {
        {
            let mut s = self.script.lock().unwrap();
            for &n in counts {
                s.queue.push_back(Ok("job\n".repeat(n)));
            }
        }
        self
    }

    fn queue_failures(self, n: usize) -> Self {
        {
            let mut s = self.script.lock().unwrap();
            for _ in 0..n {
                s.queue
                    .push_back(Err("ssh: connect to host: Connection timed out".into()));
            }
        }
        self
    }

    fn queue_fallback(self, count: usize) -> Self {
        self.script.lock().unwrap().queue_fallback = "job\n".repeat(count);
        self
    }

    fn submissions(self, outputs: &[Result<&str, &str>]) -> Self {
        {
            let mut s = self.script.lock().unwrap();
            for o in outputs {
                s.submissions
                    .push_back(o.map(str::to_string).map_err(str::to_string));
            }
        }
        self
    }

    fn push_failures(self, n: usize) -> Self {
        self.script.lock().unwrap().push_failures = n;
        self
    }

    fn remote_file(self, relative: &str, contents: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .remote_files
            .push((relative.into(), contents.into()));
        self
    }

    fn queries(&self) -> usize {
        self.script
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|c| c.starts_with("squeue"))
            .count()
    }

    fn sbatch_calls(&self) -> usize {
        self.script
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|c| c.starts_with("sbatch"))
            .count()
    }
}

#[async_trait]
impl RemoteShell for ScriptedShell {
    async fn run(&self, command: &str) -> Result<String, ClusterError> {
        let mut s = self.script.lock().unwrap();
        s.commands.push(command.to_string());
        let response = if command.starts_with("squeue") {
            let fallback = s.queue_fallback.clone();
            s.queue.pop_front().unwrap_or(Ok(fallback))
        } else if command.starts_with("sbatch") {
            let n = s.commands.iter().filter(|c| c.starts_with("sbatch")).count();
            s.submissions
                .pop_front()
                .unwrap_or_else(|| Ok(format!("Submitted batch job {}", 100 + n)))
        } else {
            Ok(String::new())
        };
        response.map_err(ClusterError::Remote)
    }

    async fn push(&self, local: &Path, remote: &Path) -> Result<(), ClusterError> {
        {
            let mut s = self.script.lock().unwrap();
            if s.push_failures > 0 {
                s.push_failures -= 1;
                return Err(ClusterError::Remote(
                    "rsync: connection unexpectedly closed".into(),
                ));
            }
        }
        let commands = std::fs::read_to_string(local.join("commands.txt"))
            .map_err(|e| ClusterError::Io(local.to_path_buf(), e.to_string()))?;
        self.script.lock().unwrap().pushed.push((
            local.to_path_buf(),
            remote.to_path_buf(),
            commands,
        ));
        Ok(())
    }

    async fn pull(&self, _remote: &Path, local: &Path) -> Result<(), ClusterError> {
        let mut s = self.script.lock().unwrap();
        s.pulls += 1;
        for (relative, contents) in &s.remote_files {
            let path = local.join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
        Ok(())
    }
}

fn config() -> ClusterConfig {
    ClusterConfig {
        host: "login.cluster".into(),
        user: "alice".into(),
        remote_root: PathBuf::from("/scratch/run"),
        image_dir: PathBuf::from("/scratch/images"),
        parameter_files: vec![PathBuf::from("/scratch/params/rigid.txt")],
        array_size: 2,
        min_poll_interval_secs: 1,
        ..Default::default()
    }
}

fn problems(n: usize) -> Vec<RegistrationProblem> {
    (0..n).map(|i| RegistrationProblem::new(i, i + 1)).collect()
}

fn orchestrator(shell: &ScriptedShell, local: &Path) -> Orchestrator<ScriptedShell> {
    Orchestrator::new(shell.clone(), config(), local.to_path_buf()).unwrap()
}

/// Orchestrator with the default ten second poll rate limit.
fn rate_limited(shell: &ScriptedShell, local: &Path) -> Orchestrator<ScriptedShell> {
    let config = ClusterConfig {
        min_poll_interval_secs: ClusterConfig::default().min_poll_interval_secs,
        ..config()
    };
    Orchestrator::new(shell.clone(), config, local.to_path_buf()).unwrap()
}

fn no_cancel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

// =============================================================================
// Submission
// =============================================================================

#[tokio::test]
async fn submit_splits_into_array_sized_batches() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default();
    let mut orch = orchestrator(&shell, tmp.path());

    let summary = orch.submit(&problems(5)).await.unwrap();

    assert_eq!(
        summary.submitted,
        vec![(0, "101".into()), (1, "102".into()), (2, "103".into())]
    );
    assert!(summary.failed.is_empty());
    let sizes: Vec<usize> = orch.batches().iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert!(orch
        .batches()
        .iter()
        .all(|b| b.state == BatchState::Submitted && b.submitted_at.is_some()));

    let s = shell.script.lock().unwrap();
    assert_eq!(s.pushed[1].1, PathBuf::from("/scratch/run/jobs/batch_1"));
    assert_eq!(s.pushed[1].2.lines().count(), 2);
    assert!(s.pushed[2].2.contains("-out /scratch/run/reg/4to5"));
    assert!(s
        .commands
        .contains(&"sbatch /scratch/run/jobs/batch_2/submit.sh".to_string()));
    assert!(tmp.path().join("jobs/batch_0/submit.sh").exists());
}

#[tokio::test(start_paused = true)]
async fn failed_submission_only_affects_its_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default().submissions(&[
        Ok("Submitted batch job 7"),
        Ok("sbatch: error: Batch job submission failed"),
        Err("ssh: Connection reset"),
        Err("ssh: Connection reset"),
        Err("ssh: Connection reset"),
        Err("ssh: Connection reset"),
        Err("ssh: Connection reset"),
    ]);
    let mut orch = orchestrator(&shell, tmp.path());

    let summary = orch.submit(&problems(6)).await.unwrap();

    assert_eq!(summary.submitted, vec![(0, "7".into())]);
    assert_eq!(summary.failed.len(), 2);
    let states: Vec<BatchState> = orch.batches().iter().map(|b| b.state).collect();
    assert_eq!(
        states,
        vec![BatchState::Submitted, BatchState::Failed, BatchState::Failed]
    );
    // a scheduler rejection is final, a dropped connection is retried
    assert_eq!(shell.sbatch_calls(), 7);
    assert!(orch.batches()[1].error.as_deref().unwrap().contains("sbatch: error"));
    let stalled = orch.batches()[2].error.as_deref().unwrap();
    assert!(stalled.contains("after 5 attempts"));
    assert!(stalled.contains("Connection reset"));
    assert_eq!(
        orch.problem_status(&RegistrationProblem::new(0, 1)),
        Some(ProblemStatus::Pending)
    );
    assert_eq!(
        orch.problem_status(&RegistrationProblem::new(2, 3)),
        Some(ProblemStatus::Failed)
    );
    assert_eq!(orch.problem_status(&RegistrationProblem::new(9, 10)), None);
}

#[tokio::test]
async fn resubmission_skips_problems_already_submitted() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default();
    let mut orch = orchestrator(&shell, tmp.path());
    orch.submit(&problems(3)).await.unwrap();

    let summary = orch
        .submit(&[RegistrationProblem::new(0, 1), RegistrationProblem::new(3, 4)])
        .await
        .unwrap();

    assert_eq!(summary.skipped, vec![RegistrationProblem::new(0, 1)]);
    assert_eq!(summary.submitted, vec![(2, "103".into())]);
    assert_eq!(shell.sbatch_calls(), 3);
    assert_eq!(orch.batches().len(), 3);
    assert_eq!(orch.batches()[2].problems, vec![RegistrationProblem::new(3, 4)]);
    let holding = orch
        .batches()
        .iter()
        .filter(|b| b.contains(&RegistrationProblem::new(0, 1)))
        .count();
    assert_eq!(holding, 1);

    let again = orch.submit(&problems(3)).await.unwrap();
    assert!(again.submitted.is_empty());
    assert_eq!(again.skipped, problems(3));
    assert_eq!(shell.sbatch_calls(), 3);
}

#[tokio::test]
async fn failed_batches_can_be_resubmitted() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default()
        .submissions(&[Ok("sbatch: error: invalid partition specified")]);
    let mut orch = orchestrator(&shell, tmp.path());
    let first = orch.submit(&problems(1)).await.unwrap();
    assert_eq!(first.failed.len(), 1);

    let retry = orch.submit(&problems(1)).await.unwrap();

    assert!(retry.skipped.is_empty());
    assert_eq!(retry.submitted, vec![(1, "102".into())]);
    let states: Vec<BatchState> = orch.batches().iter().map(|b| b.state).collect();
    assert_eq!(states, vec![BatchState::Failed, BatchState::Submitted]);
    assert_eq!(
        orch.problem_status(&RegistrationProblem::new(0, 1)),
        Some(ProblemStatus::Pending)
    );
}

#[tokio::test(start_paused = true)]
async fn transient_submission_errors_are_retried() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default()
        .submissions(&[Err("ssh: Connection reset"), Ok("Submitted batch job 9")]);
    let mut orch = orchestrator(&shell, tmp.path());

    let start = tokio::time::Instant::now();
    let summary = orch.submit(&problems(1)).await.unwrap();

    assert_eq!(summary.submitted, vec![(0, "9".into())]);
    assert!(summary.failed.is_empty());
    assert_eq!(shell.sbatch_calls(), 2);
    assert_eq!(orch.batches()[0].state, BatchState::Submitted);
    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn transient_push_errors_are_retried() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default().push_failures(2);
    let mut orch = orchestrator(&shell, tmp.path());

    let start = tokio::time::Instant::now();
    let summary = orch.submit(&problems(1)).await.unwrap();

    assert_eq!(summary.submitted, vec![(0, "101".into())]);
    assert_eq!(shell.script.lock().unwrap().pushed.len(), 1);
    // backoff of 1s then 2s
    assert!(start.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn exhausted_push_retries_fail_the_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default().push_failures(10);
    let mut orch = orchestrator(&shell, tmp.path());

    let summary = orch.submit(&problems(1)).await.unwrap();

    assert!(summary.submitted.is_empty());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(orch.batches()[0].state, BatchState::Failed);
    assert!(summary.failed[0].1.contains("after 5 attempts"));
    assert_eq!(shell.sbatch_calls(), 0);
}

// =============================================================================
// Polling and waiting
// =============================================================================

#[tokio::test(start_paused = true)]
async fn wait_completes_after_queue_drains() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default().queue_counts(&[4, 2, 0]);
    let mut orch = orchestrator(&shell, tmp.path());
    orch.submit(&problems(4)).await.unwrap();
    let (_tx, mut rx) = no_cancel();

    let outcome = orch
        .wait(Duration::from_secs(60), Duration::from_secs(1), &mut rx)
        .await
        .unwrap();

    assert_eq!(outcome, WaitOutcome::Completed { intervals: 2 });
    assert_eq!(shell.queries(), 3);
    assert!(orch
        .batches()
        .iter()
        .all(|b| b.state == BatchState::Succeeded));
    assert_eq!(
        orch.problem_status(&RegistrationProblem::new(3, 4)),
        Some(ProblemStatus::Succeeded)
    );
}

#[tokio::test(start_paused = true)]
async fn wait_queries_every_interval_despite_rate_limit() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default().queue_counts(&[4, 2, 0]);
    let mut orch = rate_limited(&shell, tmp.path());
    orch.submit(&problems(4)).await.unwrap();
    let (_tx, mut rx) = no_cancel();

    let outcome = orch
        .wait(Duration::from_secs(60), Duration::from_secs(1), &mut rx)
        .await
        .unwrap();

    assert_eq!(outcome, WaitOutcome::Completed { intervals: 2 });
    assert_eq!(shell.queries(), 3);
}

#[tokio::test(start_paused = true)]
async fn wait_sees_drained_queue_before_timing_out() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default().queue_counts(&[4, 0]);
    let mut orch = rate_limited(&shell, tmp.path());
    orch.submit(&problems(2)).await.unwrap();
    let (_tx, mut rx) = no_cancel();

    let outcome = orch
        .wait(Duration::from_secs(5), Duration::from_secs(1), &mut rx)
        .await
        .unwrap();

    assert_eq!(outcome, WaitOutcome::Completed { intervals: 1 });
    assert_eq!(shell.queries(), 2);
    assert!(orch
        .batches()
        .iter()
        .all(|b| b.state == BatchState::Succeeded));
}

#[tokio::test(start_paused = true)]
async fn wait_times_out_with_partial_completion() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default().queue_fallback(2);
    let mut orch = orchestrator(&shell, tmp.path());
    orch.submit(&problems(2)).await.unwrap();
    let (_tx, mut rx) = no_cancel();

    let outcome = orch
        .wait(Duration::from_secs(3), Duration::from_secs(1), &mut rx)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        WaitOutcome::TimedOut {
            remaining: 2,
            intervals: 3
        }
    );
    assert!(!outcome.is_completed());
    assert_eq!(orch.batches()[0].state, BatchState::Running);
}

#[tokio::test(start_paused = true)]
async fn wait_stops_on_cancel_without_touching_jobs() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default().queue_fallback(3);
    let mut orch = orchestrator(&shell, tmp.path());
    orch.submit(&problems(2)).await.unwrap();
    let (tx, mut rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let _ = tx.send(true);
    });

    let outcome = orch
        .wait(Duration::from_secs(600), Duration::from_secs(1), &mut rx)
        .await
        .unwrap();

    assert_eq!(outcome, WaitOutcome::Cancelled { remaining: 3 });
    assert_eq!(shell.queries(), 3);
    let s = shell.script.lock().unwrap();
    assert!(!s.commands.iter().any(|c| c.starts_with("scancel")));
}

#[tokio::test(start_paused = true)]
async fn dropped_cancel_sender_does_not_stop_waiting() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default().queue_counts(&[1, 0]);
    let mut orch = orchestrator(&shell, tmp.path());
    let (tx, mut rx) = watch::channel(false);
    drop(tx);

    let outcome = orch
        .wait(Duration::from_secs(60), Duration::from_secs(1), &mut rx)
        .await
        .unwrap();
    assert_eq!(outcome, WaitOutcome::Completed { intervals: 1 });
}

#[tokio::test(start_paused = true)]
async fn poll_is_rate_limited() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default().queue_counts(&[5, 1]);
    let mut orch = Orchestrator::new(
        shell.clone(),
        ClusterConfig {
            min_poll_interval_secs: 10,
            ..config()
        },
        tmp.path().to_path_buf(),
    )
    .unwrap();

    assert_eq!(orch.poll().await.unwrap(), 5);
    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(orch.poll().await.unwrap(), 5);
    assert_eq!(shell.queries(), 1);

    tokio::time::advance(Duration::from_secs(7)).await;
    assert_eq!(orch.poll().await.unwrap(), 1);
    assert_eq!(shell.queries(), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_poll_errors_are_retried() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default().queue_failures(2).queue_counts(&[3]);
    let mut orch = orchestrator(&shell, tmp.path());

    let start = tokio::time::Instant::now();
    assert_eq!(orch.poll().await.unwrap(), 3);
    assert_eq!(shell.queries(), 3);
    // backoff of 1s then 2s
    assert!(start.elapsed() >= Duration::from_secs(3));
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_stall() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default().queue_failures(10);
    let mut orch = orchestrator(&shell, tmp.path());

    match orch.poll().await {
        Err(ClusterError::Stalled {
            attempts,
            last_error,
        }) => {
            assert_eq!(attempts, 5);
            assert!(last_error.contains("Connection timed out"));
        }
        other => panic!("expected stall, got {:?}", other),
    }
    assert_eq!(shell.queries(), 5);
}

// =============================================================================
// Sync and ledger
// =============================================================================

#[tokio::test(start_paused = true)]
async fn sync_pulls_and_rewrites_parameter_files() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default().queue_counts(&[0]).remote_file(
        "0to1/TransformParameters.0.R0.txt",
        "(InitialTransformParametersFileName \"/scratch/run/reg/0to1/init.txt\")\n",
    );
    let mut orch = orchestrator(&shell, tmp.path());

    assert_eq!(orch.sync().await.unwrap().rewritten, 0);
    assert_eq!(shell.script.lock().unwrap().pulls, 0);

    orch.submit(&problems(1)).await.unwrap();
    let (_tx, mut rx) = no_cancel();
    orch.wait(Duration::from_secs(10), Duration::from_secs(1), &mut rx)
        .await
        .unwrap();

    let report = orch.sync().await.unwrap();
    assert_eq!(report.rewritten, 1);
    assert!(report.errors.is_empty());
    assert_eq!(orch.batches()[0].state, BatchState::Synced);

    let local = tmp.path().join("reg/0to1/TransformParameters.0.R0.txt");
    let expected = format!("{}/reg/0to1/init.txt", tmp.path().display());
    assert!(std::fs::read_to_string(&local).unwrap().contains(&expected));

    // repeatable
    let again = orch.sync().await.unwrap();
    assert_eq!(again.rewritten, 1);
    assert_eq!(shell.script.lock().unwrap().pulls, 2);
    assert_eq!(
        orch.problem_status(&RegistrationProblem::new(0, 1)),
        Some(ProblemStatus::Succeeded)
    );
}

#[tokio::test]
async fn ledger_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = ScriptedShell::default();
    let mut orch = orchestrator(&shell, tmp.path());
    orch.submit(&problems(3)).await.unwrap();
    orch.save_ledger().unwrap();

    let mut resumed =
        Orchestrator::open(shell.clone(), config(), tmp.path().to_path_buf()).unwrap();
    assert_eq!(resumed.batches(), orch.batches());

    // the resumed ledger keeps the same problems from going out twice
    let summary = resumed.submit(&problems(3)).await.unwrap();
    assert!(summary.submitted.is_empty());
    assert_eq!(summary.skipped.len(), 3);
    assert_eq!(shell.sbatch_calls(), 2);

    let fresh = tempfile::tempdir().unwrap();
    let empty = Orchestrator::open(shell, config(), fresh.path().to_path_buf()).unwrap();
    assert!(empty.batches().is_empty());
}

#[test]
fn relative_local_root_is_made_absolute() {
    let orch = Orchestrator::new(
        ScriptedShell::default(),
        config(),
        PathBuf::from("regraph-work"),
    )
    .unwrap();
    assert!(orch.local_root().is_absolute());
    assert!(orch.local_root().ends_with("regraph-work"));
    assert!(orch.ledger_path().is_absolute());
}

#[test]
fn invalid_config_is_rejected() {
    let result = Orchestrator::new(
        ScriptedShell::default(),
        ClusterConfig::default(),
        PathBuf::from("/tmp"),
    );
    assert!(matches!(result, Err(ClusterError::Config(_))));
}
