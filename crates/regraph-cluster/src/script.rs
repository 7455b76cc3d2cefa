//! Slurm `sbatch` scripts for array jobs.

use crate::batch::JobBatch;
use crate::config::SlurmOptions;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Remote layout and script text for one batch.
#[derive(Debug, Clone)]
pub struct BatchScript {
    /// Remote directory holding this batch's files
    pub dir: PathBuf,
    pub commands_path: PathBuf,
    pub script_path: PathBuf,
    pub text: String,
}

impl BatchScript {
    pub const COMMANDS_FILE: &'static str = "commands.txt";
    pub const SCRIPT_FILE: &'static str = "submit.sh";

    /// `<remote_root>/jobs/batch_<index>/{commands.txt, submit.sh}`.
    pub fn new(remote_root: &Path, batch: &JobBatch, options: &SlurmOptions) -> Self {
        let dir = batch_dir(remote_root, batch.index);
        let commands_path = dir.join(Self::COMMANDS_FILE);
        let script_path = dir.join(Self::SCRIPT_FILE);
        let text = render(&dir, &commands_path, batch, options);
        Self {
            dir,
            commands_path,
            script_path,
            text,
        }
    }
}

pub fn batch_dir(root: &Path, index: usize) -> PathBuf {
    root.join("jobs").join(format!("batch_{}", index))
}

fn render(dir: &Path, commands: &Path, batch: &JobBatch, o: &SlurmOptions) -> String {
    let mut s = String::from("#!/bin/bash\n");
    let _ = writeln!(s, "#SBATCH --job-name={}-{}", o.job_name, batch.index);
    if let Some(partition) = &o.partition {
        let _ = writeln!(s, "#SBATCH --partition={}", partition);
    }
    let _ = writeln!(s, "#SBATCH --cpus-per-task={}", o.cpus_per_task);
    let _ = writeln!(s, "#SBATCH --mem={}", o.memory);
    let _ = writeln!(s, "#SBATCH --time={}", o.time_limit);
    if let Some(mail) = &o.mail_user {
        let _ = writeln!(s, "#SBATCH --mail-type=END,FAIL");
        let _ = writeln!(s, "#SBATCH --mail-user={}", mail);
    }
    let _ = writeln!(s, "#SBATCH --array=1-{}", batch.len());
    let _ = writeln!(s, "#SBATCH --output={}/task_%a.log", dir.display());
    s.push('\n');
    let _ = writeln!(
        s,
        "CMD=$(sed -n \"${{SLURM_ARRAY_TASK_ID}}p\" {})",
        commands.display()
    );
    s.push_str("eval \"$CMD\"\n");
    s
}
