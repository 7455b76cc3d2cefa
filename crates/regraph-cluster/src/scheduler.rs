//! Slurm command lines and output parsing.

use crate::ClusterError;
use std::path::Path;

pub fn submit_command(script: &Path) -> String {
    format!("sbatch {}", script.display())
}

/// Lists the user's running and pending array tasks, one per line.
pub fn queue_command(user: &str) -> String {
    format!("squeue -h -r -u {} -t running,pending", user)
}

/// Extract the job id from `sbatch` output (`Submitted batch job <id>`).
pub fn parse_submission(output: &str) -> Result<String, ClusterError> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Submitted batch job "))
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .ok_or_else(|| {
            ClusterError::Submission(format!(
                "unexpected sbatch output: '{}'",
                output.trim()
            ))
        })
}

/// Number of running and pending jobs in `squeue -h -r` output.
pub fn parse_queue_count(output: &str) -> usize {
    output.lines().filter(|l| !l.trim().is_empty()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submission() {
        assert_eq!(parse_submission("Submitted batch job 4242\n").unwrap(), "4242");
        assert_eq!(
            parse_submission("warning: low quota\nSubmitted batch job 17").unwrap(),
            "17"
        );
        assert!(matches!(
            parse_submission("sbatch: error: invalid partition"),
            Err(ClusterError::Submission(_))
        ));
        assert!(parse_submission("Submitted batch job ").is_err());
        assert!(parse_submission("Submitted batch job abc").is_err());
    }

    #[test]
    fn test_parse_queue_count() {
        assert_eq!(parse_queue_count(""), 0);
        assert_eq!(parse_queue_count("\n  \n"), 0);
        let out = "  101_1 short regraph alice R 0:10 1 n01\n\
                   \x20 101_2 short regraph alice PD 0:00 1 (Resources)\n";
        assert_eq!(parse_queue_count(out), 2);
    }

    #[test]
    fn test_commands() {
        assert_eq!(
            submit_command(Path::new("/r/jobs/batch_0/submit.sh")),
            "sbatch /r/jobs/batch_0/submit.sh"
        );
        assert_eq!(queue_command("alice"), "squeue -h -r -u alice -t running,pending");
    }
}
