//! Cluster connection, scheduler and polling settings.

use crate::ClusterError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Cluster configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Login node host name
    pub host: String,

    /// Account that owns the jobs (also used for queue queries)
    pub user: String,

    /// Remote working directory; one orchestrator per directory
    pub remote_root: PathBuf,

    /// Remote directory holding the frame images
    pub image_dir: PathBuf,

    /// Optional remote directory holding fixed-image masks
    pub mask_dir: Option<PathBuf>,

    /// Registration binary on the cluster
    pub registration_binary: String,

    /// Remote parameter files, passed in order with `-p`
    pub parameter_files: Vec<PathBuf>,

    /// Image naming scheme
    pub image_prefix: String,
    pub channel: u32,

    /// Maximum number of tasks per array job
    pub array_size: usize,

    /// Slurm resources for each array task
    pub slurm: SlurmOptions,

    /// Queue polls closer together than this return the cached count
    pub min_poll_interval_secs: u64,

    /// Sleep between polls while waiting
    pub poll_interval_secs: u64,

    /// Give up waiting after this long (partial completion)
    pub max_wait_secs: u64,

    /// Retry policy for queue polls, pushes and submissions
    pub retry: RetryConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: String::new(),
            remote_root: PathBuf::new(),
            image_dir: PathBuf::new(),
            mask_dir: None,
            registration_binary: "elastix".to_string(),
            parameter_files: Vec::new(),
            image_prefix: "frame".to_string(),
            channel: 0,
            array_size: 1000,
            slurm: SlurmOptions::default(),
            min_poll_interval_secs: 10,
            poll_interval_secs: 60,
            max_wait_secs: 24 * 60 * 60,
            retry: RetryConfig::default(),
        }
    }
}

impl ClusterConfig {
    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_secs(self.min_poll_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    /// Check the settings needed to submit and poll.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.host.trim().is_empty() {
            return Err(ClusterError::Config("host is not set".into()));
        }
        if self.user.trim().is_empty() {
            return Err(ClusterError::Config("user is not set".into()));
        }
        if !self.remote_root.is_absolute() {
            return Err(ClusterError::Config(format!(
                "remote_root must be an absolute path, got '{}'",
                self.remote_root.display()
            )));
        }
        if !self.image_dir.is_absolute() {
            return Err(ClusterError::Config(format!(
                "image_dir must be an absolute path, got '{}'",
                self.image_dir.display()
            )));
        }
        if self.array_size == 0 {
            return Err(ClusterError::Config("array_size must be at least 1".into()));
        }
        if self.parameter_files.is_empty() {
            return Err(ClusterError::Config(
                "at least one parameter file is required".into(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(ClusterError::Config(
                "poll_interval_secs must be at least 1".into(),
            ));
        }
        self.retry.validate()
    }
}

/// `#SBATCH` options for each array task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlurmOptions {
    /// Job name prefix; the batch index is appended
    pub job_name: String,

    pub partition: Option<String>,

    pub cpus_per_task: u32,

    /// Memory per task, in Slurm syntax (e.g. `8G`)
    pub memory: String,

    /// Wall time per task, in Slurm syntax (e.g. `02:00:00`)
    pub time_limit: String,

    /// Notify this address when an array finishes or fails
    pub mail_user: Option<String>,
}

impl Default for SlurmOptions {
    fn default() -> Self {
        Self {
            job_name: "regraph".to_string(),
            partition: None,
            cpus_per_task: 4,
            memory: "8G".to_string(),
            time_limit: "02:00:00".to_string(),
            mail_user: None,
        }
    }
}

/// Exponential backoff for transient remote errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts before the orchestrator reports a stall
    pub max_attempts: u32,

    pub initial_backoff_ms: u64,

    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.max_attempts == 0 {
            return Err(ClusterError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ClusterError::Config(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ClusterConfig {
        ClusterConfig {
            host: "login.cluster".into(),
            user: "alice".into(),
            remote_root: PathBuf::from("/scratch/alice/run"),
            image_dir: PathBuf::from("/scratch/alice/images"),
            parameter_files: vec![PathBuf::from("params/affine.txt")],
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let c = ClusterConfig::default();
        assert_eq!(c.array_size, 1000);
        assert_eq!(c.poll_interval(), Duration::from_secs(60));
        assert_eq!(c.retry.initial_backoff(), Duration::from_secs(1));
        assert_eq!(c.retry.max_backoff(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());
        assert!(ClusterConfig::default().validate().is_err());

        let mut c = valid();
        c.array_size = 0;
        assert!(matches!(c.validate(), Err(ClusterError::Config(_))));

        let mut c = valid();
        c.retry.max_attempts = 0;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.remote_root = PathBuf::from("run");
        assert!(c.validate().is_err());

        let mut c = valid();
        c.parameter_files.clear();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let c: ClusterConfig =
            serde_json::from_str(r#"{"host": "h", "slurm": {"partition": "gpu"}}"#).unwrap();
        assert_eq!(c.host, "h");
        assert_eq!(c.slurm.partition.as_deref(), Some("gpu"));
        assert_eq!(c.slurm.cpus_per_task, 4);
        assert_eq!(c.retry.max_attempts, 5);
    }
}
