//! Transport to the cluster login node.

use crate::ClusterError;
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Runs commands on, and copies directories to and from, the cluster.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run a shell command remotely and return its stdout.
    async fn run(&self, command: &str) -> Result<String, ClusterError>;

    /// Copy the contents of local directory `local` into remote directory `remote`.
    async fn push(&self, local: &Path, remote: &Path) -> Result<(), ClusterError>;

    /// Copy the contents of remote directory `remote` into local directory `local`.
    async fn pull(&self, remote: &Path, local: &Path) -> Result<(), ClusterError>;
}

/// `ssh` for commands, `rsync` over ssh for copies.
#[derive(Debug, Clone)]
pub struct SshShell {
    host: String,
    user: String,
    ssh_binary: String,
    rsync_binary: String,
}

impl SshShell {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            ssh_binary: "ssh".to_string(),
            rsync_binary: "rsync".to_string(),
        }
    }

    pub fn with_binaries(mut self, ssh: impl Into<String>, rsync: impl Into<String>) -> Self {
        self.ssh_binary = ssh.into();
        self.rsync_binary = rsync.into();
        self
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    async fn exec(&self, cmd: &mut Command, what: &str) -> Result<String, ClusterError> {
        let output = cmd
            .output()
            .await
            .map_err(|e| ClusterError::Remote(format!("failed to start {}: {}", what, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClusterError::Remote(format!(
                "{} exited with {:?}: {}",
                what,
                output.status.code(),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Trailing slash so rsync copies directory contents, not the directory.
fn dir_arg(path: &Path) -> String {
    let s = path.display().to_string();
    if s.ends_with('/') {
        s
    } else {
        format!("{}/", s)
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn run(&self, command: &str) -> Result<String, ClusterError> {
        debug!("ssh {}: {}", self.destination(), command);
        let mut cmd = Command::new(&self.ssh_binary);
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg(self.destination())
            .arg(command);
        self.exec(&mut cmd, "ssh").await
    }

    async fn push(&self, local: &Path, remote: &Path) -> Result<(), ClusterError> {
        self.run(&format!("mkdir -p {}", remote.display())).await?;
        debug!("rsync {} -> {}:{}", local.display(), self.host, remote.display());
        let mut cmd = Command::new(&self.rsync_binary);
        cmd.arg("-az")
            .arg(dir_arg(local))
            .arg(format!("{}:{}", self.destination(), dir_arg(remote)));
        self.exec(&mut cmd, "rsync").await.map(|_| ())
    }

    async fn pull(&self, remote: &Path, local: &Path) -> Result<(), ClusterError> {
        tokio::fs::create_dir_all(local)
            .await
            .map_err(|e| ClusterError::Io(local.to_path_buf(), e.to_string()))?;
        debug!("rsync {}:{} -> {}", self.host, remote.display(), local.display());
        let mut cmd = Command::new(&self.rsync_binary);
        cmd.arg("-az")
            .arg(format!("{}:{}", self.destination(), dir_arg(remote)))
            .arg(dir_arg(local));
        self.exec(&mut cmd, "rsync").await.map(|_| ())
    }
}
