//! Command lines for single registration problems.

use crate::config::ClusterConfig;
use regraph_core::{FrameId, RegistrationProblem};
use std::path::{Path, PathBuf};

/// File names of frame images: `<prefix>_t<NNNN>_ch<channel>.mhd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageNaming {
    pub prefix: String,
    pub channel: u32,
}

impl ImageNaming {
    pub fn new(prefix: impl Into<String>, channel: u32) -> Self {
        Self {
            prefix: prefix.into(),
            channel,
        }
    }

    pub fn file_name(&self, frame: FrameId) -> String {
        format!("{}_t{:04}_ch{}.mhd", self.prefix, frame, self.channel)
    }
}

/// Builds the registration command for each problem.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    binary: String,
    image_dir: PathBuf,
    mask_dir: Option<PathBuf>,
    parameter_files: Vec<PathBuf>,
    remote_root: PathBuf,
    naming: ImageNaming,
}

impl CommandBuilder {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            binary: config.registration_binary.clone(),
            image_dir: config.image_dir.clone(),
            mask_dir: config.mask_dir.clone(),
            parameter_files: config.parameter_files.clone(),
            remote_root: config.remote_root.clone(),
            naming: ImageNaming::new(config.image_prefix.clone(), config.channel),
        }
    }

    /// Remote directory the registration writes into.
    pub fn output_dir(&self, problem: &RegistrationProblem) -> PathBuf {
        registration_dir(&self.remote_root).join(problem.dir_name())
    }

    pub fn command(&self, problem: &RegistrationProblem) -> String {
        let mut parts = vec![
            self.binary.clone(),
            "-f".to_string(),
            self.image(&self.image_dir, problem.fixed),
            "-m".to_string(),
            self.image(&self.image_dir, problem.moving),
        ];
        if let Some(mask_dir) = &self.mask_dir {
            parts.push("-fMask".to_string());
            parts.push(self.image(mask_dir, problem.fixed));
        }
        parts.push("-out".to_string());
        parts.push(self.output_dir(problem).display().to_string());
        for p in &self.parameter_files {
            parts.push("-p".to_string());
            parts.push(p.display().to_string());
        }
        parts.join(" ")
    }

    /// One command per line, in problem order. Line `i` (1-based) is array
    /// task `i`.
    pub fn command_file(&self, problems: &[RegistrationProblem]) -> String {
        let mut out = String::new();
        for problem in problems {
            out.push_str(&format!(
                "mkdir -p {} && {}\n",
                self.output_dir(problem).display(),
                self.command(problem)
            ));
        }
        out
    }

    fn image(&self, dir: &Path, frame: FrameId) -> String {
        dir.join(self.naming.file_name(frame)).display().to_string()
    }
}

/// `<root>/reg`, where every problem gets its own `<fixed>to<moving>` directory.
pub fn registration_dir(root: &Path) -> PathBuf {
    root.join("reg")
}
