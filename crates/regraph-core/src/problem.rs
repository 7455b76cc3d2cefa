//! Registration problems and their lifecycle status.

use crate::graph::FrameId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Register frame `moving` onto frame `fixed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegistrationProblem {
    pub fixed: FrameId,
    pub moving: FrameId,
}

impl RegistrationProblem {
    pub fn new(fixed: FrameId, moving: FrameId) -> Self {
        Self { fixed, moving }
    }

    /// Same pair regardless of orientation.
    pub fn same_pair(&self, other: &Self) -> bool {
        (self.fixed, self.moving) == (other.fixed, other.moving)
            || (self.fixed, self.moving) == (other.moving, other.fixed)
    }

    /// Directory name used for this problem's registration output.
    pub fn dir_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RegistrationProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}to{}", self.fixed, self.moving)
    }
}

impl FromStr for RegistrationProblem {
    type Err = String;

    /// Parses the `<fixed>to<moving>` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (fixed, moving) = s
            .split_once("to")
            .ok_or_else(|| format!("expected '<fixed>to<moving>', got '{}'", s))?;
        let fixed = fixed
            .trim()
            .parse()
            .map_err(|_| format!("invalid fixed frame in '{}'", s))?;
        let moving = moving
            .trim()
            .parse()
            .map_err(|_| format!("invalid moving frame in '{}'", s))?;
        Ok(Self { fixed, moving })
    }
}

/// One registration output: the `resolution`-th level of the
/// `parameter_file`-th parameter file. Both are 0-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub parameter_file: usize,
    pub resolution: usize,
}

impl Resolution {
    pub fn new(parameter_file: usize, resolution: usize) -> Self {
        Self {
            parameter_file,
            resolution,
        }
    }

    /// Name of the transform file the registration tool writes for this level.
    pub fn transform_file_name(&self) -> String {
        format!(
            "TransformParameters.{}.R{}.txt",
            self.parameter_file, self.resolution
        )
    }

    /// Every level of every parameter file, given the level count of each.
    pub fn all(levels_per_file: &[usize]) -> Vec<Self> {
        levels_per_file
            .iter()
            .enumerate()
            .flat_map(|(p, &n)| (0..n).map(move |r| Self::new(p, r)))
            .collect()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.parameter_file, self.resolution)
    }
}

/// Where a registration problem is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ProblemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for ProblemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
