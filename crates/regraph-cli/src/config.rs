//! Configuration file support for regraph
//!
//! Supports both YAML and TOML configuration files.
//!
//! # Example YAML configuration:
//! ```yaml
//! # regraph configuration file
//!
//! graph:
//!   frame_count: 200
//!   max_gap: 20
//!   voting_k: 3
//!
//! quality:
//!   evaluators: [manual_annotation]
//!   selection_metric: manual_annotation
//!   ceiling: 0.5
//!
//! cluster:
//!   host: login.cluster.example.org
//!   user: alice
//!   remote_root: /scratch/alice/regraph
//!   image_dir: /scratch/alice/images
//!   parameter_files: [/scratch/alice/params/rigid.txt]
//!
//! paths:
//!   work_dir: ./regraph-work
//!
//! logging:
//!   level: info
//! ```

use regraph_cluster::{ClusterConfig, SlurmOptions};
use regraph_core::{
    CeilingCost, EvaluatorKind, FrameId, PowerTransform, ThresholdCost,
    DEFAULT_DIFFICULTY_IMPORTANCE, DEFAULT_QUALITY_THRESHOLD,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Difficulty graph configuration
    pub graph: GraphConfig,

    /// Quality evaluation and feedback configuration
    pub quality: QualityConfig,

    /// Remote cluster configuration
    pub cluster: ClusterConfig,

    /// Local file locations
    pub paths: PathsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Difficulty graph configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Number of frames; frames are numbered `0..frame_count`
    pub frame_count: Option<usize>,

    /// Difficulty per frame of time gap
    pub gap_scale: f64,

    /// Frame pairs further apart than this get no edge
    pub max_gap: Option<usize>,

    /// Exponent offset of the difficulty transform
    pub difficulty_importance: f64,

    /// Neighbors per frame in the voting subgraph
    pub voting_k: usize,

    /// Dataset alignment: register frames above this onto frames at or below it
    pub max_fixed_t: Option<FrameId>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            frame_count: None,
            gap_scale: 1.0,
            max_gap: None,
            difficulty_importance: DEFAULT_DIFFICULTY_IMPORTANCE,
            voting_k: 3,
            max_fixed_t: None,
        }
    }
}

/// Quality evaluation and feedback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Evaluators run on every registration
    pub evaluators: Vec<EvaluatorKind>,

    /// Metric that picks the best resolution and drives edge costs
    pub selection_metric: EvaluatorKind,

    /// Similarity scores at or below this exclude the edge
    pub threshold: f64,

    /// Distance-like scores above this exclude the edge (unbounded if unset)
    pub ceiling: Option<f64>,

    /// Multiplier applied to every quality cost
    pub cost_scale: f64,

    /// Resolution levels of each parameter file, in order
    pub levels_per_parameter_file: Vec<usize>,
}

/// Operator annotations need no image data, so they are the default; flagged
/// registrations score 1.0 and land above the ceiling.
impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            evaluators: vec![EvaluatorKind::ManualAnnotation],
            selection_metric: EvaluatorKind::ManualAnnotation,
            threshold: DEFAULT_QUALITY_THRESHOLD,
            ceiling: Some(0.5),
            cost_scale: 1.0,
            levels_per_parameter_file: vec![4],
        }
    }
}

/// Local file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Local mirror of the remote root; holds the batch ledger and synced results
    pub work_dir: PathBuf,

    /// Fixed-image mask used during evaluation
    pub mask: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("regraph-work"),
            mask: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, compact)
    pub format: String,

    /// Include timestamps
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            timestamps: true,
        }
    }
}

impl Config {
    /// Load configuration from a file (YAML or TOML, auto-detected by extension)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml(&content),
            "toml" => Self::from_toml(&content),
            _ => Self::from_yaml(&content).or_else(|_| Self::from_toml(&content)),
        }
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Merge another config into this one (other values take precedence if set)
    pub fn merge(&mut self, other: Config) {
        let graph = GraphConfig::default();
        if other.graph.frame_count.is_some() {
            self.graph.frame_count = other.graph.frame_count;
        }
        if other.graph.gap_scale != graph.gap_scale {
            self.graph.gap_scale = other.graph.gap_scale;
        }
        if other.graph.max_gap.is_some() {
            self.graph.max_gap = other.graph.max_gap;
        }
        if other.graph.difficulty_importance != graph.difficulty_importance {
            self.graph.difficulty_importance = other.graph.difficulty_importance;
        }
        if other.graph.voting_k != graph.voting_k {
            self.graph.voting_k = other.graph.voting_k;
        }
        if other.graph.max_fixed_t.is_some() {
            self.graph.max_fixed_t = other.graph.max_fixed_t;
        }

        let quality = QualityConfig::default();
        if other.quality.evaluators != quality.evaluators {
            self.quality.evaluators = other.quality.evaluators;
        }
        if other.quality.selection_metric != quality.selection_metric {
            self.quality.selection_metric = other.quality.selection_metric;
        }
        if other.quality.threshold != quality.threshold {
            self.quality.threshold = other.quality.threshold;
        }
        if other.quality.ceiling != quality.ceiling {
            self.quality.ceiling = other.quality.ceiling;
        }
        if other.quality.cost_scale != quality.cost_scale {
            self.quality.cost_scale = other.quality.cost_scale;
        }
        if other.quality.levels_per_parameter_file != quality.levels_per_parameter_file {
            self.quality.levels_per_parameter_file = other.quality.levels_per_parameter_file;
        }

        // Cluster settings travel together
        if other.cluster != ClusterConfig::default() {
            self.cluster = other.cluster;
        }

        if other.paths.work_dir != PathsConfig::default().work_dir {
            self.paths.work_dir = other.paths.work_dir;
        }
        if other.paths.mask.is_some() {
            self.paths.mask = other.paths.mask;
        }

        let logging = LoggingConfig::default();
        if other.logging.level != logging.level {
            self.logging.level = other.logging.level;
        }
        if other.logging.format != logging.format {
            self.logging.format = other.logging.format;
        }
        if !other.logging.timestamps {
            self.logging.timestamps = false;
        }
    }

    /// Check the settings used by the local graph commands.
    ///
    /// Cluster settings are checked separately by the orchestrator, since
    /// the graph commands run without a cluster.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !self.graph.gap_scale.is_finite() || self.graph.gap_scale <= 0.0 {
            return invalid(format!(
                "graph.gap_scale must be positive, got {}",
                self.graph.gap_scale
            ));
        }
        PowerTransform::new(self.graph.difficulty_importance)
            .map_err(|e| ConfigError::Invalid(format!("graph: {}", e)))?;
        if self.graph.voting_k == 0 {
            return invalid("graph.voting_k must be at least 1".into());
        }
        if self.quality.evaluators.is_empty() {
            return invalid("quality.evaluators is empty".into());
        }
        if !self
            .quality
            .evaluators
            .contains(&self.quality.selection_metric)
        {
            return invalid(format!(
                "quality.selection_metric '{}' is not among quality.evaluators",
                self.quality.selection_metric
            ));
        }
        ThresholdCost::new(self.quality.threshold, self.quality.cost_scale)
            .map_err(|e| ConfigError::Invalid(format!("quality: {}", e)))?;
        if let Some(ceiling) = self.quality.ceiling {
            CeilingCost::new(ceiling, self.quality.cost_scale)
                .map_err(|e| ConfigError::Invalid(format!("quality: {}", e)))?;
        }
        if self.quality.levels_per_parameter_file.is_empty()
            || self.quality.levels_per_parameter_file.contains(&0)
        {
            return invalid(
                "quality.levels_per_parameter_file needs at least one level per file".into(),
            );
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return invalid(format!("unknown logging.level '{}'", self.logging.level));
        }
        Ok(())
    }

    /// Create an example configuration
    pub fn example() -> Self {
        Self {
            graph: GraphConfig {
                frame_count: Some(200),
                max_gap: Some(20),
                ..Default::default()
            },
            quality: QualityConfig {
                levels_per_parameter_file: vec![4, 4],
                ..Default::default()
            },
            cluster: ClusterConfig {
                host: "login.cluster.example.org".to_string(),
                user: "alice".to_string(),
                remote_root: PathBuf::from("/scratch/alice/regraph"),
                image_dir: PathBuf::from("/scratch/alice/images"),
                mask_dir: Some(PathBuf::from("/scratch/alice/masks")),
                parameter_files: vec![
                    PathBuf::from("/scratch/alice/params/rigid.txt"),
                    PathBuf::from("/scratch/alice/params/bspline.txt"),
                ],
                slurm: SlurmOptions {
                    partition: Some("cpu".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
            paths: PathsConfig {
                work_dir: PathBuf::from("/data/alice/regraph"),
                mask: Some(PathBuf::from("/data/alice/masks/mask.mhd")),
            },
            logging: LoggingConfig::default(),
        }
    }

    /// Generate example YAML configuration
    pub fn example_yaml() -> String {
        serde_yaml::to_string(&Self::example()).unwrap_or_default()
    }

    /// Generate example TOML configuration
    pub fn example_toml() -> String {
        toml::to_string_pretty(&Self::example()).unwrap_or_default()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    IoError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
