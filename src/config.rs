//! Pipeline configuration.
//!
//! The pipeline is declared in `<target>/.phasegate/pipeline.toml` (or a path
//! given with `--config`). [`PipelineConfig`] is the parsed file; [`Config`]
//! resolves it against a target directory and carries the runtime paths and
//! CLI overrides.
//!
//! ```toml
//! [workers.builder]
//! command = "claude"
//! args = ["--print"]
//! timeout_secs = 900
//!
//! [[phases]]
//! name = "plan"
//! worker = "builder"
//! task = "Write the implementation plan"
//! marker = "PLAN COMPLETE"
//! kind = "approval-gated"
//!
//! [quality]
//! worker = "builder"
//! marker = "CORRECTION COMPLETE"
//! [[quality.checks]]
//! name = "build"
//! command = "cargo"
//! args = ["build"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::convergence::DEFAULT_MAX_ITERATIONS;
use crate::errors::ConfigError;
use crate::phase::{DEFAULT_MAX_RETRIES, Phase};

/// Directory inside the target that holds run state, logs and project lessons.
pub const STATE_DIR: &str = ".phasegate";

/// Environment variable overriding the global directory (`~/.phasegate`).
pub const HOME_ENV: &str = "PHASEGATE_HOME";

const DEFAULT_TIMEOUT_SECS: u64 = 900;
const DEFAULT_LINE_WINDOW: u32 = 5;
const DEFAULT_FINDING_SIMILARITY: f64 = 0.5;
const DEFAULT_LESSON_SIMILARITY: f64 = 0.6;
const DEFAULT_MAX_CORRECTIONS: u32 = 2;

/// How to launch one named worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// One deterministic quality check, run as a command in the workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityConfig {
    /// Correction worker
    pub worker: String,
    pub marker: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_corrections")]
    pub max_corrections: u32,
    #[serde(default)]
    pub checks: Vec<CheckSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScannerSpec {
    pub name: String,
    pub worker: String,
    #[serde(default)]
    pub task: String,
    pub marker: String,
    #[serde(default)]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewConfig {
    #[serde(default)]
    pub scanners: Vec<ScannerSpec>,
    pub fix_worker: String,
    pub fix_marker: String,
    #[serde(default = "default_max_retries")]
    pub fix_max_retries: u32,
    /// Max line distance for two findings to be the same defect
    #[serde(default = "default_line_window")]
    pub line_window: u32,
    /// Word-set Jaccard similarity required to merge descriptions
    #[serde(default = "default_finding_similarity")]
    pub similarity_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConvergenceConfig {
    pub scorer: String,
    pub score_marker: String,
    #[serde(default)]
    pub score_task: String,
    pub fixer: String,
    pub fix_marker: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LessonsConfig {
    pub worker: String,
    pub marker: String,
    #[serde(default)]
    pub task: String,
    #[serde(default = "default_lesson_similarity")]
    pub similarity_threshold: f64,
    /// Global lesson directory; `~/` is expanded
    #[serde(default)]
    pub global_dir: Option<PathBuf>,
}

/// The parsed `pipeline.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerSpec>,
    #[serde(default)]
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub quality: Option<QualityConfig>,
    #[serde(default)]
    pub review: Option<ReviewConfig>,
    #[serde(default)]
    pub convergence: Option<ConvergenceConfig>,
    #[serde(default)]
    pub lessons: Option<LessonsConfig>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_max_corrections() -> u32 {
    DEFAULT_MAX_CORRECTIONS
}

fn default_line_window() -> u32 {
    DEFAULT_LINE_WINDOW
}

fn default_finding_similarity() -> f64 {
    DEFAULT_FINDING_SIMILARITY
}

fn default_lesson_similarity() -> f64 {
    DEFAULT_LESSON_SIMILARITY
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl PipelineConfig {
    /// Parse a pipeline file without validating it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check the structural rules a run depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.phases.is_empty() {
            return Err(ConfigError::NoPhases);
        }

        let mut seen = HashSet::new();
        for phase in &self.phases {
            if !seen.insert(phase.name.as_str()) {
                return Err(ConfigError::DuplicatePhase(phase.name.clone()));
            }
            let context = format!("Phase '{}'", phase.name);
            self.require_worker(&context, &phase.worker)?;
            require_marker(&context, &phase.marker)?;
            if phase.is_loopable() {
                require_marker(&context, &phase.more_work_marker)?;
                if phase.more_work_marker == phase.marker {
                    return Err(ConfigError::AmbiguousMarkers(phase.name.clone()));
                }
            }
            if phase.quality_gate && self.quality.is_none() {
                return Err(ConfigError::MissingSection {
                    context,
                    section: "quality".to_string(),
                });
            }
        }

        if let Some(quality) = &self.quality {
            self.require_worker("[quality]", &quality.worker)?;
            require_marker("[quality]", &quality.marker)?;
        }

        if let Some(review) = &self.review {
            self.require_worker("[review] fix_worker", &review.fix_worker)?;
            require_marker("[review] fix_marker", &review.fix_marker)?;
            require_threshold("review.similarity_threshold", review.similarity_threshold)?;
            for scanner in &review.scanners {
                let context = format!("Scanner '{}'", scanner.name);
                self.require_worker(&context, &scanner.worker)?;
                require_marker(&context, &scanner.marker)?;
            }
        }

        if let Some(convergence) = &self.convergence {
            self.require_worker("[convergence] scorer", &convergence.scorer)?;
            self.require_worker("[convergence] fixer", &convergence.fixer)?;
            require_marker("[convergence] score_marker", &convergence.score_marker)?;
            require_marker("[convergence] fix_marker", &convergence.fix_marker)?;
            if !(1..=DEFAULT_MAX_ITERATIONS).contains(&convergence.max_iterations) {
                return Err(ConfigError::IterationCapOutOfRange {
                    value: convergence.max_iterations,
                    max: DEFAULT_MAX_ITERATIONS,
                });
            }
        }

        if let Some(lessons) = &self.lessons {
            self.require_worker("[lessons]", &lessons.worker)?;
            require_marker("[lessons]", &lessons.marker)?;
            require_threshold("lessons.similarity_threshold", lessons.similarity_threshold)?;
        }

        Ok(())
    }

    fn require_worker(&self, context: &str, worker: &str) -> Result<(), ConfigError> {
        if self.workers.contains_key(worker) {
            Ok(())
        } else {
            Err(ConfigError::UndefinedWorker {
                context: context.to_string(),
                worker: worker.to_string(),
            })
        }
    }
}

fn require_marker(context: &str, marker: &str) -> Result<(), ConfigError> {
    if marker.trim().is_empty() {
        Err(ConfigError::EmptyMarker(context.to_string()))
    } else {
        Ok(())
    }
}

fn require_threshold(name: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::ThresholdOutOfRange {
            name: name.to_string(),
            value,
        })
    }
}

/// Runtime configuration for one target.
#[derive(Debug, Clone)]
pub struct Config {
    pub target_dir: PathBuf,
    pub state_dir: PathBuf,
    pub config_file: PathBuf,
    pub run_file: PathBuf,
    pub state_file: PathBuf,
    pub log_dir: PathBuf,
    pub lessons_file: PathBuf,
    pub global_dir: PathBuf,
    pub auto_approve: bool,
    pub verbose: bool,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Resolve paths for `target_dir` without loading a pipeline file.
    pub fn paths_only(target_dir: &Path) -> Result<Self> {
        let target_dir = target_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve target {}", target_dir.display()))?;
        let state_dir = target_dir.join(STATE_DIR);
        let global_dir = resolve_global_dir(None, &state_dir);

        Ok(Self {
            config_file: state_dir.join("pipeline.toml"),
            run_file: state_dir.join("run.json"),
            state_file: state_dir.join("state"),
            log_dir: state_dir.join("logs"),
            lessons_file: state_dir.join("lessons.jsonl"),
            global_dir,
            state_dir,
            target_dir,
            auto_approve: false,
            verbose: false,
            pipeline: PipelineConfig::default(),
        })
    }

    /// Load and validate the pipeline for `target_dir`.
    pub fn new(
        target_dir: &Path,
        config_file: Option<&Path>,
        auto_approve: bool,
        verbose: bool,
    ) -> Result<Self> {
        let mut config = Self::paths_only(target_dir)?;
        if let Some(path) = config_file {
            config.config_file = path.to_path_buf();
        }

        let pipeline = PipelineConfig::load(&config.config_file)?;
        pipeline.validate()?;

        let configured_global = pipeline.lessons.as_ref().and_then(|l| l.global_dir.clone());
        config.global_dir = resolve_global_dir(configured_global, &config.state_dir);
        config.pipeline = pipeline;
        config.auto_approve = auto_approve;
        config.verbose = verbose;
        Ok(config)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).context("Failed to create state directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    pub fn global_lessons_file(&self) -> PathBuf {
        self.global_dir.join("lessons.jsonl")
    }
}

/// Global directory: explicit config, then `PHASEGATE_HOME`, then `~/.phasegate`.
fn resolve_global_dir(configured: Option<PathBuf>, fallback: &Path) -> PathBuf {
    if let Some(dir) = configured {
        return expand_home(&dir);
    }
    if let Ok(dir) = std::env::var(HOME_ENV)
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .map(|home| home.join(STATE_DIR))
        .unwrap_or_else(|| fallback.to_path_buf())
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
