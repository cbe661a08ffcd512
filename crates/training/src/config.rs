//! System configuration, loaded once and passed to the factory by value.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::checkpoint::snapshot_path;
use crate::error::{NnetError, NnetResult};

pub const DEFAULT_LEARNING_RATE: f64 = 2.5e-4;
pub const DEFAULT_SEED: u64 = 317;
pub const DEFAULT_CACHE_DIR: &str = "cache";
/// Pretrained keys containing this are dropped when bootstrapping.
pub const DEFAULT_PRETRAINED_EXCLUDE: &str = "heats";
pub const DEFAULT_FROZEN_MARKERS: [&str; 2] = [".pre", ".kps"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

impl FromStr for OptimizerKind {
    type Err = NnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adam" => Ok(Self::Adam),
            "sgd" => Ok(Self::Sgd),
            other => Err(NnetError::Config(format!("unknown optimizer `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemConfig {
    /// Registry key of the model definition; also names the snapshot directory.
    pub snapshot_name: String,
    pub opt_algo: OptimizerKind,
    pub learning_rate: f64,
    pub batch_size: usize,
    /// Items per device; must sum to `batch_size`.
    pub chunk_sizes: Vec<usize>,
    pub cache_dir: PathBuf,
    /// Checkpoint path template; `{}` is replaced by the iteration.
    pub snapshot_file: String,
    /// Snapshot loaded non-strictly at construction, with head weights removed.
    pub pretrained: Option<PathBuf>,
    pub pretrained_exclude: String,
    /// Parameters whose network-level name contains any marker are frozen.
    pub frozen_markers: Vec<String>,
    pub seed: u64,
}

#[derive(Debug, Deserialize)]
struct SystemConfigFile {
    system: SystemSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SystemSection {
    snapshot_name: String,
    opt_algo: OptimizerKind,
    batch_size: usize,
    learning_rate: Option<f64>,
    chunk_sizes: Option<Vec<usize>>,
    cache_dir: Option<String>,
    snapshot_file: Option<String>,
    pretrained: Option<String>,
    pretrained_exclude: Option<String>,
    frozen_markers: Option<Vec<String>>,
    seed: Option<u64>,
}

fn default_snapshot_file(cache_dir: &Path, name: &str) -> String {
    cache_dir
        .join("nnet")
        .join(name)
        .join(format!("{name}_{{}}.safetensors"))
        .to_string_lossy()
        .into_owned()
}

impl SystemConfig {
    /// Defaults for everything but the model key, optimizer, and batch size.
    pub fn new(snapshot_name: impl Into<String>, opt_algo: OptimizerKind, batch_size: usize) -> Self {
        let snapshot_name = snapshot_name.into();
        let cache_dir = PathBuf::from(DEFAULT_CACHE_DIR);
        Self {
            snapshot_file: default_snapshot_file(&cache_dir, &snapshot_name),
            snapshot_name,
            opt_algo,
            learning_rate: DEFAULT_LEARNING_RATE,
            batch_size,
            chunk_sizes: vec![batch_size],
            cache_dir,
            pretrained: None,
            pretrained_exclude: DEFAULT_PRETRAINED_EXCLUDE.to_string(),
            frozen_markers: DEFAULT_FROZEN_MARKERS.iter().map(|m| m.to_string()).collect(),
            seed: DEFAULT_SEED,
        }
    }

    pub fn from_path(path: &Path) -> NnetResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| NnetError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, Some(path))
    }

    pub fn from_toml_str(raw: &str) -> NnetResult<Self> {
        Self::parse(raw, None)
    }

    fn parse(raw: &str, path: Option<&Path>) -> NnetResult<Self> {
        let file: SystemConfigFile = toml::from_str(raw).map_err(|source| NnetError::ConfigParse {
            path: path.map(Path::to_path_buf),
            source,
        })?;
        let cfg = Self::from_section(file.system);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_section(section: SystemSection) -> Self {
        let mut cfg = Self::new(section.snapshot_name, section.opt_algo, section.batch_size);
        if let Some(dir) = section.cache_dir {
            cfg.cache_dir = PathBuf::from(dir);
            cfg.snapshot_file = default_snapshot_file(&cfg.cache_dir, &cfg.snapshot_name);
        }
        if let Some(lr) = section.learning_rate {
            cfg.learning_rate = lr;
        }
        if let Some(chunks) = section.chunk_sizes {
            cfg.chunk_sizes = chunks;
        }
        if let Some(template) = section.snapshot_file {
            cfg.snapshot_file = template;
        }
        cfg.pretrained = section.pretrained.map(PathBuf::from);
        if let Some(exclude) = section.pretrained_exclude {
            cfg.pretrained_exclude = exclude;
        }
        if let Some(markers) = section.frozen_markers {
            cfg.frozen_markers = markers;
        }
        if let Some(seed) = section.seed {
            cfg.seed = seed;
        }
        cfg
    }

    pub fn validate(&self) -> NnetResult<()> {
        if self.snapshot_name.trim().is_empty() {
            return Err(NnetError::Config("snapshot_name is empty".into()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(NnetError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.batch_size == 0 {
            return Err(NnetError::Config("batch_size must be positive".into()));
        }
        if self.chunk_sizes.is_empty() || self.chunk_sizes.contains(&0) {
            return Err(NnetError::Config(format!(
                "chunk_sizes must be non-empty and positive, got {:?}",
                self.chunk_sizes
            )));
        }
        let sum: usize = self.chunk_sizes.iter().sum();
        if sum != self.batch_size {
            return Err(NnetError::ChunkMismatch {
                chunks: self.chunk_sizes.clone(),
                sum,
                batch: self.batch_size,
            });
        }
        if !self.snapshot_file.contains("{}") {
            return Err(NnetError::Config(format!(
                "snapshot_file `{}` has no `{{}}` placeholder",
                self.snapshot_file
            )));
        }
        Ok(())
    }

    pub fn snapshot_path(&self, iteration: u64) -> PathBuf {
        snapshot_path(&self.snapshot_file, iteration)
    }
}
