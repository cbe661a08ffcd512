//! Error type shared by the orchestration layer.

use std::path::PathBuf;
use thiserror::Error;

use crate::factory::Mode;

pub type NnetResult<T> = Result<T, NnetError>;

fn located(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" at {}", p.display()))
        .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum NnetError {
    #[error("unknown model `{name}` (registered: {known})")]
    UnknownModel { name: String, known: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("config io error at {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error{}: {source}", located(.path))]
    ConfigParse {
        /// `None` when parsing an in-memory string.
        path: Option<PathBuf>,
        #[source]
        source: toml::de::Error,
    },
    #[error("chunk sizes {chunks:?} sum to {sum}, batch has {batch} items")]
    ChunkMismatch {
        chunks: Vec<usize>,
        sum: usize,
        batch: usize,
    },
    #[error("{devices} devices configured for {chunks} chunk sizes")]
    DeviceMismatch { devices: usize, chunks: usize },
    #[error("inputs carry {inputs} items but targets carry {targets}")]
    BatchMismatch { inputs: usize, targets: usize },
    #[error("replica on device {0} panicked")]
    ReplicaFailed(usize),
    #[error("checkpoint keys do not match: missing {missing:?}, unexpected {unexpected:?}")]
    KeyMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error("shape mismatch for `{name}`: checkpoint {found:?}, model {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint format error at {path}: {msg}")]
    Format { path: PathBuf, msg: String },
    #[error("tensor data error for `{name}`: {msg}")]
    Data { name: String, msg: String },
    #[error("operation requires {expected:?} mode, network is in {actual:?} mode")]
    WrongMode { expected: Mode, actual: Mode },
}
