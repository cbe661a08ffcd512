#![recursion_limit = "256"]

//! Data-parallel training orchestration for keypoint networks.
//!
//! - `config`: the `[system]` TOML section every other piece reads from.
//! - `registry`: model definitions by name.
//! - `compat` / `network`: wrappers that fix parameter naming and bundle model with loss.
//! - `parallel`: uneven-chunk scatter, per-device replicas, gather.
//! - `checkpoint`: safetensors state dictionaries and key migration.
//! - `factory`: the `NetworkFactory` tying it all together.

pub mod checkpoint;
pub mod compat;
pub mod config;
pub mod error;
pub mod factory;
pub mod network;
pub mod optim;
pub mod parallel;
pub mod registry;

pub use checkpoint::{ParamTensor, StateDict};
pub use compat::Compat;
pub use config::{OptimizerKind, SystemConfig};
pub use error::{NnetError, NnetResult};
pub use factory::{Mode, NetworkFactory, ParamInfo, TrainLosses};
pub use network::Network;
pub use parallel::{DataParallel, ParallelStep, Shard};
pub use registry::{ModelEntry, ModelRegistry};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn::backend::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn::backend::NdArray<f32>;

pub type AutodiffTrainBackend = burn::backend::Autodiff<TrainBackend>;
