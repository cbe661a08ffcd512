//! Burn modules for corner/center keypoint detection.
//!
//! This crate defines the pieces a training wrapper needs from a model definition:
//! - `KeypointNet`: CenterNet-style network (`pre` stem, `kps` backbone, heatmap/tag/offset heads).
//! - `KeypointLoss`: focal + pull/push + offset loss returning `LossComponents`.
//! - `KeypointInputs` / `KeypointTargets`: batch types that can be scattered across devices.
//! - `NamedParams`: dotted-path parameter traversal used for state dictionaries and freezing.
//!
//! These are plain Burn modules with no knowledge of optimizers or devices beyond the one they
//! are built on; the `training` crate wraps them for data-parallel training.

pub mod batch;
pub mod keypoint;
pub mod loss;
pub mod params;

pub use batch::{KeypointInputs, KeypointTargets, Scatter};
pub use keypoint::{KeypointNet, KeypointNetConfig, KeypointOutputs};
pub use loss::{KeypointLoss, LossComponents};
pub use params::{join, NamedParams, ParamMapper, ParamShapes, ParamVisitor};

pub mod prelude {
    pub use super::{
        KeypointInputs, KeypointLoss, KeypointNet, KeypointNetConfig, KeypointOutputs,
        KeypointTargets, LossComponents, NamedParams, Scatter,
    };
}
