//! Optimizer selection behind a single object-safe interface.

use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use tracing::info;

use crate::config::OptimizerKind;

pub const SGD_MOMENTUM: f64 = 0.9;
pub const SGD_WEIGHT_DECAY: f32 = 1e-4;

/// Applies one update to a module, whatever optimizer sits behind it.
pub trait ParamUpdater<B: AutodiffBackend, M: AutodiffModule<B>>: Send {
    fn update(&mut self, lr: f64, module: M, grads: GradientsParams) -> M;
}

impl<B, M, O> ParamUpdater<B, M> for O
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B> + Send,
{
    fn update(&mut self, lr: f64, module: M, grads: GradientsParams) -> M {
        self.step(lr, module, grads)
    }
}

/// Adam with default betas, or SGD with momentum 0.9, no dampening, and weight decay 1e-4.
///
/// Parameters without gradients (frozen layers) are left untouched by either.
pub fn build_optimizer<B, M>(kind: OptimizerKind) -> Box<dyn ParamUpdater<B, M>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + 'static,
{
    info!(?kind, "building optimizer");
    match kind {
        OptimizerKind::Adam => Box::new(AdamConfig::new().init::<B, M>()),
        OptimizerKind::Sgd => Box::new(
            SgdConfig::new()
                .with_momentum(Some(
                    MomentumConfig::new()
                        .with_momentum(SGD_MOMENTUM)
                        .with_dampening(0.0),
                ))
                .with_weight_decay(Some(WeightDecayConfig::new(SGD_WEIGHT_DECAY)))
                .init::<B, M>(),
        ),
    }
}
