//! Model and loss composed into one callable.

use burn::tensor::backend::{AutodiffBackend, Backend};
use models::{
    join, KeypointInputs, KeypointLoss, KeypointNet, KeypointTargets, LossComponents,
    NamedParams, ParamMapper, ParamVisitor,
};

use crate::compat::Compat;

pub const MODEL_ATTR: &str = "model";

/// `loss(model(xs), ys)`; holds no state of its own.
#[derive(Debug, Clone)]
pub struct Network<B: Backend> {
    pub model: Compat<KeypointNet<B>>,
    pub loss: KeypointLoss,
}

impl<B: Backend> Network<B> {
    pub fn new(model: KeypointNet<B>, loss: KeypointLoss) -> Self {
        Self {
            model: Compat::new(model),
            loss,
        }
    }

    pub fn forward(&self, xs: KeypointInputs<B>, ys: KeypointTargets<B>) -> LossComponents<B> {
        let preds = self.model.forward(xs);
        self.loss.forward(preds, ys)
    }

    /// Replica for `device` that keeps each parameter's gradient requirement.
    pub fn fork(self, device: &B::Device) -> Self {
        Self {
            model: self.model.fork::<B>(device),
            loss: self.loss,
        }
    }

    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            model: self.model.to_device::<B>(device),
            loss: self.loss,
        }
    }
}

impl<B: AutodiffBackend> Network<B> {
    pub fn valid(&self) -> Network<B::InnerBackend> {
        Network {
            model: self.model.valid::<B>(),
            loss: self.loss.clone(),
        }
    }
}

impl<B: Backend> NamedParams<B> for Network<B> {
    fn visit_params<V: ParamVisitor<B>>(&self, prefix: &str, visitor: &mut V) {
        self.model.visit_params(&join(prefix, MODEL_ATTR), visitor);
    }

    fn map_params<M: ParamMapper<B>>(self, prefix: &str, mapper: &mut M) -> Self {
        Self {
            model: self.model.map_params(&join(prefix, MODEL_ATTR), mapper),
            loss: self.loss,
        }
    }
}
