//! Checkpoint-compatible model wrapper.
//!
//! Older snapshots were taken from a model nested one level deeper, so every key starts with
//! `module.`. Wrapping the model under the same attribute keeps those snapshots loadable.

use burn::module::{AutodiffModule, Module};
use burn::tensor::backend::{AutodiffBackend, Backend};
use models::{
    join, KeypointInputs, KeypointNet, KeypointOutputs, NamedParams, ParamMapper, ParamVisitor,
};

pub const COMPAT_ATTR: &str = "module";

#[derive(Debug, Clone)]
pub struct Compat<M> {
    pub module: M,
}

impl<M> Compat<M> {
    pub fn new(module: M) -> Self {
        Self { module }
    }

    pub fn into_inner(self) -> M {
        self.module
    }

    pub fn fork<B: Backend>(self, device: &B::Device) -> Self
    where
        M: Module<B>,
    {
        Self::new(self.module.fork(device))
    }

    pub fn to_device<B: Backend>(self, device: &B::Device) -> Self
    where
        M: Module<B>,
    {
        Self::new(self.module.to_device(device))
    }

    /// Copy of the wrapped model on the inner backend, with gradient tracking off.
    pub fn valid<B: AutodiffBackend>(&self) -> Compat<<M as AutodiffModule<B>>::InnerModule>
    where
        M: AutodiffModule<B>,
    {
        Compat::new(self.module.valid())
    }
}

impl<B: Backend> Compat<KeypointNet<B>> {
    pub fn forward(&self, inputs: KeypointInputs<B>) -> KeypointOutputs<B> {
        self.module.forward(inputs)
    }
}

impl<B: Backend, M: NamedParams<B>> NamedParams<B> for Compat<M> {
    fn visit_params<V: ParamVisitor<B>>(&self, prefix: &str, visitor: &mut V) {
        self.module.visit_params(&join(prefix, COMPAT_ATTR), visitor);
    }

    fn map_params<P: ParamMapper<B>>(self, prefix: &str, mapper: &mut P) -> Self {
        Self::new(self.module.map_params(&join(prefix, COMPAT_ATTR), mapper))
    }
}
