//! Model definitions addressable by configuration key.

use std::collections::BTreeMap;

use burn::tensor::backend::Backend;
use models::{KeypointLoss, KeypointNet, KeypointNetConfig};

use crate::error::{NnetError, NnetResult};

/// What a model definition provides: how to build the network and the loss to train it with.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub model: KeypointNetConfig,
    pub loss: KeypointLoss,
}

impl ModelEntry {
    /// Rejects definitions with an empty layer dimension.
    pub fn validate(&self) -> NnetResult<()> {
        let cfg = &self.model;
        for (field, value) in [
            ("in_channels", cfg.in_channels),
            ("width", cfg.width),
            ("num_classes", cfg.num_classes),
        ] {
            if value == 0 {
                return Err(NnetError::Config(format!("model {field} must be positive")));
            }
        }
        Ok(())
    }

    pub fn build<B: Backend>(
        &self,
        device: &B::Device,
    ) -> NnetResult<(KeypointNet<B>, KeypointLoss)> {
        self.validate()?;
        Ok((
            KeypointNet::new(self.model.clone(), device),
            self.loss.clone(),
        ))
    }
}

pub type ModelCtor = fn() -> ModelEntry;

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entries: BTreeMap<String, ModelCtor>,
}

fn centernet_tiny() -> ModelEntry {
    ModelEntry {
        model: KeypointNetConfig {
            width: 8,
            depth: 1,
            ..Default::default()
        },
        loss: KeypointLoss::default(),
    }
}

fn centernet_52() -> ModelEntry {
    ModelEntry {
        model: KeypointNetConfig {
            width: 64,
            depth: 4,
            num_classes: 80,
            ..Default::default()
        },
        loss: KeypointLoss::default(),
    }
}

fn centernet_104() -> ModelEntry {
    ModelEntry {
        model: KeypointNetConfig {
            width: 128,
            depth: 8,
            num_classes: 80,
            ..Default::default()
        },
        loss: KeypointLoss::default(),
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in keypoint networks.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register("CenterNet-tiny", centernet_tiny)
            .register("CenterNet-52", centernet_52)
            .register("CenterNet-104", centernet_104);
        registry
    }

    /// Adds or replaces the definition behind `name`.
    pub fn register(&mut self, name: impl Into<String>, ctor: ModelCtor) -> &mut Self {
        self.entries.insert(name.into(), ctor);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn resolve(&self, name: &str) -> NnetResult<ModelEntry> {
        match self.entries.get(name) {
            Some(ctor) => Ok(ctor()),
            None => Err(NnetError::UnknownModel {
                name: name.to_string(),
                known: self.names().collect::<Vec<_>>().join(", "),
            }),
        }
    }
}
