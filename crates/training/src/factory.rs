//! The network factory: one object owning the model, its loss, the device layout, and the
//! optimizer, with train/validate/test steps and checkpoint management on top.

use std::path::Path;

use burn::module::Param;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use models::{
    KeypointInputs, KeypointNet, KeypointOutputs, KeypointTargets, NamedParams, ParamMapper,
    ParamVisitor, Scatter,
};
use tracing::{debug, info};

use crate::checkpoint::{
    crop_pretrained, load_state_dict, read_params, save_state_dict, write_params, StateDict,
};
use crate::config::SystemConfig;
use crate::error::{NnetError, NnetResult};
use crate::network::Network;
use crate::optim::{build_optimizer, ParamUpdater};
use crate::parallel::{DataParallel, REPLICA_ATTR};
use crate::registry::ModelRegistry;

/// Training state of the factory.
///
/// The keypoint network has no mode-dependent layers, so the only effect is that
/// [`NetworkFactory::train`] is refused in `Eval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Loss components of one training step, averaged over devices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainLosses {
    pub total: f32,
    pub focal: f32,
    pub pull: f32,
    pub push: f32,
    pub regr: f32,
}

/// One network-level parameter as reported by [`NetworkFactory::parameters`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamInfo {
    pub name: String,
    pub shape: Vec<usize>,
    pub trainable: bool,
}

impl ParamInfo {
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

#[derive(Default)]
struct Inventory {
    params: Vec<ParamInfo>,
}

impl<B: Backend> ParamVisitor<B> for Inventory {
    fn visit<const D: usize>(&mut self, name: &str, param: &Param<Tensor<B, D>>) {
        let tensor = param.val();
        self.params.push(ParamInfo {
            name: name.to_string(),
            shape: tensor.dims().to_vec(),
            trainable: tensor.is_require_grad(),
        });
    }
}

struct Freezer<'a> {
    markers: &'a [String],
    frozen: Vec<String>,
}

impl<B: Backend> ParamMapper<B> for Freezer<'_> {
    fn map<const D: usize>(
        &mut self,
        name: &str,
        param: Param<Tensor<B, D>>,
    ) -> Param<Tensor<B, D>> {
        if self.markers.iter().any(|marker| name.contains(marker.as_str())) {
            self.frozen.push(name.to_string());
            param.set_require_grad(false)
        } else {
            param
        }
    }
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f32 {
    tensor.mean().into_scalar().elem::<f32>()
}

/// Owns a [`Network`] replicated over a [`DataParallel`] layout and drives it.
///
/// Parameter names seen by freezing and bootstrap loading are network level
/// (`module.model.module.<param>`); snapshots written by [`save_params`](Self::save_params) are
/// model level (`module.<param>`).
pub struct NetworkFactory<B: AutodiffBackend> {
    config: SystemConfig,
    network: Network<B>,
    parallel: DataParallel<B::Device>,
    optimizer: Box<dyn ParamUpdater<B, KeypointNet<B>>>,
    learning_rate: f64,
    mode: Mode,
}

impl<B: AutodiffBackend> NetworkFactory<B> {
    pub fn new(
        config: SystemConfig,
        registry: &ModelRegistry,
        devices: Vec<B::Device>,
    ) -> NnetResult<Self> {
        config.validate()?;
        B::seed(config.seed);

        info!(model = %config.snapshot_name, "building network");
        let entry = registry.resolve(&config.snapshot_name)?;
        let parallel = DataParallel::new(devices, config.chunk_sizes.clone())?;
        let (model, loss) = entry.build::<B>(parallel.primary())?;

        let mut factory = Self {
            optimizer: build_optimizer::<B, KeypointNet<B>>(config.opt_algo),
            learning_rate: config.learning_rate,
            network: Network::new(model, loss),
            parallel,
            mode: Mode::Train,
            config,
        };

        if let Some(path) = factory.config.pretrained.clone() {
            factory.load_cropped_pretrained(&path)?;
        }
        info!(total = factory.num_params(), "total parameters");
        factory.fix_layers();
        Ok(factory)
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn network(&self) -> &Network<B> {
        &self.network
    }

    pub fn devices(&self) -> &[B::Device] {
        self.parallel.devices()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn train_mode(&mut self) {
        self.mode = Mode::Train;
    }

    pub fn eval_mode(&mut self) {
        self.mode = Mode::Eval;
    }

    /// One optimization step over the whole batch, split across devices.
    pub fn train(
        &mut self,
        xs: KeypointInputs<B>,
        ys: KeypointTargets<B>,
    ) -> NnetResult<TrainLosses> {
        if self.mode != Mode::Train {
            return Err(NnetError::WrongMode {
                expected: Mode::Train,
                actual: self.mode,
            });
        }
        let step = self.parallel.train_step(&self.network, xs, ys)?;
        let module = self.network.model.module.clone();
        self.network.model.module = self.optimizer.update(self.learning_rate, module, step.grads);

        let losses = step.losses;
        let losses = TrainLosses {
            total: scalar(losses.total),
            focal: scalar(losses.focal),
            pull: scalar(losses.pull),
            push: scalar(losses.push),
            regr: scalar(losses.regr),
        };
        debug!(?losses, lr = self.learning_rate, "train step");
        Ok(losses)
    }

    /// Mean total loss over devices, computed without gradient tracking.
    pub fn validate(
        &self,
        xs: KeypointInputs<B::InnerBackend>,
        ys: KeypointTargets<B::InnerBackend>,
    ) -> NnetResult<f32> {
        let network = self.network.valid();
        let losses = self
            .parallel
            .forward::<B::InnerBackend>(&network, xs, ys)?;
        Ok(scalar(losses.total))
    }

    /// Raw model outputs on the primary device, without gradient tracking.
    pub fn test(&self, xs: KeypointInputs<B::InnerBackend>) -> KeypointOutputs<B::InnerBackend> {
        let model = self.network.model.valid::<B>();
        model.forward(xs.to_device(self.parallel.primary()))
    }

    pub fn set_lr(&mut self, lr: f64) {
        info!(lr, "setting learning rate");
        self.learning_rate = lr;
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Strict load of a model-level snapshot (`module.<param>` keys).
    pub fn load_pretrained_params(&mut self, path: &Path) -> NnetResult<()> {
        info!(path = %path.display(), "loading pretrained parameters");
        let dict = load_state_dict(path)?;
        self.network.model = write_params::<B, _>(self.network.model.clone(), "", &dict, true)?;
        Ok(())
    }

    pub fn load_params(&mut self, iteration: u64) -> NnetResult<()> {
        let path = self.config.snapshot_path(iteration);
        info!(iteration, path = %path.display(), "loading model");
        let dict = load_state_dict(&path)?;
        self.network.model = write_params::<B, _>(self.network.model.clone(), "", &dict, true)?;
        Ok(())
    }

    pub fn save_params(&self, iteration: u64) -> NnetResult<()> {
        let path = self.config.snapshot_path(iteration);
        info!(iteration, path = %path.display(), "saving model");
        save_state_dict(&path, &self.state_dict()?)
    }

    /// Non-strict, network-level bootstrap from a model-level snapshot with the heads removed.
    pub fn load_cropped_pretrained(&mut self, path: &Path) -> NnetResult<()> {
        info!(
            path = %path.display(),
            exclude = %self.config.pretrained_exclude,
            "loading cropped pretrained parameters"
        );
        let dict = crop_pretrained(load_state_dict(path)?, &self.config.pretrained_exclude);
        self.network = write_params::<B, _>(self.network.clone(), REPLICA_ATTR, &dict, false)?;
        Ok(())
    }

    /// Stops gradient tracking for every parameter whose network-level name contains a frozen
    /// marker. Returns the frozen names.
    pub fn fix_layers(&mut self) -> Vec<String> {
        let mut freezer = Freezer {
            markers: &self.config.frozen_markers,
            frozen: Vec::new(),
        };
        self.network = self.network.clone().map_params(REPLICA_ATTR, &mut freezer);
        info!(frozen = freezer.frozen.len(), markers = ?self.config.frozen_markers, "fixed layers");
        freezer.frozen
    }

    /// Every parameter under its network-level name, in traversal order.
    pub fn parameters(&self) -> Vec<ParamInfo> {
        let mut inventory = Inventory::default();
        self.network.visit_params(REPLICA_ATTR, &mut inventory);
        inventory.params
    }

    pub fn trainable_params(&self) -> Vec<String> {
        self.parameters()
            .into_iter()
            .filter(|p| p.trainable)
            .map(|p| p.name)
            .collect()
    }

    pub fn frozen_params(&self) -> Vec<String> {
        self.parameters()
            .into_iter()
            .filter(|p| !p.trainable)
            .map(|p| p.name)
            .collect()
    }

    /// Total number of scalar parameters, frozen ones included.
    pub fn num_params(&self) -> usize {
        self.parameters().iter().map(ParamInfo::numel).sum()
    }

    /// Model-level snapshot of the current parameters, as written by `save_params`.
    pub fn state_dict(&self) -> NnetResult<StateDict> {
        read_params::<B, _>(&self.network.model, "")
    }
}
