use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::batch::KeypointInputs;
use crate::params::{join, NamedParams, ParamMapper, ParamVisitor};

#[derive(Debug, Clone)]
pub struct KeypointNetConfig {
    pub in_channels: usize,
    /// Channel width of the stem and backbone.
    pub width: usize,
    /// Number of 3x3 conv blocks after the stem.
    pub depth: usize,
    pub num_classes: usize,
}

impl Default for KeypointNetConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            width: 32,
            depth: 2,
            num_classes: 1,
        }
    }
}

/// Corner/center keypoint network in the CenterNet layout.
///
/// `pre` is the stem, `kps` the backbone; the remaining fields are 1x1 output heads producing
/// per-class heatmaps, corner embeddings ("tags"), and sub-pixel offsets ("regrs").
#[derive(Debug, Module)]
pub struct KeypointNet<B: Backend> {
    pre: Conv2d<B>,
    kps: Vec<Conv2d<B>>,
    tl_heats: Conv2d<B>,
    br_heats: Conv2d<B>,
    ct_heats: Conv2d<B>,
    tl_tags: Conv2d<B>,
    br_tags: Conv2d<B>,
    tl_regrs: Conv2d<B>,
    br_regrs: Conv2d<B>,
    ct_regrs: Conv2d<B>,
}

/// Raw head outputs, all at input resolution.
#[derive(Debug, Clone)]
pub struct KeypointOutputs<B: Backend> {
    /// Heatmap logits `[batch, classes, h, w]`.
    pub tl_heats: Tensor<B, 4>,
    pub br_heats: Tensor<B, 4>,
    pub ct_heats: Tensor<B, 4>,
    /// Embeddings `[batch, 1, h, w]`.
    pub tl_tags: Tensor<B, 4>,
    pub br_tags: Tensor<B, 4>,
    /// Offsets `[batch, 2, h, w]`.
    pub tl_regrs: Tensor<B, 4>,
    pub br_regrs: Tensor<B, 4>,
    pub ct_regrs: Tensor<B, 4>,
}

fn conv3x3<B: Backend>(channels_in: usize, channels_out: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([channels_in, channels_out], [3, 3])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

fn head<B: Backend>(channels_in: usize, channels_out: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([channels_in, channels_out], [1, 1]).init(device)
}

impl<B: Backend> KeypointNet<B> {
    pub fn new(cfg: KeypointNetConfig, device: &B::Device) -> Self {
        let width = cfg.width;
        let classes = cfg.num_classes;
        let pre = conv3x3(cfg.in_channels, width, device);
        let kps = (0..cfg.depth)
            .map(|_| conv3x3(width, width, device))
            .collect();
        Self {
            pre,
            kps,
            tl_heats: head(width, classes, device),
            br_heats: head(width, classes, device),
            ct_heats: head(width, classes, device),
            tl_tags: head(width, 1, device),
            br_tags: head(width, 1, device),
            tl_regrs: head(width, 2, device),
            br_regrs: head(width, 2, device),
            ct_regrs: head(width, 2, device),
        }
    }

    pub fn forward(&self, inputs: KeypointInputs<B>) -> KeypointOutputs<B> {
        let mut x = relu(self.pre.forward(inputs.images));
        for block in &self.kps {
            x = relu(block.forward(x));
        }
        KeypointOutputs {
            tl_heats: self.tl_heats.forward(x.clone()),
            br_heats: self.br_heats.forward(x.clone()),
            ct_heats: self.ct_heats.forward(x.clone()),
            tl_tags: self.tl_tags.forward(x.clone()),
            br_tags: self.br_tags.forward(x.clone()),
            tl_regrs: self.tl_regrs.forward(x.clone()),
            br_regrs: self.br_regrs.forward(x.clone()),
            ct_regrs: self.ct_regrs.forward(x),
        }
    }
}

impl<B: Backend> NamedParams<B> for KeypointNet<B> {
    fn visit_params<V: ParamVisitor<B>>(&self, prefix: &str, visitor: &mut V) {
        self.pre.visit_params(&join(prefix, "pre"), visitor);
        self.kps.visit_params(&join(prefix, "kps"), visitor);
        self.tl_heats.visit_params(&join(prefix, "tl_heats"), visitor);
        self.br_heats.visit_params(&join(prefix, "br_heats"), visitor);
        self.ct_heats.visit_params(&join(prefix, "ct_heats"), visitor);
        self.tl_tags.visit_params(&join(prefix, "tl_tags"), visitor);
        self.br_tags.visit_params(&join(prefix, "br_tags"), visitor);
        self.tl_regrs.visit_params(&join(prefix, "tl_regrs"), visitor);
        self.br_regrs.visit_params(&join(prefix, "br_regrs"), visitor);
        self.ct_regrs.visit_params(&join(prefix, "ct_regrs"), visitor);
    }

    fn map_params<M: ParamMapper<B>>(self, prefix: &str, mapper: &mut M) -> Self {
        Self {
            pre: self.pre.map_params(&join(prefix, "pre"), mapper),
            kps: self.kps.map_params(&join(prefix, "kps"), mapper),
            tl_heats: self.tl_heats.map_params(&join(prefix, "tl_heats"), mapper),
            br_heats: self.br_heats.map_params(&join(prefix, "br_heats"), mapper),
            ct_heats: self.ct_heats.map_params(&join(prefix, "ct_heats"), mapper),
            tl_tags: self.tl_tags.map_params(&join(prefix, "tl_tags"), mapper),
            br_tags: self.br_tags.map_params(&join(prefix, "br_tags"), mapper),
            tl_regrs: self.tl_regrs.map_params(&join(prefix, "tl_regrs"), mapper),
            br_regrs: self.br_regrs.map_params(&join(prefix, "br_regrs"), mapper),
            ct_regrs: self.ct_regrs.map_params(&join(prefix, "ct_regrs"), mapper),
        }
    }
}
