use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

use crate::batch::KeypointTargets;
use crate::keypoint::KeypointOutputs;

/// Loss terms returned by [`KeypointLoss::forward`], each a rank-1 tensor.
///
/// `pull`, `push`, and `regr` are already scaled by their weights; `total` is their sum with
/// `focal`.
#[derive(Debug, Clone)]
pub struct LossComponents<B: Backend> {
    pub total: Tensor<B, 1>,
    pub focal: Tensor<B, 1>,
    pub pull: Tensor<B, 1>,
    pub push: Tensor<B, 1>,
    pub regr: Tensor<B, 1>,
}

impl<B: Backend> LossComponents<B> {
    pub fn detach(self) -> Self {
        Self {
            total: self.total.detach(),
            focal: self.focal.detach(),
            pull: self.pull.detach(),
            push: self.push.detach(),
            regr: self.regr.detach(),
        }
    }

    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            total: self.total.to_device(device),
            focal: self.focal.to_device(device),
            pull: self.pull.to_device(device),
            push: self.push.to_device(device),
            regr: self.regr.to_device(device),
        }
    }

    /// Mean of every component over its (device) dimension.
    pub fn mean(self) -> Self {
        Self {
            total: self.total.mean(),
            focal: self.focal.mean(),
            pull: self.pull.mean(),
            push: self.push.mean(),
            regr: self.regr.mean(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeypointLoss {
    pub pull_weight: f32,
    pub push_weight: f32,
    pub regr_weight: f32,
}

impl Default for KeypointLoss {
    fn default() -> Self {
        Self {
            pull_weight: 0.1,
            push_weight: 0.1,
            regr_weight: 1.0,
        }
    }
}

const EPS: f32 = 1e-4;

impl KeypointLoss {
    pub fn forward<B: Backend>(
        &self,
        preds: KeypointOutputs<B>,
        targets: KeypointTargets<B>,
    ) -> LossComponents<B> {
        let focal = focal_loss(preds.tl_heats, targets.tl_heatmaps)
            + focal_loss(preds.br_heats, targets.br_heatmaps)
            + focal_loss(preds.ct_heats, targets.ct_heatmaps);

        let tl_tags = gather_slots(preds.tl_tags, targets.tl_inds.clone());
        let br_tags = gather_slots(preds.br_tags, targets.br_inds.clone());
        let (pull, push) = embedding_loss(tl_tags, br_tags, targets.tag_mask.clone());

        let regr = regr_loss(
            gather_slots(preds.tl_regrs, targets.tl_inds),
            targets.tl_regrs,
            targets.tag_mask.clone(),
        ) + regr_loss(
            gather_slots(preds.br_regrs, targets.br_inds),
            targets.br_regrs,
            targets.tag_mask.clone(),
        ) + regr_loss(
            gather_slots(preds.ct_regrs, targets.ct_inds),
            targets.ct_regrs,
            targets.tag_mask,
        );

        let pull = pull.mul_scalar(self.pull_weight);
        let push = push.mul_scalar(self.push_weight);
        let regr = regr.mul_scalar(self.regr_weight);
        let total = focal.clone() + pull.clone() + push.clone() + regr.clone();
        LossComponents {
            total,
            focal,
            pull,
            push,
            regr,
        }
    }
}

/// Penalty-reduced focal loss over sigmoid heatmaps, normalized by the number of peaks.
fn focal_loss<B: Backend>(logits: Tensor<B, 4>, gt: Tensor<B, 4>) -> Tensor<B, 1> {
    let pred = sigmoid(logits).clamp(EPS, 1.0 - EPS);
    let pos = gt.clone().equal_elem(1.0).float();
    let neg = gt.clone().lower_elem(1.0).float();
    let neg_weights = gt.neg().add_scalar(1.0).powf_scalar(4.0);
    let one_minus = pred.clone().neg().add_scalar(1.0);

    let pos_loss = (pred.clone().log() * one_minus.clone().powf_scalar(2.0) * pos.clone()).sum();
    let neg_loss = (one_minus.log() * pred.powf_scalar(2.0) * neg_weights * neg).sum();
    // With no peaks the positive term is zero and this reduces to the plain negative term.
    let num_pos = pos.sum().clamp_min(1.0);
    (pos_loss + neg_loss).neg() / num_pos
}

/// Values of `map` at flattened spatial positions: `[batch, c, h, w]` x `[batch, k]` -> `[batch, k, c]`.
fn gather_slots<B: Backend>(map: Tensor<B, 4>, inds: Tensor<B, 2, Int>) -> Tensor<B, 3> {
    let [batch, channels, height, width] = map.dims();
    let slots = inds.dims()[1];
    let flat = map.reshape([batch, channels, height * width]);
    let index = inds.unsqueeze_dim::<3>(1).expand([batch, channels, slots]);
    flat.gather(2, index).swap_dims(1, 2)
}

/// Associative-embedding pull/push terms for paired corner tags (`[batch, k, 1]` each).
fn embedding_loss<B: Backend>(
    tl: Tensor<B, 3>,
    br: Tensor<B, 3>,
    mask: Tensor<B, 2>,
) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let [batch, slots, _] = tl.dims();
    let tl = tl.reshape([batch, slots]);
    let br = br.reshape([batch, slots]);
    let num = mask.clone().sum_dim(1); // [batch, 1]

    let mean = (tl.clone() + br.clone()).div_scalar(2.0);
    let spread = (tl - mean.clone()).powf_scalar(2.0) + (br - mean.clone()).powf_scalar(2.0);
    let pull = (spread / num.clone().add_scalar(EPS) * mask.clone()).sum();

    let pair_mask = (mask.clone().unsqueeze_dim::<3>(1) + mask.unsqueeze_dim::<3>(2))
        .equal_elem(2.0)
        .float();
    let num = num.unsqueeze_dim::<3>(2); // [batch, 1, 1]
    let pairs = num.clone().sub_scalar(1.0) * num.clone();
    let dist = mean.clone().unsqueeze_dim::<3>(1) - mean.unsqueeze_dim::<3>(2);
    let dist = relu(dist.abs().neg().add_scalar(1.0));
    // The diagonal contributes exactly one per object; remove it before normalizing.
    let dist = dist - num.add_scalar(EPS).recip();
    let push = (dist / pairs.add_scalar(EPS) * pair_mask).sum();
    (pull, push)
}

/// Masked smooth-L1 between gathered offsets and targets (`[batch, k, 2]`).
fn regr_loss<B: Backend>(
    pred: Tensor<B, 3>,
    gt: Tensor<B, 3>,
    mask: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let num = mask.clone().sum().add_scalar(EPS);
    let mask = mask.unsqueeze_dim::<3>(2);
    let diff = (pred - gt).abs();
    let small = diff.clone().lower_elem(1.0).float();
    let smooth = small.clone() * diff.clone().powf_scalar(2.0).mul_scalar(0.5)
        + small.neg().add_scalar(1.0) * diff.sub_scalar(0.5);
    (smooth * mask).sum() / num
}
