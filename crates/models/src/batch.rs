//! Batch types consumed by the keypoint network and its loss.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

/// A batch that can be cut along its leading dimension and moved between devices.
pub trait Scatter<B: Backend>: Sized {
    /// Number of items along the batch dimension.
    fn batch_size(&self) -> usize;

    /// Items `offset..offset + len` of the batch.
    fn narrow_batch(&self, offset: usize, len: usize) -> Self;

    fn to_device(self, device: &B::Device) -> Self;
}

#[derive(Debug, Clone)]
pub struct KeypointInputs<B: Backend> {
    /// Images in NCHW layout.
    pub images: Tensor<B, 4>,
}

/// Ground truth for corner/center keypoints.
///
/// Heatmaps share the spatial size of the network output (`[batch, classes, h, w]`).
/// Index tensors address flattened `h * w` positions, one slot per object (`[batch, max_objects]`);
/// `tag_mask` marks which slots hold a real object.
#[derive(Debug, Clone)]
pub struct KeypointTargets<B: Backend> {
    pub tl_heatmaps: Tensor<B, 4>,
    pub br_heatmaps: Tensor<B, 4>,
    pub ct_heatmaps: Tensor<B, 4>,
    pub tl_inds: Tensor<B, 2, Int>,
    pub br_inds: Tensor<B, 2, Int>,
    pub ct_inds: Tensor<B, 2, Int>,
    pub tag_mask: Tensor<B, 2>,
    /// Sub-pixel offsets per object slot (`[batch, max_objects, 2]`).
    pub tl_regrs: Tensor<B, 3>,
    pub br_regrs: Tensor<B, 3>,
    pub ct_regrs: Tensor<B, 3>,
}

impl<B: Backend> Scatter<B> for KeypointInputs<B> {
    fn batch_size(&self) -> usize {
        self.images.dims()[0]
    }

    fn narrow_batch(&self, offset: usize, len: usize) -> Self {
        Self {
            images: self.images.clone().narrow(0, offset, len),
        }
    }

    fn to_device(self, device: &B::Device) -> Self {
        Self {
            images: self.images.to_device(device),
        }
    }
}

impl<B: Backend> Scatter<B> for KeypointTargets<B> {
    fn batch_size(&self) -> usize {
        self.tl_heatmaps.dims()[0]
    }

    fn narrow_batch(&self, offset: usize, len: usize) -> Self {
        Self {
            tl_heatmaps: self.tl_heatmaps.clone().narrow(0, offset, len),
            br_heatmaps: self.br_heatmaps.clone().narrow(0, offset, len),
            ct_heatmaps: self.ct_heatmaps.clone().narrow(0, offset, len),
            tl_inds: self.tl_inds.clone().narrow(0, offset, len),
            br_inds: self.br_inds.clone().narrow(0, offset, len),
            ct_inds: self.ct_inds.clone().narrow(0, offset, len),
            tag_mask: self.tag_mask.clone().narrow(0, offset, len),
            tl_regrs: self.tl_regrs.clone().narrow(0, offset, len),
            br_regrs: self.br_regrs.clone().narrow(0, offset, len),
            ct_regrs: self.ct_regrs.clone().narrow(0, offset, len),
        }
    }

    fn to_device(self, device: &B::Device) -> Self {
        Self {
            tl_heatmaps: self.tl_heatmaps.to_device(device),
            br_heatmaps: self.br_heatmaps.to_device(device),
            ct_heatmaps: self.ct_heatmaps.to_device(device),
            tl_inds: self.tl_inds.to_device(device),
            br_inds: self.br_inds.to_device(device),
            ct_inds: self.ct_inds.to_device(device),
            tag_mask: self.tag_mask.to_device(device),
            tl_regrs: self.tl_regrs.to_device(device),
            br_regrs: self.br_regrs.to_device(device),
            ct_regrs: self.ct_regrs.to_device(device),
        }
    }
}
