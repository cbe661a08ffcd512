#![allow(dead_code)]

use std::path::Path;

use burn::backend::{ndarray::NdArray, Autodiff};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use models::{KeypointInputs, KeypointTargets};
use training::{ModelRegistry, NetworkFactory, OptimizerKind, SystemConfig};

pub type InnerBackend = NdArray<f32>;
pub type ADBackend = Autodiff<InnerBackend>;

pub const SIDE: usize = 8;
const SLOTS: usize = 2;

/// Config for the tiny model with every snapshot under `cache`.
pub fn tiny_config(cache: &Path, opt: OptimizerKind, chunk_sizes: Vec<usize>) -> SystemConfig {
    let batch = chunk_sizes.iter().sum();
    let mut cfg = SystemConfig::new("CenterNet-tiny", opt, batch);
    cfg.chunk_sizes = chunk_sizes;
    cfg.learning_rate = 1e-2;
    cfg.cache_dir = cache.to_path_buf();
    cfg.snapshot_file = cache
        .join("nnet/CenterNet-tiny/CenterNet-tiny_{}.safetensors")
        .to_string_lossy()
        .into_owned();
    cfg
}

pub fn factory(cfg: SystemConfig) -> NetworkFactory<ADBackend> {
    let devices = vec![Default::default(); cfg.chunk_sizes.len()];
    NetworkFactory::new(cfg, &ModelRegistry::with_defaults(), devices).unwrap()
}

fn float<B: Backend, const D: usize>(
    values: Vec<f32>,
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    Tensor::from_data(TensorData::new(values, shape), device)
}

fn int<B: Backend>(values: Vec<i64>, shape: [usize; 2], device: &B::Device) -> Tensor<B, 2, Int> {
    Tensor::from_data(TensorData::new(values, shape), device)
}

fn heatmap<B: Backend>(peaks: &[usize], device: &B::Device) -> Tensor<B, 4> {
    let mut values = vec![0.0f32; peaks.len() * SIDE * SIDE];
    for (item, &peak) in peaks.iter().enumerate() {
        values[item * SIDE * SIDE + peak] = 1.0;
    }
    float(values, [peaks.len(), 1, SIDE, SIDE], device)
}

/// `n` 8x8 images with one object each; the second object slot is padding.
pub fn batch<B: Backend>(n: usize, device: &B::Device) -> (KeypointInputs<B>, KeypointTargets<B>) {
    let pixels: Vec<f32> = (0..n * 3 * SIDE * SIDE)
        .map(|i| ((i * 37) % 101) as f32 / 101.0)
        .collect();
    let images = float(pixels, [n, 3, SIDE, SIDE], device);

    let tl: Vec<usize> = (0..n).map(|i| (9 + 5 * i) % 27).collect();
    let br: Vec<usize> = tl.iter().map(|p| p + 27).collect();
    let ct: Vec<usize> = tl.iter().map(|p| p + 18).collect();
    let slots = |peaks: &[usize]| {
        let values = peaks.iter().flat_map(|&p| [p as i64, 0]).collect();
        int(values, [n, SLOTS], device)
    };
    let mask = float((0..n).flat_map(|_| [1.0, 0.0]).collect(), [n, SLOTS], device);
    let regrs = |offset: f32| {
        let values = (0..n)
            .flat_map(|_| [offset, 1.0 - offset, 0.0, 0.0])
            .collect();
        float(values, [n, SLOTS, 2], device)
    };

    let targets = KeypointTargets {
        tl_heatmaps: heatmap(&tl, device),
        br_heatmaps: heatmap(&br, device),
        ct_heatmaps: heatmap(&ct, device),
        tl_inds: slots(&tl),
        br_inds: slots(&br),
        ct_inds: slots(&ct),
        tag_mask: mask,
        tl_regrs: regrs(0.25),
        br_regrs: regrs(0.5),
        ct_regrs: regrs(0.75),
    };
    (KeypointInputs { images }, targets)
}

/// The same batch stacked twice along the batch dimension.
pub fn doubled<B: Backend>(
    xs: KeypointInputs<B>,
    ys: KeypointTargets<B>,
) -> (KeypointInputs<B>, KeypointTargets<B>) {
    macro_rules! twice {
        ($t:expr) => {{
            let t = $t;
            Tensor::cat(vec![t.clone(), t], 0)
        }};
    }
    let targets = KeypointTargets {
        tl_heatmaps: twice!(ys.tl_heatmaps),
        br_heatmaps: twice!(ys.br_heatmaps),
        ct_heatmaps: twice!(ys.ct_heatmaps),
        tl_inds: twice!(ys.tl_inds),
        br_inds: twice!(ys.br_inds),
        ct_inds: twice!(ys.ct_inds),
        tag_mask: twice!(ys.tag_mask),
        tl_regrs: twice!(ys.tl_regrs),
        br_regrs: twice!(ys.br_regrs),
        ct_regrs: twice!(ys.ct_regrs),
    };
    (
        KeypointInputs {
            images: twice!(xs.images),
        },
        targets,
    )
}
