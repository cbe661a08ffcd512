mod common;

use burn::tensor::ElementConversion;
use common::{batch, ADBackend, InnerBackend};
use models::Scatter;
use training::parallel::gather;
use training::{DataParallel, ModelRegistry, Network, NnetError};

fn tiny_network<B: burn::tensor::backend::Backend>(device: &B::Device) -> Network<B> {
    let entry = ModelRegistry::with_defaults()
        .resolve("CenterNet-tiny")
        .unwrap();
    let (model, loss) = entry.build::<B>(device).unwrap();
    Network::new(model, loss)
}

#[test]
fn forward_gathers_one_loss_per_device() {
    let device = Default::default();
    let network = tiny_network::<InnerBackend>(&device);
    let dp = DataParallel::new(vec![device.clone(); 3], vec![1, 2, 1]).unwrap();

    let (xs, ys) = batch::<InnerBackend>(4, &device);
    let losses = dp.forward(&network, xs, ys).unwrap();
    assert_eq!(losses.total.dims(), [3]);
    assert_eq!(losses.regr.dims(), [3]);
}

#[test]
fn gathered_losses_keep_device_order() {
    let device = Default::default();
    let network = tiny_network::<InnerBackend>(&device);
    let dp = DataParallel::new(vec![device.clone(); 2], vec![1, 3]).unwrap();
    let (xs, ys) = batch::<InnerBackend>(4, &device);

    let parallel = dp
        .forward(&network, xs.clone(), ys.clone())
        .unwrap()
        .total
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    let first = network
        .forward(xs.narrow_batch(0, 1), ys.narrow_batch(0, 1))
        .total
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert_eq!(parallel.len(), 2);
    assert!((parallel[0] - first[0]).abs() < 1e-5);

    let regathered = gather(
        vec![
            network.forward(xs.narrow_batch(0, 1), ys.narrow_batch(0, 1)),
            network.forward(xs.narrow_batch(1, 3), ys.narrow_batch(1, 3)),
        ],
        &device,
    );
    let regathered = regathered.total.into_data().to_vec::<f32>().unwrap();
    assert!((parallel[1] - regathered[1]).abs() < 1e-5);
}

#[test]
fn train_step_accumulates_on_primary() {
    let device = Default::default();
    let network = tiny_network::<ADBackend>(&device);
    let dp = DataParallel::new(vec![device.clone(); 2], vec![2, 2]).unwrap();

    let (xs, ys) = batch::<ADBackend>(4, &device);
    let step = dp.train_step(&network, xs, ys).unwrap();
    assert_eq!(step.losses.total.dims(), [2]);
    let total = step.losses.total.mean().into_scalar().elem::<f32>();
    assert!(total.is_finite());
}

#[test]
fn mismatched_batches_are_rejected() {
    let device = Default::default();
    let network = tiny_network::<InnerBackend>(&device);
    let dp = DataParallel::new(vec![device.clone(); 2], vec![2, 2]).unwrap();

    let (xs, _) = batch::<InnerBackend>(4, &device);
    let (_, ys) = batch::<InnerBackend>(3, &device);
    assert!(matches!(
        dp.forward(&network, xs, ys),
        Err(NnetError::BatchMismatch {
            inputs: 4,
            targets: 3
        })
    ));

    let (xs, ys) = batch::<InnerBackend>(5, &device);
    assert!(matches!(
        dp.forward(&network, xs, ys),
        Err(NnetError::ChunkMismatch { sum: 4, batch: 5, .. })
    ));
}
