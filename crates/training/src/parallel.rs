//! Data-parallel execution with explicit, possibly uneven, per-device chunk sizes.
//!
//! A batch is cut into one [`Shard`] per device, the network is replicated onto every device,
//! each replica runs on its own thread, and per-device loss values are gathered on the primary
//! (first) device. During training each replica also runs its backward pass and the gradients
//! are accumulated on the primary device.

use std::thread;

use burn::optim::{GradientsAccumulator, GradientsParams};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use models::{KeypointInputs, KeypointTargets, LossComponents, Scatter};
use tracing::debug;

use crate::error::{NnetError, NnetResult};
use crate::network::Network;

/// Attribute the data-parallel wrapper nests the network under in parameter names.
pub const REPLICA_ATTR: &str = "module";

/// One contiguous slice of the batch assigned to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    pub device_index: usize,
    /// First item (inclusive).
    pub offset: usize,
    pub len: usize,
}

/// Lays `chunk_sizes` end to end over a batch of `batch` items.
pub fn plan_shards(batch: usize, chunk_sizes: &[usize]) -> NnetResult<Vec<Shard>> {
    if chunk_sizes.is_empty() || chunk_sizes.contains(&0) {
        return Err(NnetError::Config(format!(
            "chunk_sizes must be non-empty and positive, got {chunk_sizes:?}"
        )));
    }
    let sum: usize = chunk_sizes.iter().sum();
    if sum != batch {
        return Err(NnetError::ChunkMismatch {
            chunks: chunk_sizes.to_vec(),
            sum,
            batch,
        });
    }
    let mut offset = 0;
    Ok(chunk_sizes
        .iter()
        .enumerate()
        .map(|(device_index, &len)| {
            let shard = Shard {
                device_index,
                offset,
                len,
            };
            offset += len;
            shard
        })
        .collect())
}

/// Cuts `batch` along `shards` and moves each piece to its device.
pub fn scatter<B: Backend, T: Scatter<B>>(
    batch: &T,
    shards: &[Shard],
    devices: &[B::Device],
) -> Vec<T> {
    shards
        .iter()
        .map(|shard| {
            batch
                .narrow_batch(shard.offset, shard.len)
                .to_device(&devices[shard.device_index])
        })
        .collect()
}

/// Concatenates per-device losses on `device`; entry `k` of each component is replica `k`.
pub fn gather<B: Backend>(parts: Vec<LossComponents<B>>, device: &B::Device) -> LossComponents<B> {
    let parts: Vec<LossComponents<B>> = parts.into_iter().map(|p| p.to_device(device)).collect();
    let cat = |pick: fn(&LossComponents<B>) -> Tensor<B, 1>| {
        Tensor::cat(parts.iter().map(pick).collect(), 0)
    };
    LossComponents {
        total: cat(|p| p.total.clone()),
        focal: cat(|p| p.focal.clone()),
        pull: cat(|p| p.pull.clone()),
        push: cat(|p| p.push.clone()),
        regr: cat(|p| p.regr.clone()),
    }
}

fn join_replicas<T>(
    handles: Vec<thread::ScopedJoinHandle<'_, T>>,
    shards: &[Shard],
) -> NnetResult<Vec<T>> {
    // Join everything first so a panicked replica never goes unjoined.
    let joined: Vec<_> = handles.into_iter().map(|h| h.join()).collect();
    joined
        .into_iter()
        .zip(shards)
        .map(|(res, shard)| res.map_err(|_| NnetError::ReplicaFailed(shard.device_index)))
        .collect()
}

/// Result of one data-parallel training step.
pub struct ParallelStep<B: AutodiffBackend> {
    /// Detached per-device losses, one entry per replica.
    pub losses: LossComponents<B>,
    /// Gradients averaged over replicas, on the primary device.
    pub grads: GradientsParams,
}

/// Device placement for data-parallel execution.
#[derive(Debug, Clone)]
pub struct DataParallel<D> {
    devices: Vec<D>,
    chunk_sizes: Vec<usize>,
}

impl<D: Clone + Send + Sync> DataParallel<D> {
    pub fn new(devices: Vec<D>, chunk_sizes: Vec<usize>) -> NnetResult<Self> {
        if devices.len() != chunk_sizes.len() {
            return Err(NnetError::DeviceMismatch {
                devices: devices.len(),
                chunks: chunk_sizes.len(),
            });
        }
        let batch = chunk_sizes.iter().sum();
        plan_shards(batch, &chunk_sizes)?;
        Ok(Self {
            devices,
            chunk_sizes,
        })
    }

    /// Device that receives gathered outputs and accumulated gradients.
    pub fn primary(&self) -> &D {
        &self.devices[0]
    }

    pub fn devices(&self) -> &[D] {
        &self.devices
    }

    pub fn chunk_sizes(&self) -> &[usize] {
        &self.chunk_sizes
    }

    pub fn plan(&self, batch: usize) -> NnetResult<Vec<Shard>> {
        let shards = plan_shards(batch, &self.chunk_sizes)?;
        debug!(batch, ?shards, "planned shards");
        Ok(shards)
    }

    fn split<B: Backend<Device = D>>(
        &self,
        xs: &KeypointInputs<B>,
        ys: &KeypointTargets<B>,
    ) -> NnetResult<(Vec<Shard>, Vec<KeypointInputs<B>>, Vec<KeypointTargets<B>>)> {
        let (inputs, targets) = (xs.batch_size(), ys.batch_size());
        if inputs != targets {
            return Err(NnetError::BatchMismatch { inputs, targets });
        }
        let shards = self.plan(inputs)?;
        let xs = scatter::<B, _>(xs, &shards, &self.devices);
        let ys = scatter::<B, _>(ys, &shards, &self.devices);
        Ok((shards, xs, ys))
    }

    /// Forward-only pass: one replica per device, losses gathered on the primary device.
    pub fn forward<B: Backend<Device = D>>(
        &self,
        network: &Network<B>,
        xs: KeypointInputs<B>,
        ys: KeypointTargets<B>,
    ) -> NnetResult<LossComponents<B>> {
        let (shards, xs, ys) = self.split(&xs, &ys)?;
        let parts = thread::scope(|scope| {
            let handles: Vec<_> = shards
                .iter()
                .zip(xs)
                .zip(ys)
                .map(|((shard, x), y)| {
                    let replica = network
                        .clone()
                        .to_device(&self.devices[shard.device_index]);
                    scope.spawn(move || replica.forward(x, y))
                })
                .collect();
            join_replicas(handles, &shards)
        })?;
        Ok(gather(parts, self.primary()))
    }

    /// Forward and backward on every replica, then gradient accumulation on the primary device.
    ///
    /// Each replica scales its total loss by `1 / replicas` before backward, so the accumulated
    /// gradient is the gradient of the mean loss over devices.
    pub fn train_step<B: AutodiffBackend<Device = D>>(
        &self,
        network: &Network<B>,
        xs: KeypointInputs<B>,
        ys: KeypointTargets<B>,
    ) -> NnetResult<ParallelStep<B>> {
        let (shards, xs, ys) = self.split(&xs, &ys)?;
        let replicas = shards.len() as f64;
        let outputs = thread::scope(|scope| {
            let handles: Vec<_> = shards
                .iter()
                .zip(xs)
                .zip(ys)
                .map(|((shard, x), y)| {
                    let replica = network.clone().fork(&self.devices[shard.device_index]);
                    scope.spawn(move || {
                        let losses = replica.forward(x, y);
                        let grads = losses.total.clone().mean().div_scalar(replicas).backward();
                        let grads = GradientsParams::from_grads(grads, &replica.model.module);
                        (losses.detach(), grads)
                    })
                })
                .collect();
            join_replicas(handles, &shards)
        })?;

        let primary = self.primary();
        let module = &network.model.module;
        let mut accumulator = GradientsAccumulator::new();
        let mut parts = Vec::with_capacity(outputs.len());
        for (losses, grads) in outputs {
            accumulator.accumulate(module, grads.to_device(primary, module));
            parts.push(losses);
        }
        Ok(ParallelStep {
            losses: gather(parts, primary),
            grads: accumulator.grads(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shards_follow_uneven_chunks() {
        let shards = plan_shards(10, &[4, 3, 3]).unwrap();
        assert_eq!(
            shards,
            vec![
                Shard { device_index: 0, offset: 0, len: 4 },
                Shard { device_index: 1, offset: 4, len: 3 },
                Shard { device_index: 2, offset: 7, len: 3 },
            ]
        );
    }

    #[test]
    fn chunk_sum_must_equal_batch() {
        match plan_shards(9, &[4, 3, 3]) {
            Err(NnetError::ChunkMismatch { sum, batch, .. }) => {
                assert_eq!(sum, 10);
                assert_eq!(batch, 9);
            }
            other => panic!("expected chunk mismatch, got {other:?}"),
        }
    }

    #[test]
    fn empty_or_zero_chunks_are_rejected() {
        assert!(plan_shards(0, &[]).is_err());
        assert!(plan_shards(3, &[3, 0]).is_err());
    }

    #[test]
    fn device_count_must_match_chunks() {
        let err = DataParallel::new(vec![0u8, 1u8], vec![4]).unwrap_err();
        assert!(matches!(err, NnetError::DeviceMismatch { devices: 2, chunks: 1 }));
        let dp = DataParallel::new(vec![0u8, 1u8], vec![1, 3]).unwrap();
        assert_eq!(dp.plan(4).unwrap()[1].offset, 1);
        assert_eq!(*dp.primary(), 0u8);
    }
}
