use std::sync::Arc;

use log::warn;

use crate::{
    collective::{Collective, ReduceOp},
    config::BatchConfig,
    error::{BatchErr, Result},
    vector::Vector,
};

/// The operations a stochastic optimization algorithm needs from the
/// communication layer.
///
/// Every asynchronous method is a collective: all the batches of the group
/// must call it the same amount of times and in the same order. Only
/// `sum_all_vec` depends on the vector representation, every other operation
/// is a pass-through to the underlying collective provider.
#[allow(unused)]
#[trait_variant::make(BatchManager: Send)]
pub trait BatchManagerTemplate: Sync {
    /// The vector representation this manager reduces.
    type Vector: Vector;

    /// Returns the index of the batch handled by this worker.
    fn batch_id(&self) -> usize;

    /// Returns the amount of batches, one per worker.
    fn num_batches(&self) -> usize;

    /// Sums `input` element-wise across every batch into `output`.
    ///
    /// # Returns
    /// A `DimensionMismatch` if the buffers differ in length.
    async fn sum_all(&self, input: &[f32], output: &mut [f32]) -> Result<()>;

    /// Sums a scalar across every batch.
    ///
    /// # Returns
    /// The sum of `value` over all batches.
    async fn sum_scalar(&self, value: f32) -> Result<f32>;

    /// Reduces `input` element-wise across every batch into `output` with `op`.
    async fn reduce_all(&self, input: &[f32], output: &mut [f32], op: ReduceOp) -> Result<()>;

    /// Overwrites `buf` on every batch with its contents on batch `root`.
    async fn broadcast(&self, buf: &mut [f32], root: usize) -> Result<()>;

    /// Waits until every batch reaches this point.
    async fn barrier(&self) -> Result<()>;

    /// Sums `input` element-wise across every batch into `output`.
    ///
    /// Both vectors are validated locally before anything is sent, a failed
    /// validation leaves `output` untouched.
    ///
    /// # Arguments
    /// * `input` - This batch's contribution.
    /// * `output` - Where to write the sum, must already have the dimension of `input`.
    ///
    /// # Returns
    /// A `DimensionMismatch` if the dimensions differ, a `RepresentationMismatch`
    /// if a vector doesn't expose the expected storage, or the provider's failure.
    async fn sum_all_vec(&self, input: &Self::Vector, output: &mut Self::Vector) -> Result<()>;
}

/// The representation agnostic part of a batch manager.
///
/// Wraps a shared collective provider and implements every pass-through
/// operation once, the typed adapters compose it.
#[derive(Debug)]
pub struct CollectiveBatch<C> {
    comm: Arc<C>,
    config: BatchConfig,
}

impl<C> Clone for CollectiveBatch<C> {
    fn clone(&self) -> Self {
        Self {
            comm: Arc::clone(&self.comm),
            config: self.config,
        }
    }
}

impl<C: Collective> CollectiveBatch<C> {
    /// Creates a new `CollectiveBatch`.
    ///
    /// # Arguments
    /// * `comm` - The collective provider of the group.
    /// * `config` - The manager's configuration.
    pub fn new(comm: Arc<C>, config: BatchConfig) -> Self {
        Self { comm, config }
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn batch_id(&self) -> usize {
        self.comm.rank()
    }

    pub fn num_batches(&self) -> usize {
        self.comm.size()
    }

    pub async fn sum_all(&self, input: &[f32], output: &mut [f32]) -> Result<()> {
        self.reduce_all(input, output, ReduceOp::Sum).await
    }

    pub async fn sum_scalar(&self, value: f32) -> Result<f32> {
        let mut out = [0.];
        self.comm.reduce_all(&[value], &mut out, ReduceOp::Sum).await?;
        Ok(out[0])
    }

    pub async fn reduce_all(&self, input: &[f32], output: &mut [f32], op: ReduceOp) -> Result<()> {
        if input.len() != output.len() {
            warn!(
                batch_id = self.batch_id(), input = input.len(), output = output.len();
                "rejecting {op} reduction"
            );

            return Err(BatchErr::DimensionMismatch {
                input: input.len(),
                output: output.len(),
            });
        }

        self.comm.reduce_all(input, output, op).await?;
        Ok(())
    }

    pub async fn broadcast(&self, buf: &mut [f32], root: usize) -> Result<()> {
        self.comm.broadcast(buf, root).await?;
        Ok(())
    }

    pub async fn barrier(&self) -> Result<()> {
        self.comm.barrier().await?;
        Ok(())
    }

    /// Checks that every batch of the group is about to reduce vectors of the same shape.
    ///
    /// Does nothing unless `verify_agreement` is on. When it is, every batch must call
    /// it, including the ones whose local validation failed, so the group never hangs
    /// waiting on a batch that already gave up. Every batch sees the same reduced
    /// signature, so either all of them pass or all of them fail.
    ///
    /// # Arguments
    /// * `local` - The validated local shape, `None` if local validation failed. The
    ///   first value is the dimension, the rest describe the block layout.
    ///
    /// # Returns
    /// A `PeerValidationFailed` if another batch failed its local validation, a
    /// `DimensionDisagreement` if the dimensions differ across the group or a
    /// `BlockLayoutDisagreement` if only the layout differs.
    pub async fn agree<const N: usize>(&self, local: Option<[usize; N]>) -> Result<()> {
        if !self.config.verify_agreement {
            return Ok(());
        }

        let mut signature = encode_signature(&local.unwrap_or([0; N]));
        signature.push(if local.is_some() { 0. } else { 1. });

        let mut group = vec![0.; signature.len()];
        self.comm
            .reduce_all(&signature, &mut group, ReduceOp::Max)
            .await?;

        let peer_failed = group.pop().is_some_and(|failed| failed > 0.);
        let Some(local) = local else {
            return Ok(());
        };

        let batch_id = self.batch_id();
        if peer_failed {
            warn!(batch_id = batch_id; "a peer rejected its vectors");
            return Err(BatchErr::PeerValidationFailed);
        }

        let (maxs, neg_mins) = group.split_at(group.len() / 2);
        if N > 0 && !limbs_agree(&[maxs[0], maxs[1], neg_mins[0], neg_mins[1]]) {
            let dim = local[0];
            let (min, max) = self.dimension_range(dim, maxs[0], -neg_mins[0]).await?;
            warn!(
                batch_id = batch_id, local = dim, min = min, max = max;
                "batches disagree on the dimension"
            );
            return Err(BatchErr::DimensionDisagreement {
                local: dim,
                min,
                max,
            });
        }

        if !limbs_agree(&group) {
            warn!(batch_id = batch_id; "batches disagree on the block layout");
            return Err(BatchErr::BlockLayoutDisagreement);
        }

        Ok(())
    }

    /// Checks that every batch splits its vectors in blocks of the same lengths.
    ///
    /// Must only be called once `agree` passed on the block count, so every batch
    /// sends a signature of the same length.
    ///
    /// # Returns
    /// A `BlockLayoutDisagreement` if any block length differs across the group.
    pub async fn agree_layout(&self, blocks: &[usize]) -> Result<()> {
        if !self.config.verify_agreement {
            return Ok(());
        }

        let signature = encode_signature(blocks);
        let mut group = vec![0.; signature.len()];
        self.comm
            .reduce_all(&signature, &mut group, ReduceOp::Max)
            .await?;

        if !limbs_agree(&group) {
            warn!(batch_id = self.batch_id(); "batches disagree on the block layout");
            return Err(BatchErr::BlockLayoutDisagreement);
        }

        Ok(())
    }

    /// Recovers the exact smallest and largest dimension of the group.
    ///
    /// Only the high limbs of the extremes are known after `agree`, the batches
    /// holding them contribute their low limbs in one more reduction.
    async fn dimension_range(
        &self,
        dim: usize,
        hi_max: f32,
        hi_min: f32,
    ) -> Result<(usize, usize)> {
        let [hi, lo] = limbs(dim);
        let signature = [
            if hi == hi_max { lo } else { -1. },
            if hi == hi_min { -lo } else { f32::MIN },
        ];

        let mut group = [0.; 2];
        self.comm
            .reduce_all(&signature, &mut group, ReduceOp::Max)
            .await?;

        let join = |hi: f32, lo: f32| ((hi as usize) << LIMB_BITS) | lo as usize;
        Ok((join(hi_min, -group[1]), join(hi_max, group[0])))
    }
}

const LIMB_BITS: u32 = 24;
const LIMB_MASK: usize = (1 << LIMB_BITS) - 1;

/// Splits `value` in two limbs small enough to be exact as `f32`.
///
/// Exact for values below 2^48.
fn limbs(value: usize) -> [f32; 2] {
    [(value >> LIMB_BITS) as f32, (value & LIMB_MASK) as f32]
}

/// Lays out `[limbs(v)..., -limbs(v)...]`, a `Max` reduction of it yields the
/// group's maximum limbs followed by the negated minimum limbs.
fn encode_signature(values: &[usize]) -> Vec<f32> {
    let parts: Vec<f32> = values.iter().flat_map(|&v| limbs(v)).collect();
    parts.iter().copied().chain(parts.iter().map(|x| -x)).collect()
}

/// Returns whether every maximum of a reduced signature equals its minimum.
fn limbs_agree(group: &[f32]) -> bool {
    let (max, neg_min) = group.split_at(group.len() / 2);
    max.iter().zip(neg_min).all(|(max, neg_min)| *max == -neg_min)
}
