use std::{marker::PhantomData, sync::Arc};

use log::{debug, warn};

use crate::{
    collective::{Collective, ReduceOp},
    config::BatchConfig,
    error::{BatchErr, Result},
    manager::{BatchManager, CollectiveBatch},
    vector::Contiguous,
};

/// A batch manager for one contiguous vector representation `V`.
///
/// The representation is fixed when the manager is built, so the hot path
/// only needs to look at the lengths before handing the raw storage of both
/// vectors to the collective provider.
#[derive(Debug)]
pub struct TypedBatchManager<C, V> {
    base: CollectiveBatch<C>,
    _repr: PhantomData<fn(V)>,
}

impl<C, V> Clone for TypedBatchManager<C, V> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            _repr: PhantomData,
        }
    }
}

impl<C: Collective, V: Contiguous> TypedBatchManager<C, V> {
    /// Creates a new `TypedBatchManager` with the default configuration.
    ///
    /// # Arguments
    /// * `comm` - The collective provider of the group.
    pub fn new(comm: Arc<C>) -> Self {
        Self::with_config(comm, BatchConfig::default())
    }

    /// Creates a new `TypedBatchManager`.
    ///
    /// # Arguments
    /// * `comm` - The collective provider of the group.
    /// * `config` - The manager's configuration.
    pub fn with_config(comm: Arc<C>, config: BatchConfig) -> Self {
        Self {
            base: CollectiveBatch::new(comm, config),
            _repr: PhantomData,
        }
    }

    pub fn base(&self) -> &CollectiveBatch<C> {
        &self.base
    }
}

/// Resolves the storage of both vectors and checks they have the same length.
///
/// # Returns
/// The storage views, or the first validation failure.
pub(crate) fn storage_views<'a, V: Contiguous>(
    input: &'a V,
    output: &'a mut V,
) -> Result<(&'a [f32], &'a mut [f32])> {
    let src = input
        .storage()
        .ok_or(BatchErr::RepresentationMismatch { side: "input" })?;
    let dst = output
        .storage_mut()
        .ok_or(BatchErr::RepresentationMismatch { side: "output" })?;

    if src.len() != dst.len() {
        return Err(BatchErr::DimensionMismatch {
            input: src.len(),
            output: dst.len(),
        });
    }

    Ok((src, dst))
}

impl<C, V> BatchManager for TypedBatchManager<C, V>
where
    C: Collective,
    V: Contiguous + Send + Sync,
{
    type Vector = V;

    fn batch_id(&self) -> usize {
        self.base.batch_id()
    }

    fn num_batches(&self) -> usize {
        self.base.num_batches()
    }

    async fn sum_all(&self, input: &[f32], output: &mut [f32]) -> Result<()> {
        self.base.sum_all(input, output).await
    }

    async fn sum_scalar(&self, value: f32) -> Result<f32> {
        self.base.sum_scalar(value).await
    }

    async fn reduce_all(&self, input: &[f32], output: &mut [f32], op: ReduceOp) -> Result<()> {
        self.base.reduce_all(input, output, op).await
    }

    async fn broadcast(&self, buf: &mut [f32], root: usize) -> Result<()> {
        self.base.broadcast(buf, root).await
    }

    async fn barrier(&self) -> Result<()> {
        self.base.barrier().await
    }

    async fn sum_all_vec(&self, input: &V, output: &mut V) -> Result<()> {
        let batch_id = self.base.batch_id();
        let views = storage_views(input, output);

        self.base
            .agree(views.as_ref().ok().map(|(src, _)| [src.len()]))
            .await?;

        let (src, dst) =
            views.inspect_err(|e| warn!(batch_id = batch_id; "rejecting vector sum: {e}"))?;

        debug!(batch_id = batch_id, len = src.len(); "summing vector across batches");
        self.base
            .comm()
            .reduce_all(src, dst, ReduceOp::Sum)
            .await?;

        Ok(())
    }
}
