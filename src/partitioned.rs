use std::{marker::PhantomData, sync::Arc};

use log::{debug, warn};

use crate::{
    collective::{Collective, ReduceOp},
    config::BatchConfig,
    error::{BatchErr, Result},
    manager::{BatchManager, CollectiveBatch},
    typed::storage_views,
    vector::{Contiguous, PartitionedVector, Vector},
};

/// A batch manager for partitioned vectors whose blocks are the contiguous representation `V`.
///
/// Each block is reduced with its own collective call, in block order. Every
/// block is validated before the first call is issued, so a bad block never
/// leaves the output half reduced.
#[derive(Debug)]
pub struct PartitionedBatchManager<C, V> {
    base: CollectiveBatch<C>,
    _repr: PhantomData<fn(V)>,
}

impl<C, V> Clone for PartitionedBatchManager<C, V> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            _repr: PhantomData,
        }
    }
}

impl<C: Collective, V: Contiguous> PartitionedBatchManager<C, V> {
    /// Creates a new `PartitionedBatchManager` with the default configuration.
    ///
    /// # Arguments
    /// * `comm` - The collective provider of the group.
    pub fn new(comm: Arc<C>) -> Self {
        Self::with_config(comm, BatchConfig::default())
    }

    /// Creates a new `PartitionedBatchManager`.
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

type BlockViews<'a> = Vec<(&'a [f32], &'a mut [f32])>;

/// Validates two partitioned vectors block by block.
///
/// # Returns
/// The storage views of every pair of blocks, or the first validation failure.
fn block_views<'a, V: Contiguous>(
    input: &'a PartitionedVector<V>,
    output: &'a mut PartitionedVector<V>,
) -> Result<BlockViews<'a>> {
    let (dim_i, dim_o) = (input.dimension(), output.dimension());
    if dim_i != dim_o {
        return Err(BatchErr::DimensionMismatch {
            input: dim_i,
            output: dim_o,
        });
    }

    if input.num_blocks() != output.num_blocks() {
        return Err(BatchErr::BlockCountMismatch {
            input: input.num_blocks(),
            output: output.num_blocks(),
        });
    }

    input
        .blocks()
        .iter()
        .zip(output.blocks_mut())
        .enumerate()
        .map(|(block, (src, dst))| {
            storage_views(src, dst).map_err(|e| match e {
                BatchErr::DimensionMismatch { input, output } => {
                    BatchErr::BlockDimensionMismatch {
                        block,
                        input,
                        output,
                    }
                }
                other => other,
            })
        })
        .collect()
}

impl<C, V> BatchManager for PartitionedBatchManager<C, V>
where
    C: Collective,
    V: Contiguous + Send + Sync,
{
    type Vector = PartitionedVector<V>;

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

    async fn sum_all_vec(
        &self,
        input: &PartitionedVector<V>,
        output: &mut PartitionedVector<V>,
    ) -> Result<()> {
        let batch_id = self.base.batch_id();
        let dim = input.dimension();
        let views = block_views(input, output);

        self.base
            .agree(views.is_ok().then_some([dim, input.num_blocks()]))
            .await?;

        let views = views.inspect_err(|e| {
            warn!(batch_id = batch_id; "rejecting partitioned vector sum: {e}")
        })?;

        // Every batch reaches this point only if the whole group agreed on the block count.
        let layout: Vec<usize> = views.iter().map(|(src, _)| src.len()).collect();
        self.base.agree_layout(&layout).await?;

        debug!(
            batch_id = batch_id, len = dim, blocks = views.len();
            "summing partitioned vector across batches"
        );
        for (src, dst) in views {
            self.base
                .comm()
                .reduce_all(src, dst, ReduceOp::Sum)
                .await?;
        }

        Ok(())
    }
}
