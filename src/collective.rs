//! The seam towards the collective-communication provider.

use std::{fmt, io};

/// Element-wise reduction applied by `reduce_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

impl ReduceOp {
    /// Folds `x` into the accumulated value `acc`.
    pub fn apply(self, acc: f32, x: f32) -> f32 {
        match self {
            ReduceOp::Sum => acc + x,
            ReduceOp::Min => acc.min(x),
            ReduceOp::Max => acc.max(x),
        }
    }
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReduceOp::Sum => f.write_str("sum"),
            ReduceOp::Min => f.write_str("min"),
            ReduceOp::Max => f.write_str("max"),
        }
    }
}

/// A group of cooperating workers able to run collective operations.
///
/// Every operation is a synchronization point: all the workers of the group
/// must call it the same amount of times and in the same order, otherwise the
/// group deadlocks. Implementations own the transport, the batch manager only
/// borrows them.
#[allow(unused)]
#[trait_variant::make(Collective: Send)]
pub trait CollectiveTemplate: Sync {
    /// Returns the rank of this worker inside the group.
    fn rank(&self) -> usize;

    /// Returns the amount of workers in the group.
    fn size(&self) -> usize;

    /// Reduces `input` element-wise across every worker and writes the result in `output`.
    ///
    /// # Arguments
    /// * `input` - This worker's contribution.
    /// * `output` - Where to write the reduced values, must have the length of `input`.
    /// * `op` - The reduction to apply.
    ///
    /// # Returns
    /// An io error if the provider fails to communicate or the buffers are invalid.
    async fn reduce_all(&self, input: &[f32], output: &mut [f32], op: ReduceOp) -> io::Result<()>;

    /// Overwrites `buf` on every worker with the contents of `buf` on `root`.
    ///
    /// # Arguments
    /// * `buf` - The buffer to send on `root` and to receive into elsewhere.
    /// * `root` - The rank of the sending worker.
    async fn broadcast(&self, buf: &mut [f32], root: usize) -> io::Result<()>;

    /// Waits until every worker of the group reaches this point.
    async fn barrier(&self) -> io::Result<()>;
}
