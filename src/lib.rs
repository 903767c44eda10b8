//! Collective reductions for sample-average stochastic optimization.
//!
//! Every worker evaluates its own batch of samples and a `BatchManager`
//! sums the per-batch contributions across the whole group. The manager
//! validates the vectors locally and delegates the reduction to a
//! `Collective` provider.

pub mod collective;
pub mod config;
pub mod error;
pub mod local;
pub mod manager;
pub mod partitioned;
pub mod typed;
pub mod vector;

pub use collective::{Collective, ReduceOp};
pub use config::BatchConfig;
pub use error::{BatchErr, Result};
pub use manager::{BatchManager, CollectiveBatch};
pub use partitioned::PartitionedBatchManager;
pub use typed::TypedBatchManager;
pub use vector::{Contiguous, DenseVector, PartitionedVector, Vector};
