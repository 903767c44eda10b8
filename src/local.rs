//! An in-process collective provider.
//!
//! Every rank of a local group is a handle to the same shared state, workers
//! are expected to run as separate tasks of the same runtime.

use std::{io, num::NonZeroUsize, sync::Arc};

use log::{debug, trace};
use parking_lot::Mutex;
use tokio::sync::Barrier;

use crate::collective::{Collective, ReduceOp};

#[derive(Debug)]
struct Shared {
    barrier: Barrier,
    slots: Box<[Mutex<Vec<f32>>]>,
}

/// One rank of a group created by `group`.
#[derive(Debug)]
pub struct LocalComm {
    rank: usize,
    shared: Arc<Shared>,
}

/// Creates the handles of a new in-process group.
///
/// # Arguments
/// * `size` - The amount of workers in the group.
///
/// # Returns
/// One `LocalComm` per rank, ordered by rank.
pub fn group(size: NonZeroUsize) -> Vec<LocalComm> {
    let size = size.get();
    let slots = (0..size).map(|_| Mutex::new(Vec::new())).collect();

    let shared = Arc::new(Shared {
        barrier: Barrier::new(size),
        slots,
    });

    (0..size)
        .map(|rank| LocalComm {
            rank,
            shared: Arc::clone(&shared),
        })
        .collect()
}

fn invalid_input<T>(msg: String) -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::InvalidInput, msg))
}

impl LocalComm {
    fn deposit(&self, data: &[f32]) {
        let mut slot = self.shared.slots[self.rank].lock();
        slot.clear();
        slot.extend_from_slice(data);
    }

    /// Folds every deposited contribution in rank order into `output`.
    ///
    /// All ranks traverse the slots in the same order, so all of them end up
    /// with the same bits.
    fn fold_into(&self, output: &mut [f32], op: ReduceOp) -> io::Result<()> {
        let slots = &self.shared.slots;

        if let Some((rank, len)) = slots
            .iter()
            .map(|slot| slot.lock().len())
            .enumerate()
            .find(|&(_, len)| len != output.len())
        {
            return invalid_input(format!(
                "rank {rank} contributed {len} elements, rank {} expected {}",
                self.rank,
                output.len()
            ));
        }

        for (rank, slot) in slots.iter().enumerate() {
            let slot = slot.lock();

            if rank == 0 {
                output.copy_from_slice(&slot);
            } else {
                output
                    .iter_mut()
                    .zip(slot.iter())
                    .for_each(|(acc, &x)| *acc = op.apply(*acc, x));
            }
        }

        Ok(())
    }
}

impl Collective for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.slots.len()
    }

    async fn reduce_all(&self, input: &[f32], output: &mut [f32], op: ReduceOp) -> io::Result<()> {
        if input.len() != output.len() {
            return invalid_input(format!(
                "reduce_all buffers differ in length: input {}, output {}",
                input.len(),
                output.len()
            ));
        }

        trace!(rank = self.rank, len = input.len(); "entering reduce_all ({op})");
        self.deposit(input);
        self.shared.barrier.wait().await;

        let ret = self.fold_into(output, op);

        // Nobody may deposit again until every rank is done reading.
        self.shared.barrier.wait().await;
        debug!(rank = self.rank, len = output.len(); "reduce_all ({op}) finished");
        ret
    }

    async fn broadcast(&self, buf: &mut [f32], root: usize) -> io::Result<()> {
        let size = self.size();
        if root >= size {
            return invalid_input(format!("broadcast root {root} out of range for {size} workers"));
        }

        trace!(rank = self.rank, root = root, len = buf.len(); "entering broadcast");
        if self.rank == root {
            self.deposit(buf);
        }

        self.shared.barrier.wait().await;

        let ret = if self.rank == root {
            Ok(())
        } else {
            let sent = self.shared.slots[root].lock();
            if sent.len() == buf.len() {
                buf.copy_from_slice(&sent);
                Ok(())
            } else {
                invalid_input(format!(
                    "root {root} broadcast {} elements, rank {} expected {}",
                    sent.len(),
                    self.rank,
                    buf.len()
                ))
            }
        };

        self.shared.barrier.wait().await;
        ret
    }

    async fn barrier(&self) -> io::Result<()> {
        trace!(rank = self.rank; "entering barrier");
        self.shared.barrier.wait().await;
        Ok(())
    }
}
