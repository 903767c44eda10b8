use std::{
    future::Future,
    io,
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use batch_manager::{
    BatchConfig, BatchErr, BatchManager, Collective, DenseVector, PartitionedBatchManager,
    PartitionedVector, ReduceOp, TypedBatchManager,
    local::{self, LocalComm},
};
use ndarray::{Array1, array};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::task::JoinSet;

/// A provider that counts the reductions that reach it.
struct CountingComm {
    inner: LocalComm,
    reductions: Arc<AtomicUsize>,
}

impl Collective for CountingComm {
    fn rank(&self) -> usize {
        self.inner.rank()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    async fn reduce_all(&self, input: &[f32], output: &mut [f32], op: ReduceOp) -> io::Result<()> {
        self.reductions.fetch_add(1, Ordering::SeqCst);
        self.inner.reduce_all(input, output, op).await
    }

    async fn broadcast(&self, buf: &mut [f32], root: usize) -> io::Result<()> {
        self.inner.broadcast(buf, root).await
    }

    async fn barrier(&self) -> io::Result<()> {
        self.inner.barrier().await
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Runs `worker` once per rank of a new local group.
///
/// # Returns
/// The output of every worker, ordered by rank.
async fn run_group<F, Fut, T>(size: usize, worker: F) -> Vec<T>
where
    F: Fn(LocalComm) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    init_logger();

    let mut join_set = JoinSet::new();
    for comm in local::group(NonZeroUsize::new(size).unwrap()) {
        let rank = comm.rank();
        let task = worker(comm);
        join_set.spawn(async move { (rank, task.await) });
    }

    let mut outputs = Vec::with_capacity(size);
    while let Some(ret) = join_set.join_next().await {
        outputs.push(ret.unwrap());
    }

    outputs.sort_by_key(|(rank, _)| *rank);
    outputs.into_iter().map(|(_, out)| out).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn three_workers_sum_their_vectors() {
    let outputs = run_group(3, |comm| async move {
        let manager = TypedBatchManager::new(Arc::new(comm));
        let first = 3. * manager.batch_id() as f32;
        let input = DenseVector::from(vec![first + 1., first + 2., first + 3.]);
        let mut output = DenseVector::zeros(3);

        manager.sum_all_vec(&input, &mut output).await.map(|_| output)
    })
    .await;

    for output in outputs {
        assert_eq!(output.unwrap().as_slice(), [12., 15., 18.]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dimension_mismatch_fails_everywhere_without_reducing() {
    let reductions = Arc::new(AtomicUsize::new(0));

    let outputs = run_group(3, |inner| {
        let comm = CountingComm {
            inner,
            reductions: Arc::clone(&reductions),
        };

        async move {
            let manager = TypedBatchManager::new(Arc::new(comm));
            let input = vec![1.; 4];
            let mut output = vec![-1.; 5];

            let ret = manager.sum_all_vec(&input, &mut output).await;
            (ret, output)
        }
    })
    .await;

    for (ret, output) in outputs {
        assert!(matches!(
            ret,
            Err(BatchErr::DimensionMismatch {
                input: 4,
                output: 5
            })
        ));
        assert_eq!(output, vec![-1.; 5]);
    }
    assert_eq!(reductions.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn random_sums_are_identical_on_every_worker() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..8 {
        let workers = rng.random_range(1..=5);
        let dim = rng.random_range(0..64);
        let inputs: Arc<Vec<Vec<f32>>> = Arc::new(
            (0..workers)
                .map(|_| (0..dim).map(|_| rng.random_range(-1e3..1e3)).collect())
                .collect(),
        );

        let expected = inputs
            .iter()
            .skip(1)
            .fold(inputs[0].clone(), |mut acc, input| {
                acc.iter_mut().zip(input).for_each(|(a, x)| *a += x);
                acc
            });

        let outputs = run_group(workers, |comm| {
            let inputs = Arc::clone(&inputs);
            async move {
                let manager = TypedBatchManager::new(Arc::new(comm));
                let input = inputs[manager.batch_id()].clone();
                let mut output = vec![0.; input.len()];

                manager.sum_all_vec(&input, &mut output).await.map(|_| output)
            }
        })
        .await;

        let expected_bits: Vec<u32> = expected.iter().map(|x| x.to_bits()).collect();
        for output in outputs {
            let bits: Vec<u32> = output.unwrap().iter().map(|x| x.to_bits()).collect();
            assert_eq!(bits, expected_bits, "workers={workers} dim={dim}");
        }
    }
}

#[tokio::test]
async fn single_worker_sum_is_identity() {
    let outputs = run_group(1, |comm| async move {
        let manager = TypedBatchManager::new(Arc::new(comm));
        let input = array![0.5f32, -4., 1e-3];
        let mut output = Array1::zeros(3);

        manager.sum_all_vec(&input, &mut output).await.map(|_| output)
    })
    .await;

    assert_eq!(outputs[0].as_ref().unwrap(), &array![0.5f32, -4., 1e-3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn partitioned_vectors_are_summed_block_by_block() {
    let outputs = run_group(2, |comm| async move {
        let manager = PartitionedBatchManager::new(Arc::new(comm));
        let x = manager.batch_id() as f32 + 1.;
        let input = PartitionedVector::new(vec![vec![x, 2. * x], vec![10. * x]]);
        let mut output = PartitionedVector::new(vec![vec![0.; 2], vec![0.]]);

        manager.sum_all_vec(&input, &mut output).await.map(|_| output)
    })
    .await;

    for output in outputs {
        assert_eq!(output.unwrap().into_blocks(), vec![vec![3., 6.], vec![30.]]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn agreement_check_fails_the_whole_group() {
    let config = BatchConfig {
        verify_agreement: true,
    };

    let outputs = run_group(3, |comm| async move {
        let manager = TypedBatchManager::with_config(Arc::new(comm), config);
        let input = vec![1.; 4];
        let out_len = if manager.batch_id() == 1 { 5 } else { 4 };
        let mut output = vec![0.; out_len];

        manager.sum_all_vec(&input, &mut output).await
    })
    .await;

    assert!(matches!(outputs[0], Err(BatchErr::PeerValidationFailed)));
    assert!(matches!(
        outputs[1],
        Err(BatchErr::DimensionMismatch {
            input: 4,
            output: 5
        })
    ));
    assert!(matches!(outputs[2], Err(BatchErr::PeerValidationFailed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn agreement_check_catches_cross_worker_lengths() {
    let config = BatchConfig {
        verify_agreement: true,
    };

    let outputs = run_group(2, |comm| async move {
        let manager = TypedBatchManager::with_config(Arc::new(comm), config);
        let dim = 2 + manager.batch_id();
        let input = DenseVector::zeros(dim);
        let mut output = DenseVector::zeros(dim);

        manager.sum_all_vec(&input, &mut output).await
    })
    .await;

    assert!(matches!(
        outputs[0],
        Err(BatchErr::DimensionDisagreement {
            local: 2,
            min: 2,
            max: 3
        })
    ));
    assert!(matches!(
        outputs[1],
        Err(BatchErr::DimensionDisagreement {
            local: 3,
            min: 2,
            max: 3
        })
    ));
}

/// The sample-average step of a stochastic gradient iteration, written
/// against the representation agnostic contract.
async fn sample_average<M>(
    manager: &M,
    local_sum: &DenseVector,
    local_samples: usize,
) -> batch_manager::Result<DenseVector>
where
    M: BatchManager<Vector = DenseVector>,
{
    let samples = manager.sum_scalar(local_samples as f32).await?;
    let mut total = DenseVector::zeros(local_sum.len());
    manager.sum_all_vec(local_sum, &mut total).await?;

    total.iter_mut().for_each(|x| *x /= samples);
    Ok(total)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn generic_consumer_computes_sample_average() {
    let outputs = run_group(2, |comm| async move {
        let manager = TypedBatchManager::new(Arc::new(comm));
        let (local_sum, samples) = match manager.batch_id() {
            0 => (DenseVector::from(vec![2., 4.]), 1),
            _ => (DenseVector::from(vec![4., 8.]), 3),
        };

        let average = sample_average(&manager, &local_sum, samples).await?;
        manager.barrier().await?;
        batch_manager::Result::Ok(average)
    })
    .await;

    for output in outputs {
        assert_eq!(output.unwrap().as_slice(), [1.5, 3.]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_index_is_broadcast_from_root() {
    let outputs = run_group(3, |comm| async move {
        let manager: TypedBatchManager<_, Vec<f32>> = TypedBatchManager::new(Arc::new(comm));
        let mut index = [manager.batch_id() as f32 * 10.];
        manager.broadcast(&mut index, 2).await.map(|_| index[0])
    })
    .await;

    for output in outputs {
        assert_eq!(output.unwrap(), 20.);
    }
}
