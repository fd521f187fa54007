//! Single-machine benchmark and correctness driver.
//!
//! Spawns an in-process world of `--ranks` threads, fills each rank's
//! operand with seeded random data at the requested sparsity and runs every
//! (or one selected) pipeline variant, checking the root's result against a
//! locally computed reference sum.

use std::sync::mpsc;
use std::thread;

use clap::Parser;
use communicator::{local_world, LocalComm, Transport};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use zreduce::{reduce, Algorithm, AlignedBuf, ReduceContext, ReduceOp, DEFAULT_PACKET_BYTES};

#[derive(Parser, Debug, Clone)]
#[command(name = "reduce-bench", about = "pipelined sparse sum reduction benchmark")]
struct Args {
    /// Number of ranks in the in-process world.
    #[arg(short = 'n', long, default_value_t = 4)]
    ranks: usize,

    /// Elements per rank.
    #[arg(short, long, default_value_t = 1 << 20)]
    count: usize,

    /// Fraction of non-zero elements in each operand.
    #[arg(short, long, default_value_t = 0.01)]
    sparsity: f64,

    /// Packet buffer size in bytes.
    #[arg(short, long, default_value_t = DEFAULT_PACKET_BYTES)]
    packet_bytes: usize,

    /// Worker threads per rank for the local merge; 0 keeps it serial.
    #[arg(short, long, default_value_t = 0)]
    workers: usize,

    /// Repetitions per variant.
    #[arg(short, long, default_value_t = 3)]
    iterations: usize,

    /// Run only this variant (e.g. "stream-rle"); default runs all.
    #[arg(short, long)]
    algorithm: Option<Algorithm>,

    /// Rank receiving the result.
    #[arg(long, default_value_t = 0)]
    root: usize,
}

/// Cache line alignment for the operand buffers.
const BUF_ALIGN: usize = 64;

/// Seeded per-rank operand: roughly `sparsity * count` non-zeros in [0, 1).
fn make_input(rank: usize, count: usize, sparsity: f64) -> AlignedBuf {
    let mut rng = StdRng::seed_from_u64(rank as u64 + 1);
    let mut buf = AlignedBuf::zeroed(count, BUF_ALIGN);
    for slot in buf.iter_mut() {
        let v: f64 = rng.gen();
        if rng.gen::<f64>() < sparsity {
            *slot = v;
        }
    }
    buf
}

fn reference_sum(ranks: usize, count: usize, sparsity: f64) -> Vec<f64> {
    let mut expected = vec![0.0; count];
    for rank in 0..ranks {
        for (e, v) in expected.iter_mut().zip(make_input(rank, count, sparsity).iter()) {
            *e += v;
        }
    }
    expected
}

fn run_rank(
    comm: LocalComm,
    args: Args,
    algorithms: Vec<Algorithm>,
    results: mpsc::Sender<(Algorithm, Vec<f64>, f64)>,
) {
    let rank = comm.rank();
    let input = make_input(rank, args.count, args.sparsity);
    let mut output = AlignedBuf::zeroed(if rank == args.root { args.count } else { 0 }, BUF_ALIGN);

    let mut ctx = ReduceContext::new()
        .with_packet_bytes(args.packet_bytes)
        .with_logging(true);
    if args.workers > 1 {
        ctx = ctx.with_workers(args.workers);
    }
    ctx.preallocate(3);

    for algorithm in algorithms {
        let mut best = f64::INFINITY;
        for _ in 0..args.iterations {
            output.iter_mut().for_each(|v| *v = 0.0);
            let stats = reduce(&mut ctx, &comm, &input, &mut output, ReduceOp::Sum, args.root, algorithm)
                .unwrap_or_else(|err| panic!("rank {rank}: {algorithm} failed: {err}"));
            best = best.min(stats.times.total);
        }
        if rank == args.root {
            results
                .send((algorithm, output.to_vec(), best))
                .expect("result channel closed");
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    assert!(args.ranks > 0, "need at least one rank");
    assert!(args.root < args.ranks, "root must be a valid rank");

    let algorithms: Vec<Algorithm> = match args.algorithm {
        Some(one) => vec![one],
        None => Algorithm::ALL.to_vec(),
    };
    let expected = reference_sum(args.ranks, args.count, args.sparsity);

    let (tx, rx) = mpsc::channel();
    let handles: Vec<_> = local_world(args.ranks)
        .into_iter()
        .map(|comm| {
            let args = args.clone();
            let algorithms = algorithms.clone();
            let tx = tx.clone();
            thread::spawn(move || run_rank(comm, args, algorithms, tx))
        })
        .collect();
    drop(tx);

    // Same acceptance bound the reference harness uses: summation order
    // differs between the chain and the local reference.
    let tolerance = args.count as f64 * 1e-10;
    let mut failures = 0;
    for (algorithm, result, best) in rx {
        let error: f64 = result.iter().zip(&expected).map(|(a, b)| (a - b).abs()).sum();
        let status = if error <= tolerance { "ok" } else { "FAILED" };
        if error > tolerance {
            failures += 1;
        }
        let mbps = if best > 0.0 {
            (args.count * std::mem::size_of::<f64>()) as f64 / best / 1e6
        } else {
            0.0
        };
        println!("{:18} {:>10.6}s  {:>9.2} MB/s  err {:>9.3e}  {}", algorithm.name(), best, mbps, error, status);
    }

    for handle in handles {
        handle.join().expect("rank thread panicked");
    }
    if failures > 0 {
        std::process::exit(1);
    }
}
