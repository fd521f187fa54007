//! End-to-end correctness of every pipeline variant over the in-process
//! transport.

use std::thread;

use communicator::{local_world, Transport};
use itertools::iproduct;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use zreduce::{reduce, Algorithm, ReduceContext, ReduceError, ReduceOp};

/// Runs one collective over `inputs.len()` rank threads and returns the
/// root's buffer.
fn run_reduce(
    inputs: &[Vec<f64>],
    root: usize,
    algorithm: Algorithm,
    packet_bytes: usize,
    workers: usize,
) -> Vec<f64> {
    let count = inputs[0].len();
    let handles: Vec<_> = local_world(inputs.len())
        .into_iter()
        .zip(inputs.to_vec())
        .map(|(comm, input)| {
            thread::spawn(move || {
                let mut ctx = ReduceContext::new().with_packet_bytes(packet_bytes);
                if workers > 1 {
                    ctx = ctx.with_workers(workers);
                }
                let mut output = vec![0.0; if comm.rank() == root { count } else { 0 }];
                reduce(&mut ctx, &comm, &input, &mut output, ReduceOp::Sum, root, algorithm)
                    .unwrap_or_else(|err| panic!("rank {}: {err}", comm.rank()));
                output
            })
        })
        .collect();

    let mut result = Vec::new();
    for (rank, handle) in handles.into_iter().enumerate() {
        let buf = handle.join().expect("rank thread panicked");
        if rank == root {
            result = buf;
        }
    }
    result
}

fn random_input(rank: usize, count: usize, nonzero_fraction: f64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(rank as u64 + 1);
    (0..count)
        .map(|_| {
            let v: f64 = rng.gen_range(-100.0..100.0);
            if rng.gen::<f64>() < nonzero_fraction {
                v
            } else {
                0.0
            }
        })
        .collect()
}

fn expected_sum(inputs: &[Vec<f64>]) -> Vec<f64> {
    let mut out = vec![0.0; inputs[0].len()];
    for input in inputs {
        for (o, v) in out.iter_mut().zip(input) {
            *o += v;
        }
    }
    out
}

fn assert_close(got: &[f64], want: &[f64]) {
    assert_eq!(got.len(), want.len());
    let tolerance = want.len() as f64 * 1e-10;
    let error: f64 = got.iter().zip(want).map(|(a, b)| (a - b).abs()).sum();
    assert!(error <= tolerance, "accumulated error {error} exceeds {tolerance}");
}

#[test]
fn known_sparse_vectors_three_ranks() {
    let inputs = vec![
        vec![0.0, 0.0, 0.0, 5.0, 0.0, 0.0],
        vec![1.0, 0.0, 0.0, 0.0, 0.0, 2.0],
        vec![0.0, 3.0, 0.0, 0.0, 4.0, 0.0],
    ];
    for algorithm in Algorithm::ALL {
        let result = run_reduce(&inputs, 0, algorithm, 4096, 0);
        assert_eq!(result, vec![1.0, 3.0, 0.0, 5.0, 4.0, 2.0], "{algorithm}");
    }
}

#[test]
fn all_variants_match_reference_across_shapes() {
    // Small packets force several packets per call; sparsity sweeps from
    // all-zero through dense.
    for (ranks, count, nonzero) in iproduct!([2usize, 3, 8], [1usize, 100, 4096], [0.0, 0.01, 0.5, 1.0]) {
        let inputs: Vec<Vec<f64>> = (0..ranks).map(|r| random_input(r, count, nonzero)).collect();
        let want = expected_sum(&inputs);
        for algorithm in Algorithm::ALL {
            let got = run_reduce(&inputs, 0, algorithm, 512, 0);
            assert_close(&got, &want);
        }
    }
}

#[test]
fn large_vector_many_packets() {
    let ranks = 4;
    let count = 100_000;
    let inputs: Vec<Vec<f64>> = (0..ranks).map(|r| random_input(r, count, 0.02)).collect();
    let want = expected_sum(&inputs);
    for algorithm in Algorithm::ALL {
        let got = run_reduce(&inputs, 0, algorithm, 4096, 0);
        assert_close(&got, &want);
    }
}

#[test]
fn nonzero_root_places_result_on_that_rank() {
    let ranks = 5;
    let inputs: Vec<Vec<f64>> = (0..ranks).map(|r| random_input(r, 777, 0.1)).collect();
    let want = expected_sum(&inputs);
    for algorithm in [Algorithm::SendRecv, Algorithm::SendRecvRle, Algorithm::StreamRle] {
        let got = run_reduce(&inputs, 3, algorithm, 1024, 0);
        assert_close(&got, &want);
    }
}

#[test]
fn zero_length_vector_is_a_no_op() {
    let inputs = vec![vec![], vec![], vec![]];
    for algorithm in Algorithm::ALL {
        let result = run_reduce(&inputs, 0, algorithm, 4096, 0);
        assert!(result.is_empty());
    }
}

#[test]
fn single_rank_copies_without_transport() {
    let inputs = vec![random_input(0, 1000, 0.3)];
    for algorithm in Algorithm::ALL {
        let result = run_reduce(&inputs, 0, algorithm, 4096, 0);
        assert_eq!(result, inputs[0]);
    }
}

#[test]
fn worker_pool_merge_matches_serial() {
    let ranks = 3;
    let count = 50_000;
    let inputs: Vec<Vec<f64>> = (0..ranks).map(|r| random_input(r, count, 0.5)).collect();
    let want = expected_sum(&inputs);
    for algorithm in [Algorithm::SendRecv, Algorithm::IsendIrecv, Algorithm::Stream] {
        let got = run_reduce(&inputs, 0, algorithm, 8192, 4);
        assert_close(&got, &want);
    }
}

#[test]
fn all_zero_head_with_dense_relay_and_tiny_packets() {
    // The head contributes one long zero run that every relay must expand
    // against a dense operand across many small outgoing chunks.
    let count = 100;
    let inputs = vec![
        random_input(0, count, 0.5),
        vec![1.0; count],
        vec![0.0; count],
    ];
    let want = expected_sum(&inputs);
    for algorithm in [Algorithm::StreamRle, Algorithm::StreamRlePacket, Algorithm::SendRecvRle] {
        let got = run_reduce(&inputs, 0, algorithm, 4 * 8, 0);
        assert_close(&got, &want);
    }
}

#[test]
fn all_zero_inputs_compress_to_almost_nothing() {
    let inputs = vec![vec![0.0; 10_000]; 4];
    for algorithm in [Algorithm::SendRecvRle, Algorithm::StreamRle, Algorithm::StreamRlePacket] {
        let result = run_reduce(&inputs, 0, algorithm, 2048, 0);
        assert!(result.iter().all(|&v| v == 0.0), "{algorithm}");
    }
}

#[test]
fn packet_smaller_than_one_element_still_works() {
    // A 1-byte budget clamps to one element per packet.
    let inputs = vec![
        vec![1.0, 0.0, 2.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0, 0.0, 3.0],
    ];
    for algorithm in Algorithm::ALL {
        let result = run_reduce(&inputs, 0, algorithm, 1, 0);
        assert_eq!(result, vec![1.0, 1.0, 2.0, 0.0, 3.0], "{algorithm}");
    }
}

#[test]
fn rejects_non_sum_operators() {
    let comms = local_world(1);
    let mut ctx = ReduceContext::new();
    let input = [1.0, 2.0];
    let mut output = [0.0, 0.0];
    for op in [ReduceOp::Prod, ReduceOp::Min, ReduceOp::Max] {
        let err = reduce(&mut ctx, &comms[0], &input, &mut output, op, 0, Algorithm::SendRecv)
            .unwrap_err();
        assert!(matches!(err, ReduceError::UnsupportedOp(_)));
    }
}

#[test]
fn rejects_out_of_range_root() {
    let comms = local_world(2);
    let mut ctx = ReduceContext::new();
    let input = [1.0];
    let mut output = [0.0];
    let err = reduce(&mut ctx, &comms[0], &input, &mut output, ReduceOp::Sum, 2, Algorithm::SendRecv)
        .unwrap_err();
    assert!(matches!(err, ReduceError::RootOutOfRange { root: 2, size: 2 }));
}

#[test]
fn rejects_mismatched_root_buffers() {
    let comms = local_world(1);
    let mut ctx = ReduceContext::new();
    let input = [1.0, 2.0, 3.0];
    let mut output = [0.0; 2];
    let err = reduce(&mut ctx, &comms[0], &input, &mut output, ReduceOp::Sum, 0, Algorithm::SendRecv)
        .unwrap_err();
    assert!(matches!(err, ReduceError::LengthMismatch { send: 3, recv: 2 }));
}
