use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rlev::{compress, decompress, merge_add_in_place, InPlaceMode};

const COUNT: usize = 1 << 20;

fn sparse_vector(nonzero_fraction: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..COUNT)
        .map(|_| {
            let v: f64 = rng.gen();
            if rng.gen::<f64>() < nonzero_fraction {
                v
            } else {
                0.0
            }
        })
        .collect()
}

fn bench_compress(c: &mut Criterion) {
    let mut group = c.benchmark_group("compress");
    group.throughput(Throughput::Bytes((COUNT * 8) as u64));
    for nonzero in [0.001, 0.01, 0.1, 0.5] {
        let input = sparse_vector(nonzero, 7);
        let mut out = vec![0.0; COUNT];
        group.bench_with_input(BenchmarkId::from_parameter(nonzero), &input, |b, input| {
            b.iter(|| black_box(compress(input, &mut out)));
        });
    }
    group.finish();
}

fn bench_decompress(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompress");
    group.throughput(Throughput::Bytes((COUNT * 8) as u64));
    for nonzero in [0.001, 0.1] {
        let input = sparse_vector(nonzero, 7);
        let mut enc = vec![0.0; COUNT];
        let enc_len = compress(&input, &mut enc);
        let mut out = vec![0.0; COUNT];
        group.bench_with_input(BenchmarkId::from_parameter(nonzero), &enc[..enc_len], |b, enc| {
            b.iter(|| black_box(decompress(enc, &mut out)));
        });
    }
    group.finish();
}

fn bench_merge_pack_tail(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_pack_tail");
    group.throughput(Throughput::Bytes((COUNT * 8) as u64));
    for nonzero in [0.01, 0.5] {
        let dense = sparse_vector(nonzero, 11);
        let other = sparse_vector(nonzero, 13);
        let mut enc = vec![0.0; COUNT];
        let enc_len = compress(&other, &mut enc);
        group.bench_function(BenchmarkId::from_parameter(nonzero), |b| {
            let mut buf = vec![0.0; COUNT];
            b.iter(|| {
                buf[..enc_len].copy_from_slice(&enc[..enc_len]);
                black_box(merge_add_in_place(InPlaceMode::PackTail, &mut buf, enc_len, &dense, COUNT))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compress, bench_decompress, bench_merge_pack_tail);
criterion_main!(benches);
