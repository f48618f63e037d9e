use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use mesh_migrate::data::flex_table::FlexTable;

/// A quad-like table of `n` rows with `frac` of them removed and as many
/// (times `growth`) staged, so one flush exercises both hole filling and
/// tail compaction.
fn staged_table(n: usize, frac: f64, growth: f64, seed: u64) -> FlexTable<u64> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut t = FlexTable::from_rows((0..n as u64).map(|i| vec![i, i + 1, i + 2, i + 3]).collect());
    let removes = (n as f64 * frac) as usize;
    for _ in 0..removes {
        let i = rng.gen_range(0..n);
        t.remove_row(i).ok();
    }
    let adds = (removes as f64 * growth) as usize;
    for i in 0..adds as u64 {
        t.add_row(vec![i; 4]);
    }
    t
}

fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("flex_table_flush");
    for &n in &[1_000usize, 10_000, 100_000] {
        for &(label, growth) in &[("shrink", 0.5), ("grow", 2.0)] {
            group.bench_with_input(BenchmarkId::new(label, n), &n, |b, &n| {
                b.iter_batched(
                    || staged_table(n, 0.1, growth, 42),
                    |mut t| t.flush(),
                    criterion::BatchSize::LargeInput,
                )
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_flush);
criterion_main!(benches);
