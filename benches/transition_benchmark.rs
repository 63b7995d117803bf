// ========================================================================================
//
//                 Transition throughput of the fitting engines
//
// ========================================================================================
//
// Measures how many observations per second one partition folds for each engine,
// across feature widths. The fold is dominated by the rank-one update of X'AX,
// so throughput should fall roughly with the square of the width.
//
// ========================================================================================

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use logregr::driver::{Observation, fold_partition, run_iteration};
use logregr::state::IterativeState;
use logregr::{CgState, IgdState, IrlsState};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const NUM_ROWS: usize = 2_000;
const WIDTHS: [usize; 3] = [4, 16, 64];

fn synthetic_rows(width: usize) -> Vec<Observation> {
    let mut rng = StdRng::seed_from_u64(0x5EED_0000 + width as u64);
    (0..NUM_ROWS)
        .map(|_| {
            let features = Array1::from_shape_fn(width, |j| {
                if j == 0 { 1.0 } else { rng.gen_range(-1.0..1.0) }
            });
            let label = rng.gen_range(0.0..1.0) < 0.5;
            Observation::new(label, features)
        })
        .collect()
}

fn bench_engine<S>(c: &mut Criterion, name: &str)
where
    S: IterativeState + Send + Sync,
{
    let mut group = c.benchmark_group(format!("transition_{name}"));
    for width in WIDTHS {
        let rows = synthetic_rows(width);
        // A second-iteration prior exercises the path every later pass takes.
        let prior = run_iteration::<S>(&[rows.clone()], None)
            .ok()
            .and_then(|state| state.finalize());

        group.throughput(Throughput::Elements(NUM_ROWS as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), &rows, |b, input| {
            b.iter(|| {
                let state = fold_partition::<S>(black_box(input), prior.as_ref());
                black_box(state.map(|s| s.num_rows()).unwrap_or(0));
            });
        });
    }
    group.finish();
}

fn benchmark_transitions(c: &mut Criterion) {
    bench_engine::<CgState>(c, "cg");
    bench_engine::<IrlsState>(c, "irls");
    bench_engine::<IgdState>(c, "igd");
}

criterion_group!(benches, benchmark_transitions);
criterion_main!(benches);
