use logregr::driver::Observation;
use logregr::state::sigma;
use ndarray::{Array1, array};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Coefficients the synthetic labels are drawn from: intercept, two slopes.
pub fn true_coef() -> Array1<f64> {
    array![-0.5, 1.2, -0.8]
}

/// Draws `n` rows `[1, u1, u2]` with `u ~ U(-2, 2)` and Bernoulli labels from
/// the logistic model at [`true_coef`].
pub fn synthetic_rows(n: usize, seed: u64) -> Vec<Observation> {
    let mut rng = StdRng::seed_from_u64(seed);
    let coef = true_coef();
    (0..n)
        .map(|_| {
            let features = array![1.0, rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..2.0)];
            let p = sigma(features.dot(&coef));
            let label = rng.gen_range(0.0..1.0) < p;
            Observation::new(label, features)
        })
        .collect()
}

/// Deterministic rows `[1, x]` on an even grid over `[-2, 2]`, labelled by a
/// fixed low-discrepancy sequence against `sigma(1.5 x - 0.3)`. The classes
/// overlap, so the maximum-likelihood estimate exists.
pub fn graded_rows(n: usize) -> Vec<Observation> {
    (0..n)
        .map(|i| {
            let x = -2.0 + 4.0 * i as f64 / (n - 1) as f64;
            let u = ((i * 37) % 100) as f64 / 100.0;
            Observation::new(u < sigma(1.5 * x - 0.3), array![1.0, x])
        })
        .collect()
}
