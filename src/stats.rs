//! Convergence diagnostics for the draws the engine returns.
//!
//! - [`autocovariance`]: biased autocovariance through a zero-padded FFT.
//! - [`effective_sample_size`]: multi-chain ESS with Geyer's initial monotone
//!   sequence.
//! - [`split_rhat`]: potential scale reduction on chains split in half.
//! - [`summarize`]: both diagnostics over every parameter column of a
//!   [`DrawTable`], computed in parallel.

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use num_traits::Float;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::reshape::DrawTable;

/**
Biased autocovariance `acov[t] = sum_i (x_i - mean)(x_{i+t} - mean) / n` for
`t = 0..n`.

# Examples

```rust
use mlnfit::stats::autocovariance;
use ndarray::arr1;

let acov = autocovariance(arr1(&[1.0, -1.0, 1.0, -1.0]).view());
assert!((acov[0] - 1.0).abs() < 1e-12);
assert!((acov[1] + 0.75).abs() < 1e-12);
```
*/
pub fn autocovariance<T: Float>(x: ArrayView1<'_, T>) -> Array1<f64> {
    let n = x.len();
    if n == 0 {
        return Array1::zeros(0);
    }
    let values: Vec<f64> = x.iter().map(|v| v.to_f64().unwrap_or(f64::NAN)).collect();
    let mean = values.iter().sum::<f64>() / n as f64;

    let len = (2 * n).next_power_of_two();
    let mut buf: Vec<Complex<f64>> = values
        .iter()
        .map(|v| Complex::new(v - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(len)
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(len).process(&mut buf);
    for c in buf.iter_mut() {
        *c = Complex::new(c.norm_sqr(), 0.0);
    }
    planner.plan_fft_inverse(len).process(&mut buf);

    // rustfft does not normalize, so the round trip carries a factor of `len`.
    let scale = len as f64 * n as f64;
    Array1::from_iter(buf.iter().take(n).map(|c| c.re / scale))
}

/**
Effective sample size of one scalar quantity.

`chains` has shape `[n_chains, n_draws]`. Returns `NaN` when there are fewer
than 4 draws per chain or when the draws have no variance.
*/
pub fn effective_sample_size<T: Float>(chains: ArrayView2<'_, T>) -> f64 {
    let (m, n) = chains.dim();
    if m == 0 || n < 4 {
        return f64::NAN;
    }
    let acov: Vec<Array1<f64>> = chains.outer_iter().map(autocovariance).collect();
    let chain_mean: Array1<f64> = chains
        .outer_iter()
        .map(|c| c.iter().map(|v| v.to_f64().unwrap_or(f64::NAN)).sum::<f64>() / n as f64)
        .collect();
    let nf = n as f64;
    let mean_var = acov.iter().map(|a| a[0] * nf / (nf - 1.0)).sum::<f64>() / m as f64;
    let mut var_plus = mean_var * (nf - 1.0) / nf;
    if m > 1 {
        var_plus += chain_mean.var(1.0);
    }
    if !var_plus.is_finite() || var_plus <= 0.0 {
        return f64::NAN;
    }

    let acov_t = |t: usize| acov.iter().map(|a| a[t]).sum::<f64>() / m as f64;
    let mut rho_hat = vec![0.0; n];
    let mut rho_hat_even = 1.0;
    rho_hat[0] = rho_hat_even;
    let mut rho_hat_odd = 1.0 - (mean_var - acov_t(1)) / var_plus;
    rho_hat[1] = rho_hat_odd;

    // The last pair is left out of the positive sequence and used as a bias term.
    let mut t = 1;
    while t + 4 < n && rho_hat_even + rho_hat_odd > 0.0 {
        rho_hat_even = 1.0 - (mean_var - acov_t(t + 1)) / var_plus;
        rho_hat_odd = 1.0 - (mean_var - acov_t(t + 2)) / var_plus;
        if rho_hat_even + rho_hat_odd >= 0.0 {
            rho_hat[t + 1] = rho_hat_even;
            rho_hat[t + 2] = rho_hat_odd;
        }
        t += 2;
    }
    let max_t = t;
    if rho_hat_even > 0.0 {
        rho_hat[max_t + 1] = rho_hat_even;
    }

    // Initial positive sequence -> initial monotone sequence.
    let mut t = 1;
    while t + 3 <= max_t {
        if rho_hat[t + 1] + rho_hat[t + 2] > rho_hat[t - 1] + rho_hat[t] {
            rho_hat[t + 1] = (rho_hat[t - 1] + rho_hat[t]) / 2.0;
            rho_hat[t + 2] = rho_hat[t + 1];
        }
        t += 2;
    }

    let total = (m * n) as f64;
    let tau_hat = -1.0 + 2.0 * rho_hat[..max_t].iter().sum::<f64>() + rho_hat[max_t + 1];
    let tau_hat = tau_hat.max(1.0 / total.log10());
    total / tau_hat
}

/**
Split potential scale reduction factor.

Each chain of `chains` (`[n_chains, n_draws]`) is cut into two halves (the
middle draw is dropped for odd lengths) and the classic between/within
variance ratio is computed on the resulting `2 * n_chains` sequences.
Returns `NaN` for fewer than 4 draws per chain.
*/
pub fn split_rhat<T: Float>(chains: ArrayView2<'_, T>) -> f64 {
    let (m, n) = chains.dim();
    let half = n / 2;
    if m == 0 || half < 2 {
        return f64::NAN;
    }
    let as_f64 = chains.mapv(|v| v.to_f64().unwrap_or(f64::NAN));
    let first = as_f64.slice(s![.., ..half]);
    let second = as_f64.slice(s![.., n - half..]);
    let split = match ndarray::concatenate(Axis(0), &[first, second]) {
        Ok(split) => split,
        Err(_) => return f64::NAN,
    };

    let n_seq = split.nrows() as f64;
    let len = half as f64;
    let (Some(means), Some(mean_sq)) = (
        split.mean_axis(Axis(1)),
        split.mapv(|v| v * v).mean_axis(Axis(1)),
    ) else {
        return f64::NAN;
    };
    let Some(grand_mean) = means.mean() else {
        return f64::NAN;
    };

    let between = (&means - grand_mean).mapv(|v| v * v).sum() * len / (n_seq - 1.0);
    let sm2 = (&mean_sq - &means.mapv(|v| v * v)) * len / (len - 1.0);
    let Some(within) = sm2.mean() else {
        return f64::NAN;
    };
    let var = within * (len - 1.0) / len + between / len;
    (var / within).sqrt()
}

/// ESS and R-hat aggregated over the parameter columns of a draw table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EssSummary {
    pub n_params: usize,
    pub min: f64,
    pub median: f64,
    pub mean: f64,
    pub max: f64,
    pub max_rhat: f64,
}

/**
Computes ESS and split R-hat for every column that is not an engine
diagnostic (labels ending in `__`) and aggregates them, skipping `NaN`s.

Rows are grouped by their chain id (a table without chain ids is one chain).
Returns `None` when chains have different lengths or no column qualifies.
*/
pub fn summarize(table: &DrawTable) -> Option<EssSummary> {
    let rows_per_chain = chain_rows(table)?;
    let n = rows_per_chain.first()?.len();
    if rows_per_chain.iter().any(|rows| rows.len() != n) {
        tracing::warn!("chains have different lengths; skipping ESS summary");
        return None;
    }

    let values = table.values();
    let params: Vec<usize> = table
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, label)| !label.ends_with("__"))
        .map(|(i, _)| i)
        .collect();
    if params.is_empty() {
        return None;
    }

    let diagnostics: Vec<(f64, f64)> = params
        .par_iter()
        .map(|&col| {
            let column = values.column(col);
            let chains = Array2::from_shape_fn((rows_per_chain.len(), n), |(c, t)| {
                column[rows_per_chain[c][t]]
            });
            (
                effective_sample_size(chains.view()),
                split_rhat(chains.view()),
            )
        })
        .collect();

    let mut ess: Vec<f64> = diagnostics
        .iter()
        .map(|(e, _)| *e)
        .filter(|e| !e.is_nan())
        .collect();
    let rhat: Array1<f64> = diagnostics.iter().map(|(_, r)| *r).collect();
    ess.sort_by(|a, b| a.total_cmp(b));
    let ess_arr = Array1::from(ess.clone());
    let (min, max) = match ess_arr.len() {
        0 => (f64::NAN, f64::NAN),
        _ => (*ess_arr.min_skipnan(), *ess_arr.max_skipnan()),
    };

    Some(EssSummary {
        n_params: params.len(),
        min,
        median: median_sorted(&ess),
        mean: ess_arr.mean().unwrap_or(f64::NAN),
        max,
        max_rhat: if rhat.iter().all(|r| r.is_nan()) {
            f64::NAN
        } else {
            *rhat.max_skipnan()
        },
    })
}

/// Row indices of each chain, in order of first appearance.
fn chain_rows(table: &DrawTable) -> Option<Vec<Vec<usize>>> {
    if table.n_draws() == 0 {
        return None;
    }
    let Some(ids) = table.chain_ids() else {
        return Some(vec![(0..table.n_draws()).collect()]);
    };
    let mut order: Vec<usize> = Vec::new();
    let mut rows: Vec<Vec<usize>> = Vec::new();
    for (row, id) in ids.iter().enumerate() {
        match order.iter().position(|o| o == id) {
            Some(k) => rows[k].push(row),
            None => {
                order.push(*id);
                rows.push(vec![row]);
            }
        }
    }
    Some(rows)
}

fn median_sorted(sorted: &[f64]) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        len if len % 2 == 1 => sorted[len / 2],
        len => (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn iid(m: usize, n: usize, seed: u64) -> Array2<f64> {
        let mut rng = SmallRng::seed_from_u64(seed);
        Array2::from_shape_simple_fn((m, n), || rng.sample(StandardNormal))
    }

    fn ar1(m: usize, n: usize, phi: f64, seed: u64) -> Array2<f64> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut out = Array2::zeros((m, n));
        for c in 0..m {
            let mut x = 0.0;
            for t in 0..n {
                let e: f64 = rng.sample(StandardNormal);
                x = phi * x + e;
                out[[c, t]] = x;
            }
        }
        out
    }

    #[test]
    fn test_autocovariance_matches_direct_sum() {
        let x = arr1(&[0.3, -1.2, 2.5, 0.7, -0.4, 1.1]);
        let acov = autocovariance(x.view());
        let mean = x.mean().unwrap();
        let n = x.len();
        for t in 0..n {
            let direct: f64 = (0..n - t)
                .map(|i| (x[i] - mean) * (x[i + t] - mean))
                .sum::<f64>()
                / n as f64;
            assert_abs_diff_eq!(acov[t], direct, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_ess_iid_close_to_draw_count() {
        let draws = iid(4, 1000, 42);
        let ess = effective_sample_size(draws.view());
        assert!(ess > 2800.0 && ess < 5500.0, "ess = {ess}");
    }

    #[test]
    fn test_ess_autocorrelated_is_small() {
        let draws = ar1(4, 1000, 0.9, 42);
        let ess = effective_sample_size(draws.view());
        // Theoretical value is about 4000 * 0.1 / 1.9 ~ 210.
        assert!(ess > 50.0 && ess < 800.0, "ess = {ess}");
    }

    #[test]
    fn test_ess_degenerate_inputs() {
        assert!(effective_sample_size(Array2::<f64>::zeros((2, 3)).view()).is_nan());
        assert!(effective_sample_size(Array2::<f64>::ones((2, 100)).view()).is_nan());
    }

    #[test]
    fn test_split_rhat_near_one_for_mixed_chains() {
        let rhat = split_rhat(iid(4, 1000, 7).view());
        assert!((rhat - 1.0).abs() < 0.02, "rhat = {rhat}");
    }

    #[test]
    fn test_split_rhat_detects_shifted_chain() {
        let mut draws = iid(4, 500, 7);
        draws.row_mut(3).mapv_inplace(|v| v + 5.0);
        assert!(split_rhat(draws.view()) > 1.5);
    }

    #[test]
    fn test_split_rhat_f32_input() {
        let draws = iid(2, 400, 3).mapv(|v| v as f32);
        assert!((split_rhat(draws.view()) - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_summarize_groups_by_chain_and_skips_diagnostics() {
        let draws = iid(2, 200, 11);
        let mut values = Array2::zeros((400, 2));
        for c in 0..2 {
            for t in 0..200 {
                values[[c * 200 + t, 0]] = -1.0;
                values[[c * 200 + t, 1]] = draws[[c, t]];
            }
        }
        let table = DrawTable::new(vec!["lp__".into(), "mu".into()], values)
            .unwrap()
            .with_chain_ids([vec![1; 200], vec![2; 200]].concat())
            .unwrap();
        let summary = summarize(&table).unwrap();
        assert_eq!(summary.n_params, 1);
        assert_eq!(summary.min, summary.max);
        assert_abs_diff_eq!(
            summary.mean,
            effective_sample_size(draws.view()),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_summarize_rejects_ragged_chains() {
        let table = DrawTable::new(vec!["mu".into()], Array2::zeros((5, 1)))
            .unwrap()
            .with_chain_ids(vec![1, 1, 1, 2, 2])
            .unwrap();
        assert!(summarize(&table).is_none());
    }

    #[test]
    fn test_median_sorted() {
        assert_eq!(median_sorted(&[1.0, 2.0, 10.0]), 2.0);
        assert_eq!(median_sorted(&[1.0, 2.0, 4.0, 10.0]), 3.0);
        assert!(median_sorted(&[]).is_nan());
    }
}
