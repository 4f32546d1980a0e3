//! Synthetic MLN datasets with known ground truth.
//!
//! The generative process mirrors the model: `X` has an intercept row and
//! standard-normal covariates, `Lambda` has standard-normal entries,
//! `Sigma = I`, `Eta = Lambda X + E` with standard-normal `E`, sequencing
//! depths are Poisson and each column of `Y` is multinomial on
//! `alr_inv(Eta)`.

use ndarray::{Array1, Array2};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Binomial, Distribution, Poisson, StandardNormal};

use crate::data::{MlnData, TrueParams};
use crate::error::DataError;
use crate::init::alr_inv;

/// Size and seed of a simulated dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationSpec {
    /// Categories.
    pub d: usize,
    /// Samples.
    pub n: usize,
    /// Covariates, intercept included.
    pub q: usize,
    /// Mean counts per sample.
    pub depth: f64,
    pub seed: u64,
}

impl Default for SimulationSpec {
    fn default() -> Self {
        Self {
            d: 10,
            n: 30,
            q: 2,
            depth: 5000.0,
            seed: 42,
        }
    }
}

/**
Draws a dataset from the MLN generative model, with default priors and the
true `Lambda`, `Sigma` and `Eta` attached.

```rust
use mlnfit::simulate::{simulate, SimulationSpec};

let data = simulate(&SimulationSpec { d: 4, n: 6, q: 2, depth: 100.0, seed: 1 })?;
assert_eq!(data.y.dim(), (4, 6));
assert!(data.truth.is_some());
# Ok::<(), mlnfit::error::DataError>(())
```
*/
pub fn simulate(spec: &SimulationSpec) -> Result<MlnData, DataError> {
    if spec.d < 2 {
        return Err(DataError::TooFewCategories(spec.d));
    }
    let mut rng = SmallRng::seed_from_u64(spec.seed);
    let k = spec.d - 1;

    let mut x = Array2::<f64>::from_shape_simple_fn((spec.q, spec.n), || rng.sample(StandardNormal));
    if spec.q > 0 {
        x.row_mut(0).fill(1.0);
    }
    let lambda = Array2::<f64>::from_shape_simple_fn((k, spec.q), || rng.sample(StandardNormal));
    let sigma = Array2::<f64>::eye(k);
    let noise = Array2::<f64>::from_shape_simple_fn((k, spec.n), || rng.sample(StandardNormal));
    let eta = lambda.dot(&x) + noise;

    let probs = alr_inv(eta.view());
    let depth = Poisson::new(spec.depth).map_err(|_| DataError::InvalidDepth(spec.depth))?;
    let mut y = Array2::<u64>::zeros((spec.d, spec.n));
    for j in 0..spec.n {
        let total = (depth.sample(&mut rng) as u64).max(1);
        let counts = multinomial(&mut rng, total, &probs.column(j).to_owned());
        y.column_mut(j).assign(&counts);
    }

    MlnData::new(y, x)?.with_truth(TrueParams {
        lambda: Some(lambda),
        sigma: Some(sigma),
        eta: Some(eta),
    })
}

/// Multinomial draw through a chain of conditional binomials.
fn multinomial<R: Rng>(rng: &mut R, total: u64, probs: &Array1<f64>) -> Array1<u64> {
    let mut out = Array1::<u64>::zeros(probs.len());
    let mut remaining = total;
    let mut mass = 1.0;
    for (i, &p) in probs.iter().enumerate() {
        if remaining == 0 {
            break;
        }
        if i + 1 == probs.len() {
            out[i] = remaining;
            break;
        }
        let conditional = if mass > 0.0 { (p / mass).clamp(0.0, 1.0) } else { 0.0 };
        let draw = Binomial::new(remaining, conditional)
            .map(|b| b.sample(rng))
            .unwrap_or(0);
        out[i] = draw;
        remaining -= draw;
        mass -= p;
    }
    out
}
