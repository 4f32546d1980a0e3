//! Additive log-ratio transforms and the initial values passed to the engine.

use ndarray::{Array2, ArrayView2, Axis};
use serde_json::{json, Map, Value};

use crate::config::Parameterization;
use crate::data::{nested_rows, MlnData};

/**
Column-wise additive log-ratio with the last row as reference.

For a `D x N` matrix of positive values returns the `(D-1) x N` matrix
`log(p[i, j] / p[D-1, j])`.

```rust
use mlnfit::init::{alr, alr_inv};
use ndarray::arr2;

let p = arr2(&[[0.2], [0.3], [0.5]]);
let eta = alr(p.view());
assert!((eta[[0, 0]] - (0.2f64 / 0.5).ln()).abs() < 1e-12);
let back = alr_inv(eta.view());
assert!((back[[1, 0]] - 0.3).abs() < 1e-12);
```
*/
pub fn alr(p: ArrayView2<'_, f64>) -> Array2<f64> {
    let d = p.nrows();
    if d == 0 {
        return Array2::zeros((0, p.ncols()));
    }
    let reference = p.row(d - 1).mapv(f64::ln);
    let mut out = p.slice(ndarray::s![..d - 1, ..]).mapv(f64::ln);
    out -= &reference.insert_axis(Axis(0));
    out
}

/// Inverse of [`alr`]: maps a `(D-1) x N` matrix back to `D x N` column-wise proportions.
pub fn alr_inv(eta: ArrayView2<'_, f64>) -> Array2<f64> {
    let (k, n) = eta.dim();
    let mut out = Array2::<f64>::zeros((k + 1, n));
    for (j, col) in eta.axis_iter(Axis(1)).enumerate() {
        // Shift by the max for a stable softmax.
        let max = col.iter().copied().fold(0.0_f64, f64::max);
        let mut total = (-max).exp();
        for (i, &v) in col.iter().enumerate() {
            let e = (v - max).exp();
            out[[i, j]] = e;
            total += e;
        }
        out[[k, j]] = (-max).exp();
        out.column_mut(j).mapv_inplace(|v| v / total);
    }
    out
}

/// Starting point for every chain.
#[derive(Debug, Clone, PartialEq)]
pub struct InitValues {
    pub eta: Array2<f64>,
    pub lambda: Option<Array2<f64>>,
    pub sigma: Option<Array2<f64>>,
}

impl InitValues {
    /**
    Initial values for `data` under the given parameterization.

    `eta` is the log-ratio of the counts plus `pseudocount`. The uncollapsed
    model also starts `Lambda` at the prior mean `Theta` and `Sigma` at the
    inverse-Wishart mean `Xi / (upsilon - D)` (or `Xi` itself when that mean
    does not exist).
    */
    pub fn for_data(data: &MlnData, parameterization: Parameterization, pseudocount: f64) -> Self {
        let shifted = data.y.mapv(|c| c as f64 + pseudocount);
        let eta = alr(shifted.view());

        let (lambda, sigma) = match parameterization {
            Parameterization::Collapsed => (None, None),
            Parameterization::Uncollapsed => {
                let dof = data.upsilon - data.d() as f64;
                let sigma = if dof > 0.0 {
                    &data.xi / dof
                } else {
                    data.xi.clone()
                };
                (Some(data.theta.clone()), Some(sigma))
            }
        };

        Self { eta, lambda, sigma }
    }

    /// The engine's init object.
    pub fn to_stan_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("eta".to_string(), json!(nested_rows(self.eta.view())));
        if let Some(lambda) = &self.lambda {
            map.insert("Lambda".to_string(), json!(nested_rows(lambda.view())));
        }
        if let Some(sigma) = &self.sigma {
            map.insert("Sigma".to_string(), json!(nested_rows(sigma.view())));
        }
        Value::Object(map)
    }
}
