/*!
# Fitting an MLN model through the engine

[`fit_mln`] is the whole pipeline: validate, prepare initial values, run the
engine, reshape the draws and attach run metadata.

```rust,no_run
use std::sync::Arc;
use mlnfit::config::{Algorithm, Parameterization, RunConfig};
use mlnfit::engine::CmdStan;
use mlnfit::fit::{fit_mln, Fitted};
use mlnfit::simulate::{simulate, SimulationSpec};

let data = Arc::new(simulate(&SimulationSpec::default())?);
let config = RunConfig::new(Parameterization::Collapsed, Algorithm::Sampling);
if let Fitted::Mln(fit) = fit_mln(&CmdStan::new(), data, &config)? {
    println!("eta has shape {:?}", fit.param("eta").map(|a| a.shape().to_vec()));
}
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::{ArrayD, Axis};
use serde::Serialize;

use crate::config::{Algorithm, Parameterization, RunConfig};
use crate::data::{MlnData, TrueParams};
use crate::engine::{Engine, EngineOutput, EngineRequest};
use crate::error::FitError;
use crate::init::InitValues;
use crate::io::csv::EngineTiming;
use crate::reshape::reshape;
use crate::stats::{summarize, EssSummary};

/// Posterior-mean error of one parameter against the known truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorMetrics {
    pub parameter: String,
    pub rmse: f64,
    pub mae: f64,
}

/// How the fit was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FitMetadata {
    pub algorithm: Algorithm,
    pub parameterization: Parameterization,
    pub seed: u64,
    /// Wall-clock time of the engine call, file I/O included.
    pub elapsed: Duration,
    /// What the engine itself reported, per chain.
    pub engine_timings: Vec<EngineTiming>,
    /// Only for sampling runs.
    pub ess: Option<EssSummary>,
    /// Empty unless the data carried ground truth.
    pub errors: Vec<ErrorMetrics>,
}

/// Reshaped draws of an MLN fit.
#[derive(Debug, Clone)]
pub struct MlnFit {
    /// Number of draws (rows of the engine output).
    pub iter: usize,
    pub d: usize,
    pub n: usize,
    pub q: usize,
    /// Base name -> `[draw, index...]` array.
    pub params: BTreeMap<String, ArrayD<f64>>,
    pub data: Arc<MlnData>,
    pub metadata: FitMetadata,
}

/// The engine's output as-is, or the reshaped fit.
#[derive(Debug, Clone)]
pub enum Fitted {
    Raw(EngineOutput),
    Mln(MlnFit),
}

impl MlnFit {
    pub fn param(&self, name: &str) -> Option<&ArrayD<f64>> {
        self.params.get(name)
    }

    /// Mean over the draw axis.
    pub fn posterior_mean(&self, name: &str) -> Option<ArrayD<f64>> {
        self.params.get(name).and_then(|a| a.mean_axis(Axis(0)))
    }

    /// A serializable digest: dimensions, metadata, and shape and posterior mean of every parameter.
    pub fn summary(&self) -> FitSummary {
        let params = self
            .params
            .iter()
            .map(|(name, array)| {
                (
                    name.clone(),
                    ParamSummary {
                        shape: array.shape().to_vec(),
                        mean: array.mean_axis(Axis(0)),
                    },
                )
            })
            .collect();
        FitSummary {
            iter: self.iter,
            d: self.d,
            n: self.n,
            q: self.q,
            algorithm: self.metadata.algorithm.to_string(),
            parameterization: self.metadata.parameterization.to_string(),
            seed: self.metadata.seed,
            elapsed_secs: self.metadata.elapsed.as_secs_f64(),
            engine_timings: self.metadata.engine_timings.clone(),
            ess: self.metadata.ess,
            errors: self.metadata.errors.clone(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamSummary {
    pub shape: Vec<usize>,
    pub mean: Option<ArrayD<f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FitSummary {
    pub iter: usize,
    pub d: usize,
    pub n: usize,
    pub q: usize,
    pub algorithm: String,
    pub parameterization: String,
    pub seed: u64,
    pub elapsed_secs: f64,
    pub engine_timings: Vec<EngineTiming>,
    pub ess: Option<EssSummary>,
    pub errors: Vec<ErrorMetrics>,
    pub params: BTreeMap<String, ParamSummary>,
}

/**
Fits the MLN model to `data` with `engine`.

Returns [`Fitted::Raw`] when `config.ret_raw` is set and [`Fitted::Mln`]
otherwise. Engine failures are passed through unchanged; nothing is retried.
*/
pub fn fit_mln<E: Engine + ?Sized>(
    engine: &E,
    data: Arc<MlnData>,
    config: &RunConfig,
) -> Result<Fitted, FitError> {
    config.validate()?;
    data.validate()?;

    let init = InitValues::for_data(&data, config.parameterization, config.pseudocount);
    let request = EngineRequest::from_config(config, data.to_stan_json(), init.to_stan_json());
    tracing::info!(
        parameterization = %config.parameterization,
        d = data.d(),
        n = data.n(),
        q = data.q(),
        "fitting MLN model"
    );

    let started = Instant::now();
    let output = engine.run(&request)?;
    let elapsed = started.elapsed();

    if config.ret_raw {
        return Ok(Fitted::Raw(output));
    }

    let ess = if config.algorithm.is_sampling() {
        summarize(&output.draws)
    } else {
        None
    };
    let selected: Option<Vec<&str>> = config
        .pars
        .as_ref()
        .map(|names| names.iter().map(String::as_str).collect());
    let params = reshape(&output.draws, selected.as_deref())?;
    let errors = data
        .truth
        .as_ref()
        .map(|truth| error_metrics(&params, truth))
        .unwrap_or_default();
    if let Some(ess) = &ess {
        tracing::info!(min_ess = ess.min, max_rhat = ess.max_rhat, "sampling diagnostics");
    }

    Ok(Fitted::Mln(MlnFit {
        iter: output.draws.n_draws(),
        d: data.d(),
        n: data.n(),
        q: data.q(),
        params,
        data,
        metadata: FitMetadata {
            algorithm: config.algorithm,
            parameterization: config.parameterization,
            seed: request.seed,
            elapsed,
            engine_timings: output.timings,
            ess,
            errors,
        },
    }))
}

/// RMSE and MAE of posterior means against every known parameter that was estimated.
pub fn error_metrics(
    params: &BTreeMap<String, ArrayD<f64>>,
    truth: &TrueParams,
) -> Vec<ErrorMetrics> {
    truth
        .named()
        .into_iter()
        .filter_map(|(name, expected)| {
            let mean = params.get(name)?.mean_axis(Axis(0))?;
            if mean.shape() != expected.shape() {
                tracing::warn!(parameter = name, "estimate and truth differ in shape; skipping");
                return None;
            }
            let count = expected.len() as f64;
            let diffs: Vec<f64> = mean.iter().zip(expected.iter()).map(|(a, b)| a - b).collect();
            Some(ErrorMetrics {
                parameter: name.to_string(),
                rmse: (diffs.iter().map(|d| d * d).sum::<f64>() / count).sqrt(),
                mae: diffs.iter().map(|d| d.abs()).sum::<f64>() / count,
            })
        })
        .collect()
}
