//! End-to-end runs of `fit_mln` against an in-memory engine.
//!
//! The fake engine records the request it receives and answers with draws
//! centred on the simulated ground truth, so reshaping, diagnostics and the
//! error metrics can all be checked without a compiled model.

use std::cell::RefCell;
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use mlnfit::config::{Algorithm, Parameterization, RunConfig, VariationalFamily};
use mlnfit::data::MlnData;
use mlnfit::engine::{Engine, EngineOutput, EngineRequest};
use mlnfit::error::{EngineError, FitError};
use mlnfit::fit::{fit_mln, Fitted};
use mlnfit::reshape::{flatten, DrawTable};
use mlnfit::simulate::{simulate, SimulationSpec};
use ndarray::{Array2, ArrayD, Axis, IxDyn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::collections::BTreeMap;

const DRAWS_PER_CHAIN: usize = 200;

struct FakeEngine {
    truth: MlnData,
    noise: f64,
    seen: RefCell<Option<EngineRequest>>,
}

impl FakeEngine {
    fn new(truth: MlnData, noise: f64) -> Self {
        Self {
            truth,
            noise,
            seen: RefCell::new(None),
        }
    }

    /// Draws of `Lambda`, `Sigma`, `eta` and `lp__` around the true values.
    fn draws(&self, chains: usize, seed: u64) -> DrawTable {
        let truth = self.truth.truth.as_ref().expect("simulated data carries truth");
        let mut rng = SmallRng::seed_from_u64(seed);
        let n = DRAWS_PER_CHAIN * chains;
        let mut arrays = BTreeMap::new();
        arrays.insert(
            "lp__".to_string(),
            ArrayD::from_shape_simple_fn(IxDyn(&[n]), || -100.0 + rng.sample::<f64, _>(StandardNormal)),
        );
        for (name, value) in truth.named() {
            let mut shape = vec![n];
            shape.extend_from_slice(value.shape());
            let mut array = ArrayD::<f64>::zeros(IxDyn(&shape));
            for mut draw in array.axis_iter_mut(Axis(0)) {
                for (cell, &v) in draw.iter_mut().zip(value.iter()) {
                    let e: f64 = rng.sample(StandardNormal);
                    *cell = v + self.noise * e;
                }
            }
            arrays.insert(name.to_string(), array);
        }
        let chain_ids = (1..=chains)
            .flat_map(|k| std::iter::repeat(k).take(DRAWS_PER_CHAIN))
            .collect();
        flatten(&arrays)
            .and_then(|t| t.with_chain_ids(chain_ids))
            .expect("fake draws are well-formed")
    }
}

impl Engine for FakeEngine {
    fn run(&self, request: &EngineRequest) -> Result<EngineOutput, EngineError> {
        *self.seen.borrow_mut() = Some(request.clone());
        Ok(EngineOutput {
            draws: self.draws(request.chains, request.seed),
            timings: Vec::new(),
            console: String::new(),
            output_files: Vec::new(),
        })
    }
}

struct FailingEngine;

impl Engine for FailingEngine {
    fn run(&self, request: &EngineRequest) -> Result<EngineOutput, EngineError> {
        Err(EngineError::ModelNotFound(request.model.clone()))
    }
}

fn dataset() -> MlnData {
    simulate(&SimulationSpec {
        d: 4,
        n: 8,
        q: 2,
        depth: 500.0,
        seed: 17,
    })
    .unwrap()
}

fn sampling_config() -> RunConfig {
    let mut config = RunConfig::new(Parameterization::Uncollapsed, Algorithm::Sampling);
    config.chains = 3;
    config.iter = 400;
    config.seed = Some(2024);
    config
}

#[test]
fn test_sampling_fit_reshapes_and_scores() {
    let data = dataset();
    let engine = FakeEngine::new(data.clone(), 0.1);
    let fitted = fit_mln(&engine, Arc::new(data), &sampling_config()).unwrap();
    let Fitted::Mln(fit) = fitted else {
        panic!("expected a reshaped fit");
    };

    assert_eq!((fit.d, fit.n, fit.q), (4, 8, 2));
    assert_eq!(fit.iter, 3 * DRAWS_PER_CHAIN);
    assert_eq!(fit.param("Lambda").unwrap().shape(), &[600, 3, 2]);
    assert_eq!(fit.param("Sigma").unwrap().shape(), &[600, 3, 3]);
    assert_eq!(fit.param("eta").unwrap().shape(), &[600, 3, 8]);
    assert_eq!(fit.metadata.seed, 2024);

    let truth = fit.data.truth.clone().unwrap();
    let lambda_mean = fit.posterior_mean("Lambda").unwrap();
    let lambda_true = truth.lambda.unwrap().into_dyn();
    for (est, actual) in lambda_mean.iter().zip(lambda_true.iter()) {
        assert_abs_diff_eq!(*est, *actual, epsilon = 0.05);
    }

    let ess = fit.metadata.ess.expect("sampling runs report ESS");
    assert_eq!(ess.n_params, 3 * 2 + 3 * 3 + 3 * 8);
    assert!(ess.min > 100.0, "min ess = {}", ess.min);
    assert!((ess.max_rhat - 1.0).abs() < 0.1, "max rhat = {}", ess.max_rhat);

    let names: Vec<&str> = fit.metadata.errors.iter().map(|m| m.parameter.as_str()).collect();
    assert_eq!(names, vec!["Lambda", "Sigma", "eta"]);
    for metric in &fit.metadata.errors {
        assert!(metric.rmse < 0.05, "{} rmse = {}", metric.parameter, metric.rmse);
        assert!(metric.mae <= metric.rmse + 1e-12);
    }
}

#[test]
fn test_request_carries_data_and_init() {
    let data = dataset();
    let engine = FakeEngine::new(data.clone(), 0.1);
    fit_mln(&engine, Arc::new(data), &sampling_config()).unwrap();

    let request = engine.seen.borrow().clone().unwrap();
    assert_eq!(request.chains, 3);
    assert_eq!(request.warmup, 200);
    assert!(request.model.ends_with("mln_uncollapsed") || request.model.ends_with("mln_uncollapsed.exe"));
    assert_eq!(request.data["D"], 4);
    assert!(request.data.get("truth").is_none());
    assert!(request.init.get("eta").is_some());
    assert!(request.init.get("Lambda").is_some());
    assert!(request.init.get("Sigma").is_some());
}

#[test]
fn test_pars_filter_limits_params() {
    let data = dataset();
    let engine = FakeEngine::new(data.clone(), 0.1);
    let mut config = sampling_config();
    config.pars = Some(vec!["Lambda".to_string()]);
    let Fitted::Mln(fit) = fit_mln(&engine, Arc::new(data), &config).unwrap() else {
        panic!("expected a reshaped fit");
    };
    assert_eq!(fit.params.keys().collect::<Vec<_>>(), vec!["Lambda"]);
    // Metrics only cover what was kept.
    assert_eq!(fit.metadata.errors.len(), 1);
}

#[test]
fn test_ret_raw_returns_engine_output() {
    let data = dataset();
    let engine = FakeEngine::new(data.clone(), 0.1);
    let mut config = sampling_config();
    config.ret_raw = true;
    let Fitted::Raw(raw) = fit_mln(&engine, Arc::new(data), &config).unwrap() else {
        panic!("expected raw output");
    };
    assert_eq!(raw.draws.n_draws(), 3 * DRAWS_PER_CHAIN);
    assert!(raw.draws.column("Lambda[1,1]").is_some());
    assert_eq!(raw.draws.chain_ids().map(|ids| ids[DRAWS_PER_CHAIN]), Some(2));
}

#[test]
fn test_variational_fit_skips_ess() {
    let data = dataset();
    let engine = FakeEngine::new(data.clone(), 0.1);
    let mut config = RunConfig::new(
        Parameterization::Collapsed,
        Algorithm::Variational(VariationalFamily::Fullrank),
    );
    config.seed = Some(1);
    let Fitted::Mln(fit) = fit_mln(&engine, Arc::new(data), &config).unwrap() else {
        panic!("expected a reshaped fit");
    };
    assert!(fit.metadata.ess.is_none());
    assert_eq!(fit.iter, DRAWS_PER_CHAIN);
    let request = engine.seen.borrow().clone().unwrap();
    assert_eq!(request.chains, 1);
    assert_eq!(request.init.get("Lambda"), None);
}

#[test]
fn test_summary_serializes_means() {
    let data = dataset();
    let engine = FakeEngine::new(data.clone(), 0.1);
    let Fitted::Mln(fit) = fit_mln(&engine, Arc::new(data), &sampling_config()).unwrap() else {
        panic!("expected a reshaped fit");
    };
    let json = serde_json::to_value(fit.summary()).unwrap();
    assert_eq!(json["algorithm"], "sampling");
    assert_eq!(json["parameterization"], "uncollapsed");
    assert_eq!(json["params"]["Sigma"]["shape"], serde_json::json!([600, 3, 3]));
    assert!(json["ess"]["min"].as_f64().is_some());
}

#[test]
fn test_engine_error_is_passed_through() {
    let err = fit_mln(&FailingEngine, Arc::new(dataset()), &sampling_config()).unwrap_err();
    assert!(matches!(err, FitError::Engine(EngineError::ModelNotFound(_))));
}

#[test]
fn test_invalid_config_never_reaches_engine() {
    let data = dataset();
    let engine = FakeEngine::new(data.clone(), 0.1);
    let mut config = sampling_config();
    config.chains = 0;
    assert!(matches!(
        fit_mln(&engine, Arc::new(data), &config),
        Err(FitError::Config(_))
    ));
    assert!(engine.seen.borrow().is_none());
}

#[test]
fn test_posterior_mean_of_unknown_param() {
    let data = dataset();
    let engine = FakeEngine::new(data.clone(), 0.0);
    let Fitted::Mln(fit) = fit_mln(&engine, Arc::new(data), &sampling_config()).unwrap() else {
        panic!("expected a reshaped fit");
    };
    assert!(fit.posterior_mean("nope").is_none());
    let sigma = fit.posterior_mean("Sigma").unwrap();
    let expected: Array2<f64> = Array2::eye(3);
    assert_eq!(sigma, expected.into_dyn());
}
