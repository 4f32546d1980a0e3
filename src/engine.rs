/*!
# External engine boundary

The statistical work is done by a compiled CmdStan model executable. This
module only prepares its input files, invokes it, waits for it and reads
back the flat draw table.

[`Engine`] is the seam: [`CmdStan`] drives the real executable, and tests or
alternative backends can implement the trait to hand back draws directly.

Files written to the working directory:

| file              | content                                   |
|-------------------|-------------------------------------------|
| `data.json`       | [`EngineRequest::data`]                   |
| `init.json`       | [`EngineRequest::init`]                   |
| `output.csv`      | draws, single chain                       |
| `output_<k>.csv`  | draws of chain `k` when running several   |
*/

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use rand::{thread_rng, Rng};
use serde_json::Value;

use crate::config::{Algorithm, RunConfig};
use crate::error::EngineError;
use crate::io::csv::{read_stan_csv_chains, EngineTiming};
use crate::reshape::DrawTable;

/// Everything the engine needs for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRequest {
    /// Compiled model executable.
    pub model: PathBuf,
    pub data: Value,
    pub init: Value,
    pub algorithm: Algorithm,
    pub chains: usize,
    pub iter: usize,
    pub warmup: usize,
    pub seed: u64,
    pub output_samples: usize,
}

impl EngineRequest {
    /// Builds a request from a run configuration; a random seed is drawn when
    /// the configuration has none.
    pub fn from_config(config: &RunConfig, data: Value, init: Value) -> Self {
        let seed = config.seed.unwrap_or_else(|| thread_rng().gen::<u32>() as u64);
        Self {
            model: config.parameterization.executable(&config.model_dir),
            data,
            init,
            algorithm: config.algorithm,
            chains: config.effective_chains(),
            iter: config.iter,
            warmup: config.warmup(),
            seed,
            output_samples: config.output_samples,
        }
    }
}

/// What the engine hands back: the flat draws plus whatever it reported on the side.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    pub draws: DrawTable,
    /// Elapsed-time blocks, one per chain that reported one.
    pub timings: Vec<EngineTiming>,
    /// Captured standard output of the engine.
    pub console: String,
    /// Output files read; gone after the call if the engine used a temporary directory.
    pub output_files: Vec<PathBuf>,
}

/// Anything that can turn an [`EngineRequest`] into draws.
pub trait Engine {
    fn run(&self, request: &EngineRequest) -> Result<EngineOutput, EngineError>;
}

/// Drives a compiled CmdStan model executable.
#[derive(Debug, Clone, Default)]
pub struct CmdStan {
    output_dir: Option<PathBuf>,
    show_progress: bool,
}

impl CmdStan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the engine's files in `dir` instead of a temporary directory.
    pub fn with_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Shows a spinner while the engine runs.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /**
    Command-line arguments for `request`, with input and output files in `workdir`.

    ```rust
    use mlnfit::config::Algorithm;
    use mlnfit::engine::{CmdStan, EngineRequest};
    use std::path::Path;

    let request = EngineRequest {
        model: "models/mln_collapsed".into(),
        data: serde_json::json!({}),
        init: serde_json::json!({}),
        algorithm: Algorithm::Optimizing,
        chains: 1,
        iter: 2000,
        warmup: 1000,
        seed: 3,
        output_samples: 1000,
    };
    let args = CmdStan::arguments(&request, Path::new("/tmp/run"));
    assert_eq!(&args[..3], &["optimize", "algorithm=lbfgs", "iter=2000"]);
    assert!(args.contains(&"seed=3".to_string()));
    ```
    */
    pub fn arguments(request: &EngineRequest, workdir: &Path) -> Vec<String> {
        let mut args: Vec<String> = match request.algorithm {
            Algorithm::Sampling => {
                let mut method = vec![
                    "sample".to_string(),
                    format!("num_samples={}", request.iter.saturating_sub(request.warmup)),
                    format!("num_warmup={}", request.warmup),
                ];
                if request.chains > 1 {
                    method.push(format!("num_chains={}", request.chains));
                }
                method
            }
            Algorithm::Variational(family) => vec![
                "variational".to_string(),
                format!("algorithm={family}"),
                format!("iter={}", request.iter),
                format!("output_samples={}", request.output_samples),
            ],
            Algorithm::Optimizing => vec![
                "optimize".to_string(),
                "algorithm=lbfgs".to_string(),
                format!("iter={}", request.iter),
            ],
        };
        args.extend([
            "data".to_string(),
            format!("file={}", workdir.join("data.json").display()),
            format!("init={}", workdir.join("init.json").display()),
            "output".to_string(),
            format!("file={}", workdir.join("output.csv").display()),
            "random".to_string(),
            format!("seed={}", request.seed),
        ]);
        args
    }

    /// Paths the engine writes its draws to.
    pub fn output_files(request: &EngineRequest, workdir: &Path) -> Vec<PathBuf> {
        if request.algorithm.is_sampling() && request.chains > 1 {
            (1..=request.chains)
                .map(|k| workdir.join(format!("output_{k}.csv")))
                .collect()
        } else {
            vec![workdir.join("output.csv")]
        }
    }

    fn run_in(&self, request: &EngineRequest, workdir: &Path) -> Result<EngineOutput, EngineError> {
        fs::write(workdir.join("data.json"), serde_json::to_string(&request.data)?)?;
        fs::write(workdir.join("init.json"), serde_json::to_string(&request.init)?)?;

        let args = Self::arguments(request, workdir);
        tracing::debug!(model = %request.model.display(), ?args, "invoking engine");

        let pb = if self.show_progress {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {msg}") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        } else {
            ProgressBar::hidden()
        };
        pb.set_message(format!("{} ({} chain(s))", request.algorithm, request.chains));

        let started = Instant::now();
        let output = Command::new(&request.model)
            .args(&args)
            .current_dir(workdir)
            .output();
        pb.finish_and_clear();
        let output = output?;

        if !output.status.success() {
            return Err(EngineError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let files = Self::output_files(request, workdir);
        let parsed = read_stan_csv_chains(&files)?;
        let draws = match request.algorithm {
            // The first row of ADVI output is the mean of the approximation.
            Algorithm::Variational(_) => parsed.table.skip_rows(1),
            _ => parsed.table,
        };
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            draws = draws.n_draws(),
            columns = draws.n_columns(),
            "engine finished"
        );

        Ok(EngineOutput {
            draws,
            timings: parsed.timings,
            console: String::from_utf8_lossy(&output.stdout).into_owned(),
            output_files: files,
        })
    }
}

impl Engine for CmdStan {
    fn run(&self, request: &EngineRequest) -> Result<EngineOutput, EngineError> {
        if !request.model.is_file() {
            return Err(EngineError::ModelNotFound(request.model.clone()));
        }
        tracing::info!(
            model = %request.model.display(),
            algorithm = %request.algorithm,
            chains = request.chains,
            seed = request.seed,
            "starting engine"
        );

        match &self.output_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                self.run_in(request, dir)
            }
            None => {
                let dir = tempfile::tempdir()?;
                self.run_in(request, dir.path())
            }
        }
    }
}
