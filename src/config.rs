//! Run configuration: which model to run, with which algorithm, for how long.
//!
//! A [`RunConfig`] is usually loaded from JSON:
//!
//! ```rust
//! use mlnfit::config::{Algorithm, Parameterization, RunConfig};
//!
//! let config: RunConfig = serde_json::from_str(
//!     r#"{ "parameterization": "collapsed", "algorithm": "sampling", "chains": 2, "iter": 500 }"#,
//! )?;
//! assert_eq!(config.parameterization, Parameterization::Collapsed);
//! assert_eq!(config.algorithm, Algorithm::Sampling);
//! assert_eq!(config.warmup(), 250);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which model file the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Parameterization {
    /// `Lambda` and `Sigma` integrated out; only `eta` is sampled.
    Collapsed,
    /// `eta`, `Lambda` and `Sigma` are all sampled.
    Uncollapsed,
}

impl Parameterization {
    /// File stem of the model, without extension.
    pub fn model_stem(&self) -> &'static str {
        match self {
            Parameterization::Collapsed => "mln_collapsed",
            Parameterization::Uncollapsed => "mln_uncollapsed",
        }
    }

    /// Path of the compiled model executable inside `model_dir`.
    pub fn executable(&self, model_dir: &Path) -> PathBuf {
        let path = model_dir.join(self.model_stem());
        if cfg!(windows) {
            path.with_extension("exe")
        } else {
            path
        }
    }

    /// Path of the model source inside `model_dir`.
    pub fn source(&self, model_dir: &Path) -> PathBuf {
        model_dir.join(self.model_stem()).with_extension("stan")
    }
}

impl FromStr for Parameterization {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "collapsed" => Ok(Parameterization::Collapsed),
            "uncollapsed" => Ok(Parameterization::Uncollapsed),
            _ => Err(ConfigError::UnknownParameterization(s.to_string())),
        }
    }
}

impl TryFrom<String> for Parameterization {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Parameterization> for String {
    fn from(value: Parameterization) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Parameterization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameterization::Collapsed => write!(f, "collapsed"),
            Parameterization::Uncollapsed => write!(f, "uncollapsed"),
        }
    }
}

/// ADVI flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariationalFamily {
    Meanfield,
    Fullrank,
}

impl FromStr for VariationalFamily {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "meanfield" => Ok(VariationalFamily::Meanfield),
            "fullrank" => Ok(VariationalFamily::Fullrank),
            _ => Err(ConfigError::UnknownVariational(s.to_string())),
        }
    }
}

impl fmt::Display for VariationalFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariationalFamily::Meanfield => write!(f, "meanfield"),
            VariationalFamily::Fullrank => write!(f, "fullrank"),
        }
    }
}

/// Inference backend of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// NUTS Hamiltonian Monte Carlo.
    Sampling,
    /// Automatic differentiation variational inference.
    Variational(VariationalFamily),
    /// L-BFGS MAP estimate; produces a single draw.
    Optimizing,
}

impl Algorithm {
    pub fn is_sampling(&self) -> bool {
        matches!(self, Algorithm::Sampling)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Sampling => write!(f, "sampling"),
            Algorithm::Variational(family) => write!(f, "variational ({family})"),
            Algorithm::Optimizing => write!(f, "optimizing"),
        }
    }
}

fn default_chains() -> usize {
    4
}

fn default_iter() -> usize {
    2000
}

fn default_output_samples() -> usize {
    1000
}

fn default_pseudocount() -> f64 {
    0.65
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

/// Everything the fitting layer needs besides the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub parameterization: Parameterization,
    pub algorithm: Algorithm,
    #[serde(default = "default_chains")]
    pub chains: usize,
    /// Total iterations per chain, warm-up included (sampling), or the
    /// iteration cap (variational, optimizing).
    #[serde(default = "default_iter")]
    pub iter: usize,
    /// Warm-up iterations; half of `iter` when absent.
    #[serde(default)]
    pub warmup: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Base names to keep when reshaping; everything when absent.
    #[serde(default)]
    pub pars: Option<Vec<String>>,
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    /// Where the engine writes its files; a temporary directory when absent.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Return the engine output as-is instead of a reshaped fit.
    #[serde(default)]
    pub ret_raw: bool,
    /// Number of approximate posterior draws for variational runs.
    #[serde(default = "default_output_samples")]
    pub output_samples: usize,
    /// Added to every count before the log-ratio transform of the initial values.
    #[serde(default = "default_pseudocount")]
    pub pseudocount: f64,
}

impl RunConfig {
    /// A configuration with the defaults for everything but the model and algorithm.
    pub fn new(parameterization: Parameterization, algorithm: Algorithm) -> Self {
        Self {
            parameterization,
            algorithm,
            chains: default_chains(),
            iter: default_iter(),
            warmup: None,
            seed: None,
            pars: None,
            model_dir: default_model_dir(),
            output_dir: None,
            ret_raw: false,
            output_samples: default_output_samples(),
            pseudocount: default_pseudocount(),
        }
    }

    /// Loads a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let text = fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn warmup(&self) -> usize {
        self.warmup.unwrap_or(self.iter / 2)
    }

    /// Post-warm-up draws per chain for sampling runs.
    pub fn num_samples(&self) -> usize {
        self.iter.saturating_sub(self.warmup())
    }

    /// Engine chain count; non-sampling algorithms always run a single chain.
    pub fn effective_chains(&self) -> usize {
        if self.algorithm.is_sampling() {
            self.chains
        } else {
            1
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains == 0 {
            return Err(ConfigError::NotPositive("chains"));
        }
        if self.iter == 0 {
            return Err(ConfigError::NotPositive("iter"));
        }
        if matches!(self.algorithm, Algorithm::Variational(_)) && self.output_samples == 0 {
            return Err(ConfigError::NotPositive("output_samples"));
        }
        if !self.pseudocount.is_finite() || self.pseudocount <= 0.0 {
            return Err(ConfigError::NotPositive("pseudocount"));
        }
        if self.algorithm.is_sampling() && self.warmup() >= self.iter {
            return Err(ConfigError::WarmupTooLong {
                warmup: self.warmup(),
                iter: self.iter,
            });
        }
        Ok(())
    }
}
