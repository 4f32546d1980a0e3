//! The data payload handed to the engine.
//!
//! Shapes follow the model's conventions: `Y` is `D x N` counts, `X` is
//! `Q x N` covariates, `Theta` is `(D-1) x Q`, `Gamma` is `Q x Q` and `Xi` is
//! `(D-1) x (D-1)`. Ground truth, when known, travels with the data for
//! evaluation but is never sent to the engine.

use std::error::Error;
use std::fs;
use std::path::Path;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::DataError;

/// Known parameter values of a simulated dataset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrueParams {
    #[serde(rename = "Lambda", default, with = "rows_opt")]
    pub lambda: Option<Array2<f64>>,
    #[serde(rename = "Sigma", default, with = "rows_opt")]
    pub sigma: Option<Array2<f64>>,
    #[serde(rename = "Eta", default, with = "rows_opt")]
    pub eta: Option<Array2<f64>>,
}

impl TrueParams {
    /// `(model parameter name, value)` pairs for the values that are present.
    pub fn named(&self) -> Vec<(&'static str, &Array2<f64>)> {
        [
            ("Lambda", self.lambda.as_ref()),
            ("Sigma", self.sigma.as_ref()),
            ("eta", self.eta.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }
}

/// Counts, covariates and prior hyperparameters of an MLN regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlnData {
    #[serde(rename = "Y", with = "rows")]
    pub y: Array2<u64>,
    #[serde(rename = "X", with = "rows")]
    pub x: Array2<f64>,
    pub upsilon: f64,
    #[serde(rename = "Theta", with = "rows")]
    pub theta: Array2<f64>,
    #[serde(rename = "Gamma", with = "rows")]
    pub gamma: Array2<f64>,
    #[serde(rename = "Xi", with = "rows")]
    pub xi: Array2<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truth: Option<TrueParams>,
}

impl MlnData {
    /**
    Builds a dataset with default priors:
    `upsilon = D + 3`, `Theta = 0`, `Gamma = I_Q`, `Xi = (upsilon - D) I_{D-1}`.

    ```rust
    use mlnfit::data::MlnData;
    use ndarray::arr2;

    let y = arr2(&[[3u64, 0, 5], [1, 4, 2], [6, 6, 1]]);
    let x = arr2(&[[1.0, 1.0, 1.0]]);
    let data = MlnData::new(y, x)?;
    assert_eq!((data.d(), data.n(), data.q()), (3, 3, 1));
    assert_eq!(data.upsilon, 6.0);
    # Ok::<(), mlnfit::error::DataError>(())
    ```
    */
    pub fn new(y: Array2<u64>, x: Array2<f64>) -> Result<Self, DataError> {
        let d = y.nrows();
        let q = x.nrows();
        if d < 2 {
            return Err(DataError::TooFewCategories(d));
        }
        let upsilon = d as f64 + 3.0;
        let data = Self {
            y,
            x,
            upsilon,
            theta: Array2::zeros((d - 1, q)),
            gamma: Array2::eye(q),
            xi: Array2::eye(d - 1) * (upsilon - d as f64),
            truth: None,
        };
        data.validate()?;
        Ok(data)
    }

    /// Replaces the prior hyperparameters.
    pub fn with_priors(
        mut self,
        upsilon: f64,
        theta: Array2<f64>,
        gamma: Array2<f64>,
        xi: Array2<f64>,
    ) -> Result<Self, DataError> {
        self.upsilon = upsilon;
        self.theta = theta;
        self.gamma = gamma;
        self.xi = xi;
        self.validate()?;
        Ok(self)
    }

    /// Attaches ground truth for evaluation.
    pub fn with_truth(mut self, truth: TrueParams) -> Result<Self, DataError> {
        self.truth = Some(truth);
        self.validate()?;
        Ok(self)
    }

    /// Number of categories.
    pub fn d(&self) -> usize {
        self.y.nrows()
    }

    /// Number of samples.
    pub fn n(&self) -> usize {
        self.y.ncols()
    }

    /// Number of covariates.
    pub fn q(&self) -> usize {
        self.x.nrows()
    }

    pub fn validate(&self) -> Result<(), DataError> {
        let (d, n, q) = (self.d(), self.n(), self.q());
        if d < 2 {
            return Err(DataError::TooFewCategories(d));
        }
        if self.x.ncols() != n {
            return Err(DataError::SampleCountMismatch {
                y: n,
                x: self.x.ncols(),
            });
        }
        check_shape("Theta", self.theta.view(), (d - 1, q))?;
        check_shape("Gamma", self.gamma.view(), (q, q))?;
        check_shape("Xi", self.xi.view(), (d - 1, d - 1))?;
        let min = d as f64 - 2.0;
        if self.upsilon.is_nan() || self.upsilon <= min {
            return Err(DataError::Upsilon {
                upsilon: self.upsilon,
                min,
            });
        }
        if let Some(truth) = &self.truth {
            if let Some(lambda) = &truth.lambda {
                check_shape("Lambda", lambda.view(), (d - 1, q))?;
            }
            if let Some(sigma) = &truth.sigma {
                check_shape("Sigma", sigma.view(), (d - 1, d - 1))?;
            }
            if let Some(eta) = &truth.eta {
                check_shape("Eta", eta.view(), (d - 1, n))?;
            }
        }
        Ok(())
    }

    /// The engine's data object. Matrices are nested row arrays; ground truth is left out.
    pub fn to_stan_json(&self) -> Value {
        json!({
            "D": self.d(),
            "N": self.n(),
            "Q": self.q(),
            "Y": nested_rows(self.y.view()),
            "X": nested_rows(self.x.view()),
            "upsilon": self.upsilon,
            "Theta": nested_rows(self.theta.view()),
            "Gamma": nested_rows(self.gamma.view()),
            "Xi": nested_rows(self.xi.view()),
        })
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let text = fs::read_to_string(path)?;
        let data: MlnData = serde_json::from_str(&text)?;
        data.validate()?;
        Ok(data)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error + Send + Sync>> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn check_shape(
    name: &'static str,
    array: ArrayView2<'_, f64>,
    expected: (usize, usize),
) -> Result<(), DataError> {
    if array.dim() != expected {
        return Err(DataError::BadShape {
            name,
            expected: vec![expected.0, expected.1],
            found: array.shape().to_vec(),
        });
    }
    Ok(())
}

pub(crate) fn nested_rows<T: Clone>(array: ArrayView2<'_, T>) -> Vec<Vec<T>> {
    array.outer_iter().map(|row| row.to_vec()).collect()
}

/// Serde adapter storing a matrix as an array of rows.
mod rows {
    use ndarray::Array2;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(array: &Array2<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize + Clone,
    {
        super::nested_rows(array.view()).serialize(serializer)
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Array2<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Clone,
    {
        let rows: Vec<Vec<T>> = Vec::deserialize(deserializer)?;
        from_rows(rows).map_err(D::Error::custom)
    }

    pub fn from_rows<T: Clone>(rows: Vec<Vec<T>>) -> Result<Array2<T>, String> {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != n_cols) {
            return Err("matrix rows have different lengths".to_string());
        }
        let flat: Vec<T> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((n_rows, n_cols), flat).map_err(|e| e.to_string())
    }
}

mod rows_opt {
    use ndarray::Array2;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(array: &Option<Array2<f64>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        array
            .as_ref()
            .map(|a| super::nested_rows(a.view()))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Array2<f64>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let rows: Option<Vec<Vec<f64>>> = Option::deserialize(deserializer)?;
        rows.map(super::rows::from_rows)
            .transpose()
            .map_err(D::Error::custom)
    }
}
