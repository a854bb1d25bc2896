//! # Forecasting
//!
//! Extrapolates every raw input column with a [`Forecaster`], runs the
//! extrapolated rows through a [`Predictor`], and writes the predicted outputs
//! over the last `horizon` rows of a copy of the observed outputs.

use crate::fit::data::Dataset;
use crate::fit::link::AggregationLink;
use crate::fit::model::{ModelError, Predictor};
use ndarray::{Array1, Array2, ArrayView1, s};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Forecaster failed: {0}")]
    Forecaster(String),

    #[error("Forecast horizon {horizon} is outside 1..={rows} for a series of {rows} rows.")]
    InvalidHorizon { horizon: usize, rows: usize },

    #[error("Forecaster returned {found} values for input column {column}, expected {expected}.")]
    WrongLength {
        column: usize,
        expected: usize,
        found: usize,
    },

    #[error("Prediction on extrapolated inputs failed: {0}")]
    Model(#[from] ModelError),
}

/// Extrapolates a single series `horizon` steps past its end.
pub trait Forecaster: Send + Sync {
    fn forecast(&self, series: ArrayView1<f64>, horizon: usize)
    -> Result<Array1<f64>, ForecastError>;
}

/// Least-squares straight line through `(t, series[t])`, continued forward.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearTrendForecaster;

impl Forecaster for LinearTrendForecaster {
    fn forecast(
        &self,
        series: ArrayView1<f64>,
        horizon: usize,
    ) -> Result<Array1<f64>, ForecastError> {
        let n = series.len();
        if n < 2 {
            return Err(ForecastError::Forecaster(format!(
                "a linear trend needs at least 2 points, got {n}"
            )));
        }
        let t_mean = (n - 1) as f64 / 2.0;
        let y_mean = series.sum() / n as f64;
        let (sxy, sxx) = series
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(sxy, sxx), (t, &y)| {
                let dt = t as f64 - t_mean;
                (sxy + dt * (y - y_mean), sxx + dt * dt)
            });
        let slope = sxy / sxx;
        let intercept = y_mean - slope * t_mean;
        Ok(Array1::from_shape_fn(horizon, |k| {
            intercept + slope * (n + k) as f64
        }))
    }
}

/// The extrapolated inputs and the outputs with forecasts spliced in.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastResult {
    /// `[horizon, n_inputs]`, row `k` holds step `k + 1`.
    pub inputs: Array2<f64>,
    /// The observed outputs with the last `horizon` rows replaced by predictions.
    pub outputs: Array2<f64>,
}

pub struct ForecastAdapter<'m, F: Forecaster + ?Sized, L: AggregationLink + ?Sized> {
    predictor: Predictor<'m, L>,
    forecaster: &'m F,
}

impl<'m, F: Forecaster + ?Sized, L: AggregationLink + ?Sized> ForecastAdapter<'m, F, L> {
    pub fn new(predictor: Predictor<'m, L>, forecaster: &'m F) -> Self {
        Self {
            predictor,
            forecaster,
        }
    }

    /// Step `k` (1-based) lands in row `n - horizon + k - 1`, so the spliced
    /// rows stay in chronological order. The model and dataset are untouched.
    pub fn forecast(
        &self,
        dataset: &Dataset,
        horizon: usize,
    ) -> Result<ForecastResult, ForecastError> {
        let rows = dataset.nrows();
        if horizon == 0 || horizon > rows {
            return Err(ForecastError::InvalidHorizon { horizon, rows });
        }

        let observed = dataset.inputs();
        let mut inputs = Array2::zeros((horizon, observed.ncols()));
        for (column, series) in observed.columns().into_iter().enumerate() {
            let extrapolated = self.forecaster.forecast(series, horizon)?;
            if extrapolated.len() != horizon {
                return Err(ForecastError::WrongLength {
                    column,
                    expected: horizon,
                    found: extrapolated.len(),
                });
            }
            inputs.column_mut(column).assign(&extrapolated);
        }
        log::debug!(
            "Extrapolated {} input column(s) {} step(s) ahead.",
            observed.ncols(),
            horizon
        );

        let predicted = self.predictor.predict_matrix(inputs.view())?;
        let mut outputs = dataset.outputs().to_owned();
        outputs.slice_mut(s![rows - horizon.., ..]).assign(&predicted);
        log::info!(
            "Forecast {} step(s); rows {}..{} of the outputs replaced.",
            horizon,
            rows - horizon,
            rows
        );

        Ok(ForecastResult { inputs, outputs })
    }
}
