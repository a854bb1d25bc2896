//! Min-max scaling of every column onto `[0, 1]`.

use crate::fit::config::ColumnLayout;
use crate::fit::data::Dataset;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip, s};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error(
        "Column {column} is constant (every value equals {value}); it cannot be rescaled to [0, 1]."
    )]
    DegenerateColumn { column: usize, value: f64 },
}

/// Per-column minimum and maximum of the raw data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnScaling {
    pub min: Array1<f64>,
    pub max: Array1<f64>,
}

impl ColumnScaling {
    /// Records the range of every column. A constant column is an error.
    pub fn fit(data: ArrayView2<f64>) -> Result<Self, NormalizeError> {
        let min = data.fold_axis(Axis(0), f64::INFINITY, |&acc, &v| acc.min(v));
        let max = data.fold_axis(Axis(0), f64::NEG_INFINITY, |&acc, &v| acc.max(v));
        if let Some(column) = (0..min.len()).find(|&j| max[j] - min[j] <= 0.0) {
            return Err(NormalizeError::DegenerateColumn {
                column,
                value: min[column],
            });
        }
        Ok(Self { min, max })
    }

    pub fn len(&self) -> usize {
        self.min.len()
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_empty()
    }

    /// Scaling for a contiguous subset of columns.
    pub fn columns(&self, range: Range<usize>) -> Self {
        Self {
            min: self.min.slice(s![range.clone()]).to_owned(),
            max: self.max.slice(s![range]).to_owned(),
        }
    }

    pub fn normalize(&self, data: ArrayView2<f64>) -> Array2<f64> {
        let mut out = data.to_owned();
        for mut row in out.rows_mut() {
            Zip::from(&mut row)
                .and(&self.min)
                .and(&self.max)
                .for_each(|v, &lo, &hi| *v = (*v - lo) / (hi - lo));
        }
        out
    }

    pub fn denormalize(&self, data: ArrayView2<f64>) -> Array2<f64> {
        let mut out = data.to_owned();
        for mut row in out.rows_mut() {
            Zip::from(&mut row)
                .and(&self.min)
                .and(&self.max)
                .for_each(|v, &lo, &hi| *v = *v * (hi - lo) + lo);
        }
        out
    }

    pub fn normalize_row(&self, row: ArrayView1<f64>) -> Array1<f64> {
        self.normalize(row.insert_axis(Axis(0))).remove_axis(Axis(0))
    }

    pub fn denormalize_row(&self, row: ArrayView1<f64>) -> Array1<f64> {
        self.denormalize(row.insert_axis(Axis(0))).remove_axis(Axis(0))
    }
}

/// The dataset rescaled column by column, with the scaling needed to undo it.
#[derive(Debug, Clone)]
pub struct NormalizedDataset {
    values: Array2<f64>,
    scaling: ColumnScaling,
    layout: ColumnLayout,
}

impl NormalizedDataset {
    pub fn inputs(&self) -> ArrayView2<'_, f64> {
        self.values.slice(s![.., self.layout.input_range()])
    }

    pub fn outputs(&self) -> ArrayView2<'_, f64> {
        self.values.slice(s![.., self.layout.output_range()])
    }

    pub fn input_scaling(&self) -> ColumnScaling {
        self.scaling.columns(self.layout.input_range())
    }

    pub fn output_scaling(&self) -> ColumnScaling {
        self.scaling.columns(self.layout.output_range())
    }
}

pub fn normalize_dataset(dataset: &Dataset) -> Result<NormalizedDataset, NormalizeError> {
    let scaling = ColumnScaling::fit(dataset.values())?;
    let values = scaling.normalize(dataset.values());
    Ok(NormalizedDataset {
        values,
        scaling,
        layout: *dataset.layout(),
    })
}
