use ndarray::{Array1, Array2, ArrayView1, s};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, Range};

/// One layer's coefficient vector for a single output column.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coefficients(pub Array1<f64>);

impl Coefficients {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    /// Joins per-block solutions back into one vector, preserving block order.
    pub fn concat(parts: &[Array1<f64>]) -> Self {
        let total = parts.iter().map(Array1::len).sum();
        let mut values = Vec::with_capacity(total);
        for part in parts {
            values.extend(part.iter().copied());
        }
        Self(Array1::from_vec(values))
    }

    pub fn segment(&self, range: Range<usize>) -> ArrayView1<'_, f64> {
        self.0.slice(s![range])
    }

    pub fn into_inner(self) -> Array1<f64> {
        self.0
    }

    pub fn as_view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }
}

impl Deref for Coefficients {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Weighted sums of pre-transformed regressors, before the link's
/// `post_aggregate` is applied. Shape: `[n_rows, n_groups]`.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerSums(Array2<f64>);

impl LayerSums {
    pub fn zeros(rows: usize, groups: usize) -> Self {
        Self(Array2::zeros((rows, groups)))
    }

    /// Writes the sums of one group (an input column or a block).
    pub fn set_group(&mut self, group: usize, sums: ArrayView1<f64>) {
        self.0.column_mut(group).assign(&sums);
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.0
    }
}
