//! The forward chain from transformed design matrix to output, one layer at a time.
//!
//! Fitting and prediction both run every layer through these functions, so a
//! fitted model applied to its own training rows reproduces the fitted values.

use crate::fit::basis::BasisLayout;
use crate::fit::config::{ColumnLayout, NUM_BLOCKS};
use crate::fit::link::AggregationLink;
use crate::fit::types::{Coefficients, LayerSums};
use ndarray::{Array1, Array2, ArrayView2, s};

/// A layer's output after `post_aggregate`, and the same values after
/// `pre_transform`, ready to act as regressors for the next layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregated {
    pub aggregated: Array2<f64>,
    pub transformed: Array2<f64>,
}

impl Aggregated {
    fn from_sums<L: AggregationLink + ?Sized>(sums: LayerSums, link: &L) -> Self {
        let aggregated = sums.into_inner().mapv(|s| link.post_aggregate(s));
        let transformed = aggregated.mapv(|v| link.pre_transform(v));
        Self {
            aggregated,
            transformed,
        }
    }
}

/// Applies `pre_transform` to every entry of the raw design matrix.
pub fn transform_design<L: AggregationLink + ?Sized>(
    design: ArrayView2<f64>,
    link: &L,
) -> Array2<f64> {
    design.mapv(|v| link.pre_transform(v))
}

/// Psi: one column per input column, the weighted sum over that column's
/// degree group of the transformed design matrix.
pub fn psi_layer<L: AggregationLink + ?Sized>(
    design_t: ArrayView2<f64>,
    lambda: &Coefficients,
    basis: &BasisLayout,
    link: &L,
) -> Aggregated {
    let mut sums = LayerSums::zeros(design_t.nrows(), basis.column_groups.len());
    for (q, group) in basis.column_groups.iter().enumerate() {
        let partial = design_t
            .slice(s![.., group.clone()])
            .dot(&lambda.segment(group.clone()));
        sums.set_group(q, partial.view());
    }
    Aggregated::from_sums(sums, link)
}

/// Fi: one column per input block, the weighted sum of that block's Psi columns.
/// An empty block sums to zero.
pub fn fi_layer<L: AggregationLink + ?Sized>(
    psi_t: ArrayView2<f64>,
    a: &Coefficients,
    layout: &ColumnLayout,
    link: &L,
) -> Aggregated {
    let mut sums = LayerSums::zeros(psi_t.nrows(), NUM_BLOCKS);
    for block in 0..NUM_BLOCKS {
        let range = layout.block_range(block);
        let partial = psi_t
            .slice(s![.., range.clone()])
            .dot(&a.segment(range));
        sums.set_group(block, partial.view());
    }
    Aggregated::from_sums(sums, link)
}

/// F for one output column, on the normalized scale.
pub fn output_layer<L: AggregationLink + ?Sized>(
    fi_t: ArrayView2<f64>,
    c: &Coefficients,
    link: &L,
) -> Array1<f64> {
    fi_t.dot(&c.as_view()).mapv(|s| link.post_aggregate(s))
}
