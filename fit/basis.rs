//! # Basis Expansion
//!
//! Turns each normalized input column into a group of basis columns, one per
//! degree `0..=d`. Groups are laid out block by block, column by column, in
//! ascending degree. Every later layer addresses the design matrix through the
//! ranges in [`BasisLayout`], so this ordering is load-bearing.

use crate::fit::config::{ColumnLayout, NUM_BLOCKS};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};
use std::ops::Range;

/// The function family evaluated at every degree of a column's basis group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasisFamily {
    /// Chebyshev polynomials of the first kind, `T_d(x)`.
    #[serde(rename = "cheb_t")]
    ChebyshevT,
    /// First kind shifted onto `[0, 1]`: `T_d(2x - 1)`.
    #[serde(rename = "sh_cheb_t")]
    ShiftedChebyshevT,
    /// Chebyshev polynomials of the second kind, `U_d(x)`.
    #[serde(rename = "cheb_u")]
    ChebyshevU,
    /// Second kind shifted onto `[0, 1]`: `U_d(2x - 1)`.
    #[serde(rename = "sh_cheb_u")]
    ShiftedChebyshevU,
    /// `(cos(x^d) + π) / 2π`.
    #[serde(rename = "cos")]
    Cosine,
    /// `(arctan(x^d) + π/2) / π`.
    #[serde(rename = "arctg")]
    Arctangent,
    /// `(tanh(x^d) + 1) / 2`.
    #[serde(rename = "tanh")]
    Tanh,
}

impl BasisFamily {
    pub const ALL: [BasisFamily; 7] = [
        BasisFamily::ChebyshevT,
        BasisFamily::ShiftedChebyshevT,
        BasisFamily::ChebyshevU,
        BasisFamily::ShiftedChebyshevU,
        BasisFamily::Cosine,
        BasisFamily::Arctangent,
        BasisFamily::Tanh,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BasisFamily::ChebyshevT => "cheb_t",
            BasisFamily::ShiftedChebyshevT => "sh_cheb_t",
            BasisFamily::ChebyshevU => "cheb_u",
            BasisFamily::ShiftedChebyshevU => "sh_cheb_u",
            BasisFamily::Cosine => "cos",
            BasisFamily::Arctangent => "arctg",
            BasisFamily::Tanh => "tanh",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|family| family.name() == wanted)
    }

    /// Evaluates the family at a single degree.
    pub fn evaluate(self, degree: usize, x: f64) -> f64 {
        self.evaluate_up_to(degree, x)[degree]
    }

    /// Evaluates degrees `0..=max_degree` at `x` in one pass.
    pub fn evaluate_up_to(self, max_degree: usize, x: f64) -> Array1<f64> {
        match self {
            BasisFamily::ChebyshevT => chebyshev_recurrence(max_degree, x, x),
            BasisFamily::ShiftedChebyshevT => {
                let t = 2.0 * x - 1.0;
                chebyshev_recurrence(max_degree, t, t)
            }
            BasisFamily::ChebyshevU => chebyshev_recurrence(max_degree, x, 2.0 * x),
            BasisFamily::ShiftedChebyshevU => {
                let t = 2.0 * x - 1.0;
                chebyshev_recurrence(max_degree, t, 2.0 * t)
            }
            BasisFamily::Cosine => {
                powers(max_degree, x).mapv_into(|p| (p.cos() + PI) / (2.0 * PI))
            }
            BasisFamily::Arctangent => {
                powers(max_degree, x).mapv_into(|p| (p.atan() + FRAC_PI_2) / PI)
            }
            BasisFamily::Tanh => powers(max_degree, x).mapv_into(|p| (p.tanh() + 1.0) / 2.0),
        }
    }
}

/// `x^0, x^1, ..., x^max_degree`; the bounded families squash these.
fn powers(max_degree: usize, x: f64) -> Array1<f64> {
    let mut values = Array1::ones(max_degree + 1);
    for k in 1..=max_degree {
        values[k] = values[k - 1] * x;
    }
    values
}

/// Three-term recurrence `P_{k+1} = 2t·P_k - P_{k-1}` with `P_0 = 1`.
/// The first and second kinds differ only in `P_1`.
fn chebyshev_recurrence(max_degree: usize, t: f64, first: f64) -> Array1<f64> {
    let mut values = Array1::zeros(max_degree + 1);
    values[0] = 1.0;
    if max_degree >= 1 {
        values[1] = first;
    }
    for k in 1..max_degree {
        values[k + 1] = 2.0 * t * values[k] - values[k - 1];
    }
    values
}

/// Column ranges of the design matrix, derived from block widths and degrees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasisLayout {
    /// Design-matrix columns for each input column's degree group.
    pub column_groups: Vec<Range<usize>>,
    /// Design-matrix columns covered by each input block.
    pub block_ranges: [Range<usize>; NUM_BLOCKS],
    pub degrees: [usize; NUM_BLOCKS],
    pub total_width: usize,
}

impl BasisLayout {
    pub fn new(layout: &ColumnLayout, degrees: [usize; NUM_BLOCKS]) -> Self {
        let mut column_groups = Vec::with_capacity(layout.num_inputs());
        let mut block_ranges: [Range<usize>; NUM_BLOCKS] = [0..0, 0..0, 0..0];
        let mut current_col = 0;

        for block in 0..NUM_BLOCKS {
            let group_width = degrees[block] + 1;
            let block_start = current_col;
            for _ in 0..layout.block_width(block) {
                column_groups.push(current_col..current_col + group_width);
                current_col += group_width;
            }
            block_ranges[block] = block_start..current_col;
        }

        Self {
            column_groups,
            block_ranges,
            degrees,
            total_width: current_col,
        }
    }
}

/// Expands one block of normalized columns. Output shape is
/// `[n_rows, n_cols * (degree + 1)]`.
pub fn expand_block(block: ArrayView2<f64>, degree: usize, family: BasisFamily) -> Array2<f64> {
    let group_width = degree + 1;
    let mut expanded = Array2::zeros((block.nrows(), block.ncols() * group_width));
    for (j, column) in block.columns().into_iter().enumerate() {
        let start = j * group_width;
        for (i, &x) in column.iter().enumerate() {
            expanded
                .slice_mut(s![i, start..start + group_width])
                .assign(&family.evaluate_up_to(degree, x));
        }
    }
    expanded
}

/// Builds the raw design matrix `A` for all three input blocks.
///
/// `inputs` holds only the input columns (X1 | X2 | X3), already normalized.
pub fn build_design(
    inputs: ArrayView2<f64>,
    layout: &ColumnLayout,
    basis: &BasisLayout,
    family: BasisFamily,
) -> Array2<f64> {
    let mut design = Array2::zeros((inputs.nrows(), basis.total_width));
    for block in 0..NUM_BLOCKS {
        let block_cols = layout.block_range(block);
        let segment = expand_block(
            inputs.slice(s![.., block_cols]),
            basis.degrees[block],
            family,
        );
        design
            .slice_mut(s![.., basis.block_ranges[block].clone()])
            .assign(&segment);
    }
    design
}

/// Expands a single normalized feature vector; the prediction-time twin of
/// [`build_design`].
pub fn build_design_row(
    inputs: ArrayView1<f64>,
    layout: &ColumnLayout,
    basis: &BasisLayout,
    family: BasisFamily,
) -> Array2<f64> {
    build_design(inputs.insert_axis(ndarray::Axis(0)), layout, basis, family)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn chebyshev_first_kind_matches_closed_form() {
        // T_3(x) = 4x^3 - 3x
        for &x in &[-0.9, -0.2, 0.0, 0.35, 1.0] {
            let expected = 4.0 * x * x * x - 3.0 * x;
            assert_abs_diff_eq!(BasisFamily::ChebyshevT.evaluate(3, x), expected, epsilon = 1e-12);
        }
        // T_d(cos θ) = cos(dθ)
        let theta: f64 = 0.7;
        assert_abs_diff_eq!(
            BasisFamily::ChebyshevT.evaluate(5, theta.cos()),
            (5.0 * theta).cos(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn chebyshev_second_kind_matches_closed_form() {
        // U_2(x) = 4x^2 - 1, U_3(x) = 8x^3 - 4x
        let x = 0.3;
        assert_abs_diff_eq!(BasisFamily::ChebyshevU.evaluate(2, x), 4.0 * x * x - 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            BasisFamily::ChebyshevU.evaluate(3, x),
            8.0 * x * x * x - 4.0 * x,
            epsilon = 1e-12
        );
    }

    #[test]
    fn shifted_families_map_unit_interval() {
        assert_abs_diff_eq!(BasisFamily::ShiftedChebyshevT.evaluate(1, 0.25), -0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(BasisFamily::ShiftedChebyshevT.evaluate(2, 1.0), 1.0, epsilon = 1e-12);
        // U_1(2x - 1) = 2(2x - 1)
        assert_abs_diff_eq!(BasisFamily::ShiftedChebyshevU.evaluate(1, 0.75), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn degree_zero_is_constant_for_every_family() {
        for family in BasisFamily::ALL {
            let a = family.evaluate(0, 0.1);
            let b = family.evaluate(0, 0.9);
            assert_abs_diff_eq!(a, b, epsilon = 1e-15);
        }
    }

    #[test]
    fn bounded_families_squash_powers() {
        let x: f64 = 0.5;
        assert_abs_diff_eq!(
            BasisFamily::Cosine.evaluate(3, x),
            (0.125f64.cos() + PI) / (2.0 * PI),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            BasisFamily::Arctangent.evaluate(2, x),
            (0.25f64.atan() + FRAC_PI_2) / PI,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            BasisFamily::Tanh.evaluate(1, x),
            (x.tanh() + 1.0) / 2.0,
            epsilon = 1e-12
        );
        // Inside (0, 1) every degree yields its own column.
        for family in [BasisFamily::Cosine, BasisFamily::Arctangent, BasisFamily::Tanh] {
            let values = family.evaluate_up_to(4, 0.6);
            for pair in values.windows(2) {
                assert!((pair[0] - pair[1]).abs() > 1e-6, "{}", family.name());
            }
        }
    }

    #[test]
    fn bounded_families_stay_in_unit_interval() {
        for family in [BasisFamily::Cosine, BasisFamily::Arctangent, BasisFamily::Tanh] {
            for d in 0..6 {
                for &x in &[0.0, 0.2, 0.5, 1.0] {
                    let v = family.evaluate(d, x);
                    assert!((0.0..=1.0).contains(&v), "{} d={d} x={x} -> {v}", family.name());
                }
            }
        }
    }

    #[test]
    fn family_names_round_trip() {
        for family in BasisFamily::ALL {
            assert_eq!(BasisFamily::from_name(family.name()), Some(family));
        }
        assert_eq!(BasisFamily::from_name(" SH_CHEB_U "), Some(BasisFamily::ShiftedChebyshevU));
        assert_eq!(BasisFamily::from_name("legendre"), None);
    }

    #[test]
    fn expand_block_orders_columns_then_degrees() {
        let block = array![[0.5, 0.0], [1.0, 0.25]];
        let expanded = expand_block(block.view(), 2, BasisFamily::ChebyshevT);
        assert_eq!(expanded.shape(), &[2, 6]);
        // Column 0 of the block: T_0, T_1, T_2 at 0.5 -> 1, 0.5, -0.5
        assert_abs_diff_eq!(expanded[[0, 0]], 1.0);
        assert_abs_diff_eq!(expanded[[0, 1]], 0.5);
        assert_abs_diff_eq!(expanded[[0, 2]], -0.5);
        // Column 1 of the block at 0.25: 1, 0.25, 2*0.0625 - 1
        assert_abs_diff_eq!(expanded[[1, 3]], 1.0);
        assert_abs_diff_eq!(expanded[[1, 4]], 0.25);
        assert_abs_diff_eq!(expanded[[1, 5]], -0.875);
    }

    #[test]
    fn basis_layout_tracks_block_and_group_ranges() {
        let layout = ColumnLayout::new([2, 1, 3, 1]).unwrap();
        let basis = BasisLayout::new(&layout, [1, 0, 2]);
        assert_eq!(basis.total_width, 2 * 2 + 1 + 3 * 3);
        assert_eq!(basis.block_ranges, [0..4, 4..5, 5..14]);
        assert_eq!(basis.column_groups.len(), 6);
        assert_eq!(basis.column_groups[1], 2..4);
        assert_eq!(basis.column_groups[2], 4..5);
        assert_eq!(basis.column_groups[5], 11..14);
    }

    #[test]
    fn design_row_matches_design_matrix_row() {
        let layout = ColumnLayout::new([1, 1, 1, 1]).unwrap();
        let basis = BasisLayout::new(&layout, [2, 1, 3]);
        let inputs = array![[0.1, 0.4, 0.9], [0.6, 0.2, 0.3]];
        let full = build_design(inputs.view(), &layout, &basis, BasisFamily::ShiftedChebyshevU);
        let row = build_design_row(inputs.row(1), &layout, &basis, BasisFamily::ShiftedChebyshevU);
        assert_eq!(row.row(0), full.row(1));
    }
}
