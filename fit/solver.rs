//! # Linear System Solver
//!
//! Every coefficient layer reduces to `minimize ‖Ax - b‖` for a tall, often
//! rank-deficient `A`. Three strategies are available:
//!
//! - [`SolverKind::Lstsq`]: SVD least squares, defined for any `A`.
//! - [`SolverKind::NormalEquations`]: LU solve of `AᵗA x = Aᵗb`. A singular
//!   `AᵗA` is reported, never papered over.
//! - [`SolverKind::ConjugateGradient`]: conjugate gradient on the normal
//!   equations. Hitting the iteration cap is not fatal: the last iterate is
//!   returned with `converged == false`.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::{LeastSquaresSvd, SVD, Solve};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TOLERANCE: f64 = 1e-8;
pub const DEFAULT_MAX_ITERATIONS: usize = 1000;
/// Largest condition number of `AᵗA` the normal-equation solve accepts.
pub const MAX_CONDITION_NUMBER: f64 = 1e12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverKind {
    #[serde(rename = "lstsq")]
    Lstsq,
    #[serde(rename = "normal")]
    NormalEquations,
    #[serde(rename = "cg")]
    ConjugateGradient,
}

impl SolverKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "lstsq" | "svd" => Some(SolverKind::Lstsq),
            "normal" | "direct" => Some(SolverKind::NormalEquations),
            "cg" | "cjg" | "conjugate-gradient" => Some(SolverKind::ConjugateGradient),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    pub kind: SolverKind,
    /// Residual norm at which conjugate gradient stops.
    pub tolerance: f64,
    /// Iteration cap for conjugate gradient.
    pub max_iterations: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            kind: SolverKind::ConjugateGradient,
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// The outcome of one solve, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub coefficients: Array1<f64>,
    pub iterations: usize,
    /// Norm of `Aᵗb - AᵗA x` at the returned solution.
    pub residual_norm: f64,
    pub converged: bool,
}

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Matrix has {rows} rows but the right-hand side has {rhs_len} entries.")]
    DimensionMismatch { rows: usize, rhs_len: usize },

    #[error("The normal-equation matrix AᵗA ({size}x{size}) is singular: {reason}")]
    SingularSystem { size: usize, reason: String },

    #[error("The solver produced non-finite coefficients.")]
    NonFiniteSolution,

    #[error("SVD failed: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}

/// Finds `x` minimizing `‖Ax - b‖` with the requested strategy.
pub fn minimize(
    a: ArrayView2<f64>,
    b: ArrayView1<f64>,
    settings: &SolverSettings,
) -> Result<SolveReport, SolverError> {
    if a.nrows() != b.len() {
        return Err(SolverError::DimensionMismatch {
            rows: a.nrows(),
            rhs_len: b.len(),
        });
    }
    if a.ncols() == 0 {
        return Ok(SolveReport {
            coefficients: Array1::zeros(0),
            iterations: 0,
            residual_norm: 0.0,
            converged: true,
        });
    }

    let gram = a.t().dot(&a);
    let rhs = a.t().dot(&b);

    let report = match settings.kind {
        SolverKind::Lstsq => {
            let solution = a.least_squares(&b)?.solution;
            let residual_norm = normal_residual(gram.view(), rhs.view(), solution.view());
            SolveReport {
                coefficients: solution,
                iterations: 0,
                residual_norm,
                converged: true,
            }
        }
        SolverKind::NormalEquations => {
            let condition = condition_number(&gram)?;
            if condition > MAX_CONDITION_NUMBER {
                return Err(SolverError::SingularSystem {
                    size: gram.nrows(),
                    reason: format!(
                        "condition number {condition:.3e} exceeds {MAX_CONDITION_NUMBER:.0e}"
                    ),
                });
            }
            log::trace!("Normal equations condition number: {condition:.3e}");
            let solution = gram.solve(&rhs).map_err(|e| SolverError::SingularSystem {
                size: gram.nrows(),
                reason: e.to_string(),
            })?;
            if !solution.iter().all(|v| v.is_finite()) {
                return Err(SolverError::SingularSystem {
                    size: gram.nrows(),
                    reason: "LU factorization produced non-finite values".to_string(),
                });
            }
            let residual_norm = normal_residual(gram.view(), rhs.view(), solution.view());
            SolveReport {
                coefficients: solution,
                iterations: 0,
                residual_norm,
                converged: true,
            }
        }
        SolverKind::ConjugateGradient => {
            let report = conjugate_gradient(
                gram.view(),
                rhs.view(),
                settings.tolerance,
                settings.max_iterations,
            );
            if !report.converged {
                log::warn!(
                    "Conjugate gradient stopped after {} iterations with residual {:.3e} (tolerance {:.1e}); using last iterate.",
                    report.iterations,
                    report.residual_norm,
                    settings.tolerance
                );
            }
            report
        }
    };

    if !report.coefficients.iter().all(|v| v.is_finite()) {
        return Err(SolverError::NonFiniteSolution);
    }
    Ok(report)
}

/// Conjugate gradient for a symmetric positive (semi)definite system `Mx = r`,
/// started from zero.
///
/// Iterates while the residual norm exceeds `tolerance`. On a consistent
/// semidefinite system the iterates stay in the range of `M`, so the method
/// also converges there. A vanishing curvature `pᵗMp` ends the iteration.
pub fn conjugate_gradient(
    matrix: ArrayView2<f64>,
    rhs: ArrayView1<f64>,
    tolerance: f64,
    max_iterations: usize,
) -> SolveReport {
    let mut x = Array1::<f64>::zeros(rhs.len());
    let mut residual = rhs.to_owned();
    let mut direction = residual.clone();
    let mut rs_old = residual.dot(&residual);
    let mut iterations = 0;

    while rs_old.sqrt() > tolerance && iterations < max_iterations {
        let m_dir = matrix.dot(&direction);
        let curvature = direction.dot(&m_dir);
        if curvature <= f64::EPSILON * rs_old {
            log::debug!("Conjugate gradient curvature vanished at iteration {iterations}");
            break;
        }
        let alpha = rs_old / curvature;
        x.scaled_add(alpha, &direction);
        residual.scaled_add(-alpha, &m_dir);
        let rs_new = residual.dot(&residual);
        direction = &residual + &(&direction * (rs_new / rs_old));
        rs_old = rs_new;
        iterations += 1;
        log::trace!("CG iteration {iterations}: residual {:.3e}", rs_old.sqrt());
    }

    let residual_norm = normal_residual(matrix, rhs, x.view());
    SolveReport {
        coefficients: x,
        iterations,
        residual_norm,
        converged: rs_old.sqrt() <= tolerance,
    }
}

/// Ratio of the largest to the smallest singular value; infinite when the
/// smallest one vanishes.
pub fn condition_number(matrix: &Array2<f64>) -> Result<f64, SolverError> {
    let (_, singular, _) = matrix.svd(false, false)?;
    let max_sv = singular.iter().fold(0.0_f64, |max, &v| max.max(v));
    let min_sv = singular.iter().fold(f64::INFINITY, |min, &v| min.min(v));
    if min_sv <= max_sv * f64::EPSILON {
        return Ok(f64::INFINITY);
    }
    Ok(max_sv / min_sv)
}

fn normal_residual(gram: ArrayView2<f64>, rhs: ArrayView1<f64>, x: ArrayView1<f64>) -> f64 {
    let r = &rhs - &gram.dot(&x);
    r.dot(&r).sqrt()
}
