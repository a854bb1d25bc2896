//! # Model Estimation
//!
//! The fit runs once over the whole dataset and then independently for every
//! output column:
//!
//! 1. Normalize every column onto `[0, 1]`.
//! 2. Expand the three input blocks into the design matrix `A` and transform it
//!    with the link's `pre_transform`.
//! 3. Build the first-layer target `B` from the outputs (`average` or `scaled`).
//! 4. Per output column `j`:
//!    - `lambda` regresses the transformed design on `B[:, j]`, jointly or block by block.
//!    - Psi aggregates each input column's degree group.
//!    - `a` regresses Psi block by block on `Y[:, j]`.
//!    - Fi aggregates each block.
//!    - `c` regresses Fi on `Y[:, j]`, and F is the aggregated result.
//! 5. Denormalize F and measure the residuals on both scales.
//!
//! Every stage produces a fresh value. Nothing computed earlier is modified.

use crate::fit::basis::{BasisLayout, build_design};
use crate::fit::config::{ColumnLayout, ConfigError, ModelConfig, NUM_BLOCKS, Weighting};
use crate::fit::data::{DataError, Dataset};
use crate::fit::layers::{Aggregated, fi_layer, output_layer, psi_layer, transform_design};
use crate::fit::link::AggregationLink;
use crate::fit::model::{CoefficientLayers, TrainedModel};
use crate::fit::normalize::{NormalizeError, NormalizedDataset, normalize_dataset};
use crate::fit::solver::{SolverError, minimize};
use crate::fit::types::Coefficients;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use rayon::prelude::*;
use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// A comprehensive error type for the model estimation process.
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid data: {0}")]
    Data(#[from] DataError),

    #[error("Normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Solving for {stage} of output column {output} ({scope}) failed: {source}")]
    SolveFailed {
        stage: Stage,
        output: usize,
        scope: SolveScope,
        #[source]
        source: SolverError,
    },

    #[error("Dataset block widths {found:?} do not match the configured widths {expected:?}.")]
    LayoutMismatch {
        expected: [usize; NUM_BLOCKS + 1],
        found: [usize; NUM_BLOCKS + 1],
    },

    #[error(
        "The {family} basis produced values outside the domain of the {link} link (design column {column}); try a shifted basis family."
    )]
    NonFiniteDesign {
        family: &'static str,
        link: &'static str,
        column: usize,
    },

    #[error("The model is configured for the '{configured}' link but was given the '{given}' link.")]
    LinkMismatch {
        configured: &'static str,
        given: &'static str,
    },
}

/// The coefficient layer a solve belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lambda,
    A,
    C,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Lambda => write!(f, "lambda"),
            Stage::A => write!(f, "a"),
            Stage::C => write!(f, "c"),
        }
    }
}

/// Which columns of a layer's regressors a solve covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveScope {
    Joint,
    Block(usize),
}

impl fmt::Display for SolveScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveScope::Joint => write!(f, "all blocks"),
            SolveScope::Block(block) => write!(f, "block X{}", block + 1),
        }
    }
}

/// Bookkeeping for one linear solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveRecord {
    pub stage: Stage,
    pub output: usize,
    pub scope: SolveScope,
    pub iterations: usize,
    pub residual_norm: f64,
    pub converged: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitDiagnostics {
    pub solves: Vec<SolveRecord>,
}

impl FitDiagnostics {
    pub fn non_converged(&self) -> impl Iterator<Item = &SolveRecord> {
        self.solves.iter().filter(|record| !record.converged)
    }

    pub fn all_converged(&self) -> bool {
        self.non_converged().next().is_none()
    }
}

/// The basis-expanded inputs, raw and after `pre_transform`.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    pub basis: BasisLayout,
    pub raw: Array2<f64>,
    pub transformed: Array2<f64>,
}

/// Regression targets on the normalized scale.
#[derive(Debug, Clone)]
pub struct Targets {
    /// First-layer target `B`, one column per output.
    pub b: Array2<f64>,
    /// `target_transform(B)`, the right-hand side of every `lambda` solve.
    pub b_transformed: Array2<f64>,
    /// `target_transform(Y)`, the right-hand side of every `a` and `c` solve.
    pub y_transformed: Array2<f64>,
}

/// Everything fitted for one output column.
#[derive(Debug, Clone)]
pub struct OutputColumnFit {
    pub lambda: Coefficients,
    pub psi: Aggregated,
    pub a: Coefficients,
    pub fi: Aggregated,
    pub c: Coefficients,
    /// F on the normalized scale.
    pub prediction: Array1<f64>,
    pub solves: Vec<SolveRecord>,
}

/// Per-output-column residual summaries. Residuals are `Y - F`.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMetrics {
    pub normalized_max: Array1<f64>,
    pub normalized_mean: Array1<f64>,
    pub max: Array1<f64>,
    pub mean: Array1<f64>,
}

impl ErrorMetrics {
    pub fn new(
        normalized_y: ArrayView2<f64>,
        normalized_f: ArrayView2<f64>,
        y: ArrayView2<f64>,
        f: ArrayView2<f64>,
    ) -> Self {
        let (normalized_max, normalized_mean) = internal::residual_summary(normalized_y, normalized_f);
        let (max, mean) = internal::residual_summary(y, f);
        Self {
            normalized_max,
            normalized_mean,
            max,
            mean,
        }
    }
}

/// The complete outcome of a fit, borrowing the dataset it was fitted on.
#[derive(Debug, Clone)]
pub struct FitResult<'d> {
    pub config: ModelConfig,
    pub dataset: &'d Dataset,
    pub normalized: NormalizedDataset,
    pub design: DesignMatrix,
    pub targets: Targets,
    pub outputs: Vec<OutputColumnFit>,
    /// F, `[n_rows, n_outputs]`, normalized scale.
    pub predictions: Array2<f64>,
    /// F on the original output scale.
    pub denormalized: Array2<f64>,
    pub errors: ErrorMetrics,
    pub diagnostics: FitDiagnostics,
}

impl FitResult<'_> {
    /// Packages the coefficients and scaling needed for later prediction.
    pub fn trained_model(&self) -> TrainedModel {
        TrainedModel {
            config: self.config.clone(),
            input_scaling: self.normalized.input_scaling(),
            output_scaling: self.normalized.output_scaling(),
            layers: self
                .outputs
                .iter()
                .map(|fit| CoefficientLayers {
                    lambda: fit.lambda.clone(),
                    a: fit.a.clone(),
                    c: fit.c.clone(),
                })
                .collect(),
        }
    }
}

/// The main entry point for model training, with the link chosen by the configuration.
pub fn train_model<'d>(
    dataset: &'d Dataset,
    config: &ModelConfig,
) -> Result<FitResult<'d>, EstimationError> {
    let link = config.link_strategy();
    ModelEngine::new(config, link.as_ref())?.fit(dataset)
}

/// Runs the layered fit with an injected aggregation link.
pub struct ModelEngine<'a, L: AggregationLink + ?Sized> {
    config: &'a ModelConfig,
    link: &'a L,
}

impl<'a, L: AggregationLink + ?Sized> ModelEngine<'a, L> {
    /// Fails when `link` is not the link `config` records, since the trained
    /// model keeps the configured one.
    pub fn new(config: &'a ModelConfig, link: &'a L) -> Result<Self, EstimationError> {
        if !config.link.selects(link) {
            return Err(EstimationError::LinkMismatch {
                configured: config.link.name(),
                given: link.name(),
            });
        }
        Ok(Self { config, link })
    }

    pub fn fit<'d>(&self, dataset: &'d Dataset) -> Result<FitResult<'d>, EstimationError> {
        let layout = &self.config.layout;
        if dataset.layout() != layout {
            return Err(EstimationError::LayoutMismatch {
                expected: layout.widths(),
                found: dataset.layout().widths(),
            });
        }
        log::info!(
            "Starting fit: {} samples, {} output column(s), {} basis, {} link.",
            dataset.nrows(),
            layout.num_outputs(),
            self.config.family.name(),
            self.link.name()
        );

        // 1-2. Normalize and expand.
        let normalized = normalize_dataset(dataset)?;
        let design = self.build_design_matrix(&normalized)?;
        log_layout_info(&design.basis, layout);

        // 3. Targets.
        let targets =
            internal::build_targets(normalized.outputs(), self.config.weighting, self.link);

        // 4. Each output column is fitted on its own.
        let outputs: Vec<OutputColumnFit> = (0..layout.num_outputs())
            .into_par_iter()
            .map(|j| self.fit_output(j, &design, &targets))
            .collect::<Result<_, _>>()?;

        // 5. Denormalize and measure.
        let mut predictions = Array2::zeros((dataset.nrows(), outputs.len()));
        for (j, fit) in outputs.iter().enumerate() {
            predictions.column_mut(j).assign(&fit.prediction);
        }
        let denormalized = normalized.output_scaling().denormalize(predictions.view());
        let errors = ErrorMetrics::new(
            normalized.outputs(),
            predictions.view(),
            dataset.outputs(),
            denormalized.view(),
        );
        let diagnostics = FitDiagnostics {
            solves: outputs
                .iter()
                .flat_map(|fit| fit.solves.iter().cloned())
                .collect(),
        };

        for j in 0..outputs.len() {
            log::info!(
                "Output {}: max |Y - F| = {:.6e}, mean (Y - F) = {:.6e}",
                j,
                errors.max[j],
                errors.mean[j]
            );
        }
        let stalled = diagnostics.non_converged().count();
        if stalled > 0 {
            log::warn!(
                "{} of {} solves stopped at the iteration cap.",
                stalled,
                diagnostics.solves.len()
            );
        }
        log::info!("Fit completed.");

        Ok(FitResult {
            config: self.config.clone(),
            dataset,
            normalized,
            design,
            targets,
            outputs,
            predictions,
            denormalized,
            errors,
            diagnostics,
        })
    }

    fn build_design_matrix(
        &self,
        normalized: &NormalizedDataset,
    ) -> Result<DesignMatrix, EstimationError> {
        let basis = BasisLayout::new(&self.config.layout, self.config.degrees);
        let raw = build_design(
            normalized.inputs(),
            &self.config.layout,
            &basis,
            self.config.family,
        );
        let transformed = transform_design(raw.view(), self.link);
        if let Some(column) = transformed
            .axis_iter(Axis(1))
            .position(|col| col.iter().any(|v| !v.is_finite()))
        {
            return Err(EstimationError::NonFiniteDesign {
                family: self.config.family.name(),
                link: self.link.name(),
                column,
            });
        }
        Ok(DesignMatrix {
            basis,
            raw,
            transformed,
        })
    }

    fn fit_output(
        &self,
        output: usize,
        design: &DesignMatrix,
        targets: &Targets,
    ) -> Result<OutputColumnFit, EstimationError> {
        let layout = &self.config.layout;
        let mut solves = Vec::new();
        let b_t = targets.b_transformed.column(output);
        let y_t = targets.y_transformed.column(output);

        let lambda = if self.config.lambda_multiblock {
            self.solve_blocks(
                design.transformed.view(),
                &design.basis.block_ranges,
                b_t,
                Stage::Lambda,
                output,
                &mut solves,
            )?
        } else {
            self.solve(
                design.transformed.view(),
                b_t,
                Stage::Lambda,
                output,
                SolveScope::Joint,
                &mut solves,
            )?
        };
        let psi = psi_layer(design.transformed.view(), &lambda, &design.basis, self.link);

        let input_ranges: [Range<usize>; NUM_BLOCKS] =
            std::array::from_fn(|block| layout.block_range(block));
        let a = self.solve_blocks(
            psi.transformed.view(),
            &input_ranges,
            y_t,
            Stage::A,
            output,
            &mut solves,
        )?;
        let fi = fi_layer(psi.transformed.view(), &a, layout, self.link);

        let c = self.solve(
            fi.transformed.view(),
            y_t,
            Stage::C,
            output,
            SolveScope::Joint,
            &mut solves,
        )?;
        let prediction = output_layer(fi.transformed.view(), &c, self.link);

        log::debug!(
            "Output {output}: lambda {}, a {}, c {} coefficients.",
            lambda.len(),
            a.len(),
            c.len()
        );

        Ok(OutputColumnFit {
            lambda,
            psi,
            a,
            fi,
            c,
            prediction,
            solves,
        })
    }

    /// Solves each block's column range on its own and joins the results.
    fn solve_blocks(
        &self,
        regressors: ArrayView2<f64>,
        ranges: &[Range<usize>; NUM_BLOCKS],
        target: ArrayView1<f64>,
        stage: Stage,
        output: usize,
        records: &mut Vec<SolveRecord>,
    ) -> Result<Coefficients, EstimationError> {
        let mut parts = Vec::with_capacity(NUM_BLOCKS);
        for (block, range) in ranges.iter().enumerate() {
            let part = self.solve(
                regressors.slice(s![.., range.clone()]),
                target,
                stage,
                output,
                SolveScope::Block(block),
                records,
            )?;
            parts.push(part.into_inner());
        }
        Ok(Coefficients::concat(&parts))
    }

    fn solve(
        &self,
        regressors: ArrayView2<f64>,
        target: ArrayView1<f64>,
        stage: Stage,
        output: usize,
        scope: SolveScope,
        records: &mut Vec<SolveRecord>,
    ) -> Result<Coefficients, EstimationError> {
        log::trace!(
            "Solving {stage} for output {output} ({scope}): {}x{}",
            regressors.nrows(),
            regressors.ncols()
        );
        let report = minimize(regressors, target, &self.config.solver).map_err(|source| {
            EstimationError::SolveFailed {
                stage,
                output,
                scope,
                source,
            }
        })?;
        records.push(SolveRecord {
            stage,
            output,
            scope,
            iterations: report.iterations,
            residual_norm: report.residual_norm,
            converged: report.converged,
        });
        Ok(Coefficients::new(report.coefficients))
    }
}

fn log_layout_info(basis: &BasisLayout, layout: &ColumnLayout) {
    log::info!("Design matrix has {} columns.", basis.total_width);
    for block in 0..NUM_BLOCKS {
        let width = layout.block_width(block);
        if width > 0 {
            log::info!(
                "  - X{}: {} column(s) up to degree {} -> {} basis columns.",
                block + 1,
                width,
                basis.degrees[block],
                basis.block_ranges[block].len()
            );
        } else {
            log::info!("  - X{}: empty.", block + 1);
        }
    }
}

mod internal {
    use super::*;

    pub(super) fn build_targets<L: AggregationLink + ?Sized>(
        outputs: ArrayView2<f64>,
        weighting: Weighting,
        link: &L,
    ) -> Targets {
        let b = match weighting {
            Weighting::Scaled => outputs.to_owned(),
            Weighting::Average => {
                let mut b = Array2::zeros(outputs.raw_dim());
                for (i, row) in outputs.rows().into_iter().enumerate() {
                    let hi = row.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
                    let lo = row.fold(f64::INFINITY, |acc, &v| acc.min(v));
                    b.row_mut(i).fill((hi + lo) / 2.0);
                }
                b
            }
        };
        let b_transformed = b.mapv(|v| link.target_transform(v));
        let y_transformed = outputs.mapv(|v| link.target_transform(v));
        Targets {
            b,
            b_transformed,
            y_transformed,
        }
    }

    /// Column-wise `max |y - f|` and `mean (y - f)`.
    pub(super) fn residual_summary(
        y: ArrayView2<f64>,
        f: ArrayView2<f64>,
    ) -> (Array1<f64>, Array1<f64>) {
        let residuals = &y - &f;
        let max = residuals.map_axis(Axis(0), |col| col.fold(0.0, |acc: f64, &r| acc.max(r.abs())));
        let mean = residuals
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(residuals.ncols()));
        (max, mean)
    }
}
