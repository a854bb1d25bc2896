use crate::fit::basis::{BasisLayout, build_design, build_design_row};
use crate::fit::config::{ModelConfig, NUM_BLOCKS};
use crate::fit::layers::{fi_layer, output_layer, psi_layer, transform_design};
use crate::fit::link::AggregationLink;
use crate::fit::normalize::ColumnScaling;
use crate::fit::types::Coefficients;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// The three coefficient vectors fitted for one output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientLayers {
    pub lambda: Coefficients,
    pub a: Coefficients,
    pub c: Coefficients,
}

/// The top-level, self-contained, trained model artifact.
/// This is the structure that gets saved to and loaded from a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub config: ModelConfig,
    /// Raw min/max of the input columns, X1 | X2 | X3.
    pub input_scaling: ColumnScaling,
    /// Raw min/max of the output columns.
    pub output_scaling: ColumnScaling,
    /// One entry per output column, in column order.
    pub layers: Vec<CoefficientLayers>,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Prediction data has {found} input columns, but the model was trained on {expected}.")]
    MismatchedFeatureCount { found: usize, expected: usize },
    #[error("Model file is internally inconsistent: {0}")]
    Inconsistent(String),
    #[error("Model was trained with the '{trained}' link but was given the '{given}' link.")]
    LinkMismatch {
        trained: &'static str,
        given: &'static str,
    },
}

impl TrainedModel {
    pub fn num_inputs(&self) -> usize {
        self.config.layout.num_inputs()
    }

    pub fn num_outputs(&self) -> usize {
        self.config.layout.num_outputs()
    }

    /// Saves the trained model to a file in a human-readable TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a trained model from a TOML file and checks that its coefficient
    /// and scaling shapes agree with its configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model: Self = toml::from_str(&toml_string)?;
        model.check_shapes()?;
        Ok(model)
    }

    fn check_shapes(&self) -> Result<(), ModelError> {
        let basis = BasisLayout::new(&self.config.layout, self.config.degrees);
        if self.input_scaling.len() != self.num_inputs() {
            return Err(ModelError::Inconsistent(format!(
                "input scaling covers {} columns, layout has {}",
                self.input_scaling.len(),
                self.num_inputs()
            )));
        }
        if self.output_scaling.len() != self.num_outputs() || self.layers.len() != self.num_outputs()
        {
            return Err(ModelError::Inconsistent(format!(
                "layout has {} outputs, but found {} scalings and {} coefficient sets",
                self.num_outputs(),
                self.output_scaling.len(),
                self.layers.len()
            )));
        }
        for (j, layers) in self.layers.iter().enumerate() {
            let expected = [basis.total_width, self.num_inputs(), NUM_BLOCKS];
            let found = [layers.lambda.len(), layers.a.len(), layers.c.len()];
            if expected != found {
                return Err(ModelError::Inconsistent(format!(
                    "output {j}: coefficient lengths {found:?}, expected {expected:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Applies a trained model to raw feature vectors.
///
/// Each row runs the same expand, transform, aggregate chain the fit used,
/// with the stored scaling on both ends.
pub struct Predictor<'m, L: AggregationLink + ?Sized> {
    model: &'m TrainedModel,
    link: &'m L,
    basis: BasisLayout,
}

impl<'m, L: AggregationLink + ?Sized> Predictor<'m, L> {
    /// Fails when `link` is not the link the model was trained with.
    pub fn new(model: &'m TrainedModel, link: &'m L) -> Result<Self, ModelError> {
        if !model.config.link.selects(link) {
            return Err(ModelError::LinkMismatch {
                trained: model.config.link.name(),
                given: link.name(),
            });
        }
        let basis = BasisLayout::new(&model.config.layout, model.config.degrees);
        Ok(Self { model, link, basis })
    }

    /// Predicts every output column for one raw feature vector (X1 | X2 | X3).
    pub fn predict(&self, features: ArrayView1<f64>) -> Result<Array1<f64>, ModelError> {
        self.check_width(features.len())?;
        let normalized = self.model.input_scaling.normalize_row(features);
        let design = build_design_row(
            normalized.view(),
            &self.model.config.layout,
            &self.basis,
            self.model.config.family,
        );
        let outputs = self.forward(design.view());
        Ok(self.model.output_scaling.denormalize_row(outputs.row(0)))
    }

    /// Predicts a batch of raw feature rows, `[n_rows, n_inputs]` in,
    /// `[n_rows, n_outputs]` out.
    pub fn predict_matrix(&self, features: ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
        self.check_width(features.ncols())?;
        let normalized = self.model.input_scaling.normalize(features);
        let design = build_design(
            normalized.view(),
            &self.model.config.layout,
            &self.basis,
            self.model.config.family,
        );
        let outputs = self.forward(design.view());
        Ok(self.model.output_scaling.denormalize(outputs.view()))
    }

    fn check_width(&self, found: usize) -> Result<(), ModelError> {
        let expected = self.model.num_inputs();
        if found != expected {
            return Err(ModelError::MismatchedFeatureCount { found, expected });
        }
        Ok(())
    }

    /// Normalized-scale outputs for a raw design matrix.
    fn forward(&self, design: ArrayView2<f64>) -> Array2<f64> {
        let design_t = transform_design(design, self.link);
        let mut outputs = Array2::zeros((design.nrows(), self.model.layers.len()));
        for (j, layers) in self.model.layers.iter().enumerate() {
            let psi = psi_layer(design_t.view(), &layers.lambda, &self.basis, self.link);
            let fi = fi_layer(
                psi.transformed.view(),
                &layers.a,
                &self.model.config.layout,
                self.link,
            );
            outputs
                .column_mut(j)
                .assign(&output_layer(fi.transformed.view(), &layers.c, self.link));
        }
        outputs
    }
}
