//! # Model Configuration
//!
//! [`FitSettings`] is the loose, user-facing form (CLI flags or a TOML file,
//! names as strings). [`ModelConfig::from_settings`] validates it into the typed
//! configuration the engine consumes. All validation happens here, before any
//! data is touched.

use crate::fit::basis::BasisFamily;
use crate::fit::link::{AggregationLink, DEFAULT_OFFSET, LinkFunction};
use crate::fit::solver::{DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE, SolverKind, SolverSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::Range;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Number of grouped input blocks (X1, X2, X3).
pub const NUM_BLOCKS: usize = 3;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown weighting strategy '{0}'. Expected 'average' or 'scaled'.")]
    UnknownWeightingStrategy(String),

    #[error(
        "Unknown basis family '{0}'. Expected one of cheb_t, sh_cheb_t, cheb_u, sh_cheb_u, cos, arctg, tanh."
    )]
    UnknownBasisFamily(String),

    #[error("Unknown link '{0}'. Expected 'log', 'tanh' or 'arctan'.")]
    UnknownLink(String),

    #[error("Unknown solver '{0}'. Expected 'lstsq', 'normal' or 'cg'.")]
    UnknownSolver(String),

    #[error("Expected {expected} block widths (X1, X2, X3, Y), found {found}.")]
    WidthMismatch { expected: usize, found: usize },

    #[error("Expected {expected} block degrees (X1, X2, X3), found {found}.")]
    DegreeMismatch { expected: usize, found: usize },

    #[error("All three input blocks are empty; at least one input column is required.")]
    EmptyInputBlocks,

    #[error("The output block Y is empty; at least one output column is required.")]
    NoOutputs,

    #[error("Sample count must be positive when given.")]
    ZeroSamples,

    #[error("{name} must be a positive finite number, got {value}.")]
    InvalidTolerance { name: &'static str, value: f64 },

    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML settings file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// How the first-layer target `B` is derived from the normalized outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Weighting {
    /// Per-row midpoint of the output maximum and minimum, shared by every output.
    #[serde(rename = "average")]
    Average,
    /// The normalized outputs themselves.
    #[serde(rename = "scaled")]
    Scaled,
}

impl FromStr for Weighting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "average" => Ok(Weighting::Average),
            "scaled" => Ok(Weighting::Scaled),
            _ => Err(ConfigError::UnknownWeightingStrategy(s.to_string())),
        }
    }
}

/// Widths of X1, X2, X3 and Y, and the cumulative boundaries between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLayout {
    widths: [usize; NUM_BLOCKS + 1],
}

impl ColumnLayout {
    pub fn new(widths: [usize; NUM_BLOCKS + 1]) -> Result<Self, ConfigError> {
        if widths[..NUM_BLOCKS].iter().all(|&w| w == 0) {
            return Err(ConfigError::EmptyInputBlocks);
        }
        if widths[NUM_BLOCKS] == 0 {
            return Err(ConfigError::NoOutputs);
        }
        Ok(Self { widths })
    }

    pub fn from_slice(widths: &[usize]) -> Result<Self, ConfigError> {
        let widths: [usize; NUM_BLOCKS + 1] =
            widths.try_into().map_err(|_| ConfigError::WidthMismatch {
                expected: NUM_BLOCKS + 1,
                found: widths.len(),
            })?;
        Self::new(widths)
    }

    pub fn widths(&self) -> [usize; NUM_BLOCKS + 1] {
        self.widths
    }

    /// Cumulative block ends, e.g. `[3, 1, 2, 2] -> [3, 4, 6, 8]`.
    pub fn boundaries(&self) -> [usize; NUM_BLOCKS + 1] {
        let mut running = 0;
        self.widths.map(|w| {
            running += w;
            running
        })
    }

    pub fn block_width(&self, block: usize) -> usize {
        self.widths[block]
    }

    /// Raw-column range of input block `block` (0, 1 or 2).
    pub fn block_range(&self, block: usize) -> Range<usize> {
        let ends = self.boundaries();
        let start = if block == 0 { 0 } else { ends[block - 1] };
        start..ends[block]
    }

    pub fn num_inputs(&self) -> usize {
        self.widths[..NUM_BLOCKS].iter().sum()
    }

    pub fn num_outputs(&self) -> usize {
        self.widths[NUM_BLOCKS]
    }

    pub fn total_columns(&self) -> usize {
        self.num_inputs() + self.num_outputs()
    }

    pub fn input_range(&self) -> Range<usize> {
        0..self.num_inputs()
    }

    pub fn output_range(&self) -> Range<usize> {
        self.num_inputs()..self.total_columns()
    }
}

/// User-facing settings, as written in a TOML file or gathered from flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitSettings {
    pub family: String,
    pub degrees: Vec<usize>,
    pub widths: Vec<usize>,
    pub samples: Option<usize>,
    pub weights: String,
    pub lambda_multiblock: bool,
    pub link: String,
    pub solver: String,
    pub tolerance: f64,
    pub max_iterations: usize,
    pub offset: f64,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            family: BasisFamily::ShiftedChebyshevT.name().to_string(),
            degrees: vec![3, 3, 3],
            widths: vec![1, 1, 1, 1],
            samples: None,
            weights: "scaled".to_string(),
            lambda_multiblock: false,
            link: "log".to_string(),
            solver: "cg".to_string(),
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            offset: DEFAULT_OFFSET,
        }
    }
}

impl FitSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

/// Validated configuration of one fit. Saved verbatim inside a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub family: BasisFamily,
    pub degrees: [usize; NUM_BLOCKS],
    pub layout: ColumnLayout,
    pub samples: Option<usize>,
    pub weighting: Weighting,
    pub lambda_multiblock: bool,
    pub link: LinkFunction,
    pub offset: f64,
    pub solver: SolverSettings,
}

impl ModelConfig {
    pub fn from_settings(settings: &FitSettings) -> Result<Self, ConfigError> {
        let weighting: Weighting = settings.weights.parse()?;
        let family = BasisFamily::from_name(&settings.family)
            .ok_or_else(|| ConfigError::UnknownBasisFamily(settings.family.clone()))?;
        let link = LinkFunction::from_name(&settings.link)
            .ok_or_else(|| ConfigError::UnknownLink(settings.link.clone()))?;
        let kind = SolverKind::from_name(&settings.solver)
            .ok_or_else(|| ConfigError::UnknownSolver(settings.solver.clone()))?;
        let layout = ColumnLayout::from_slice(&settings.widths)?;
        let degrees: [usize; NUM_BLOCKS] =
            settings
                .degrees
                .as_slice()
                .try_into()
                .map_err(|_| ConfigError::DegreeMismatch {
                    expected: NUM_BLOCKS,
                    found: settings.degrees.len(),
                })?;

        if settings.samples == Some(0) {
            return Err(ConfigError::ZeroSamples);
        }
        if !(settings.tolerance.is_finite() && settings.tolerance > 0.0) {
            return Err(ConfigError::InvalidTolerance {
                name: "tolerance",
                value: settings.tolerance,
            });
        }
        if !(settings.offset.is_finite() && settings.offset > 0.0) {
            return Err(ConfigError::InvalidTolerance {
                name: "offset",
                value: settings.offset,
            });
        }

        Ok(Self {
            family,
            degrees,
            layout,
            samples: settings.samples,
            weighting,
            lambda_multiblock: settings.lambda_multiblock,
            link,
            offset: settings.offset,
            solver: SolverSettings {
                kind,
                tolerance: settings.tolerance,
                max_iterations: settings.max_iterations,
            },
        })
    }

    pub fn link_strategy(&self) -> Box<dyn AggregationLink> {
        self.link.strategy(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::link::Saturation;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn boundaries_are_cumulative() {
        let layout = ColumnLayout::new([3, 1, 2, 2]).unwrap();
        assert_eq!(layout.boundaries(), [3, 4, 6, 8]);
        assert_eq!(layout.block_range(0), 0..3);
        assert_eq!(layout.block_range(1), 3..4);
        assert_eq!(layout.block_range(2), 4..6);
        assert_eq!(layout.output_range(), 6..8);
        assert_eq!(layout.num_inputs(), 6);
    }

    #[test]
    fn empty_blocks_are_allowed_but_not_all_of_them() {
        let layout = ColumnLayout::new([2, 0, 0, 1]).unwrap();
        assert_eq!(layout.block_range(1), 2..2);
        assert!(matches!(
            ColumnLayout::new([0, 0, 0, 1]),
            Err(ConfigError::EmptyInputBlocks)
        ));
        assert!(matches!(ColumnLayout::new([1, 1, 1, 0]), Err(ConfigError::NoOutputs)));
        assert!(matches!(
            ColumnLayout::from_slice(&[1, 1, 1]),
            Err(ConfigError::WidthMismatch { expected: 4, found: 3 })
        ));
    }

    #[test]
    fn unknown_weighting_fails_validation() {
        let settings = FitSettings {
            weights: "median".to_string(),
            ..FitSettings::default()
        };
        match ModelConfig::from_settings(&settings) {
            Err(ConfigError::UnknownWeightingStrategy(name)) => assert_eq!(name, "median"),
            other => panic!("expected UnknownWeightingStrategy, got {other:?}"),
        }
    }

    #[test]
    fn default_settings_validate() {
        let config = ModelConfig::from_settings(&FitSettings::default()).unwrap();
        assert_eq!(config.family, BasisFamily::ShiftedChebyshevT);
        assert_eq!(config.weighting, Weighting::Scaled);
        assert_eq!(config.link, LinkFunction::Logarithmic);
        assert_eq!(config.solver.kind, SolverKind::ConjugateGradient);
        assert_eq!(config.link_strategy().name(), "log");
    }

    #[test]
    fn invalid_names_and_numbers_are_rejected() {
        let bad_family = FitSettings {
            family: "hermite".to_string(),
            ..FitSettings::default()
        };
        assert!(matches!(
            ModelConfig::from_settings(&bad_family),
            Err(ConfigError::UnknownBasisFamily(_))
        ));

        let bad_degrees = FitSettings {
            degrees: vec![1, 2],
            ..FitSettings::default()
        };
        assert!(matches!(
            ModelConfig::from_settings(&bad_degrees),
            Err(ConfigError::DegreeMismatch { expected: 3, found: 2 })
        ));

        let bad_tolerance = FitSettings {
            tolerance: 0.0,
            ..FitSettings::default()
        };
        assert!(matches!(
            ModelConfig::from_settings(&bad_tolerance),
            Err(ConfigError::InvalidTolerance { name: "tolerance", .. })
        ));
    }

    #[test]
    fn settings_load_from_toml_with_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "family = \"cheb_u\"\ndegrees = [2, 1, 0]\nwidths = [2, 2, 1, 2]\nweights = \"average\"\nlambda_multiblock = true\nlink = \"tanh\""
        )
        .unwrap();

        let settings = FitSettings::load(file.path()).unwrap();
        let config = ModelConfig::from_settings(&settings).unwrap();
        assert_eq!(config.family, BasisFamily::ChebyshevU);
        assert_eq!(config.degrees, [2, 1, 0]);
        assert_eq!(config.layout.widths(), [2, 2, 1, 2]);
        assert_eq!(config.weighting, Weighting::Average);
        assert!(config.lambda_multiblock);
        assert_eq!(config.link, LinkFunction::Saturating(Saturation::Tanh));
        assert_eq!(config.solver.tolerance, DEFAULT_TOLERANCE);
    }
}
