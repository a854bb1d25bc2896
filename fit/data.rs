//! # Data Loading and Validation Module
//!
//! Reads the raw observation matrix: one sample per line, whitespace-separated
//! numbers, with the columns of X1, X2, X3 and Y laid out contiguously in that
//! order. Blank lines and lines starting with `#` are skipped.
//!
//! Failures are assumed to be user-input errors, and [`DataError`] names the
//! offending line so they can be fixed at the source.

use crate::fit::config::{ColumnLayout, NUM_BLOCKS};
use ndarray::{Array2, ArrayView2, s};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Minimum number of rows needed to give every column a range.
const MINIMUM_ROWS: usize = 2;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line} has {found} columns, but the block widths require {expected}.")]
    MalformedRow {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("Line {line}: '{token}' is not a number.")]
    InvalidNumber { line: usize, token: String },

    #[error("Line {line} contains a non-finite value (NaN or Infinity).")]
    NonFinite { line: usize },

    #[error("Expected {required} data rows, but the input only contains {found}.")]
    InsufficientRows { found: usize, required: usize },

    #[error("Matrix has {found} columns, but the block widths require {expected}.")]
    ShapeMismatch { expected: usize, found: usize },
}

/// The raw observation matrix together with its block layout. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    values: Array2<f64>,
    layout: ColumnLayout,
}

impl Dataset {
    pub fn new(values: Array2<f64>, layout: ColumnLayout) -> Result<Self, DataError> {
        if values.ncols() != layout.total_columns() {
            return Err(DataError::ShapeMismatch {
                expected: layout.total_columns(),
                found: values.ncols(),
            });
        }
        if values.nrows() < MINIMUM_ROWS {
            return Err(DataError::InsufficientRows {
                found: values.nrows(),
                required: MINIMUM_ROWS,
            });
        }
        if let Some((row, _)) = values
            .rows()
            .into_iter()
            .enumerate()
            .find(|(_, row)| row.iter().any(|v| !v.is_finite()))
        {
            return Err(DataError::NonFinite { line: row + 1 });
        }
        Ok(Self { values, layout })
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// X1 | X2 | X3 side by side.
    pub fn inputs(&self) -> ArrayView2<'_, f64> {
        self.values.slice(s![.., self.layout.input_range()])
    }

    pub fn outputs(&self) -> ArrayView2<'_, f64> {
        self.values.slice(s![.., self.layout.output_range()])
    }

    /// Raw columns of input block `block`.
    pub fn block(&self, block: usize) -> ArrayView2<'_, f64> {
        debug_assert!(block < NUM_BLOCKS);
        self.values.slice(s![.., self.layout.block_range(block)])
    }
}

/// Loads a dataset from a whitespace-delimited text file.
///
/// With `samples = Some(k)` only the first `k` data rows are read, and fewer
/// than `k` rows is an error.
pub fn load_dataset(
    path: impl AsRef<Path>,
    layout: &ColumnLayout,
    samples: Option<usize>,
) -> Result<Dataset, DataError> {
    let file = File::open(path)?;
    parse_dataset(BufReader::new(file), layout, samples)
}

pub fn parse_dataset<R: BufRead>(
    reader: R,
    layout: &ColumnLayout,
    samples: Option<usize>,
) -> Result<Dataset, DataError> {
    let expected = layout.total_columns();
    let values = read_matrix(reader, expected, samples)?;

    if let Some(required) = samples {
        if values.nrows() < required {
            return Err(DataError::InsufficientRows {
                found: values.nrows(),
                required,
            });
        }
    }

    log::info!(
        "Loaded {} samples with {} input and {} output columns.",
        values.nrows(),
        layout.num_inputs(),
        layout.num_outputs()
    );
    Dataset::new(values, *layout)
}

/// Reads feature rows (input columns only) for batch prediction.
pub fn load_feature_rows(
    path: impl AsRef<Path>,
    num_inputs: usize,
) -> Result<Array2<f64>, DataError> {
    let file = File::open(path)?;
    read_matrix(BufReader::new(file), num_inputs, None)
}

fn read_matrix<R: BufRead>(
    reader: R,
    expected: usize,
    limit: Option<usize>,
) -> Result<Array2<f64>, DataError> {
    let mut flat = Vec::new();
    let mut rows = 0;

    for (index, line) in reader.lines().enumerate() {
        if limit.is_some_and(|k| rows >= k) {
            break;
        }
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line_no = index + 1;

        let start = flat.len();
        for token in trimmed.split_whitespace() {
            let value: f64 = token.parse().map_err(|_| DataError::InvalidNumber {
                line: line_no,
                token: token.to_string(),
            })?;
            if !value.is_finite() {
                return Err(DataError::NonFinite { line: line_no });
            }
            flat.push(value);
        }
        let found = flat.len() - start;
        if found != expected {
            return Err(DataError::MalformedRow {
                line: line_no,
                expected,
                found,
            });
        }
        rows += 1;
    }

    let total = flat.len();
    Array2::from_shape_vec((rows, expected), flat).map_err(|_| DataError::ShapeMismatch {
        expected,
        found: total / rows.max(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    fn layout() -> ColumnLayout {
        ColumnLayout::new([1, 1, 1, 1]).unwrap()
    }

    #[test]
    fn parses_rows_and_partitions_blocks() {
        let text = "# header comment\n1 2 3 4\n\n5 6 7 8\n9 10 11 12\n";
        let dataset = parse_dataset(Cursor::new(text), &layout(), None).unwrap();
        assert_eq!(dataset.nrows(), 3);
        assert_eq!(dataset.block(1).column(0).to_vec(), vec![2.0, 6.0, 10.0]);
        assert_eq!(dataset.outputs().column(0).to_vec(), vec![4.0, 8.0, 12.0]);
        assert_eq!(dataset.inputs().ncols(), 3);
    }

    #[test]
    fn malformed_row_names_the_line() {
        let text = "1 2 3 4\n5 6 7\n";
        match parse_dataset(Cursor::new(text), &layout(), None).unwrap_err() {
            DataError::MalformedRow {
                line,
                expected,
                found,
            } => {
                assert_eq!((line, expected, found), (2, 4, 3));
            }
            other => panic!("expected MalformedRow, got {other:?}"),
        }
    }

    #[test]
    fn rejects_non_numeric_and_non_finite_tokens() {
        let text = "1 2 x 4\n";
        assert!(matches!(
            parse_dataset(Cursor::new(text), &layout(), None),
            Err(DataError::InvalidNumber { line: 1, .. })
        ));
        let text = "1 2 3 4\n1 NaN 3 4\n";
        assert!(matches!(
            parse_dataset(Cursor::new(text), &layout(), None),
            Err(DataError::NonFinite { line: 2 })
        ));
    }

    #[test]
    fn sample_limit_truncates_and_requires_enough_rows() {
        let text = "1 2 3 4\n5 6 7 8\n9 10 11 12\nthis line is never read\n";
        let dataset = parse_dataset(Cursor::new(text), &layout(), Some(3)).unwrap();
        assert_eq!(dataset.nrows(), 3);

        let short = "1 2 3 4\n5 6 7 8\n";
        assert!(matches!(
            parse_dataset(Cursor::new(short), &layout(), Some(5)),
            Err(DataError::InsufficientRows { found: 2, required: 5 })
        ));
    }

    #[test]
    fn single_row_is_too_few() {
        assert!(matches!(
            parse_dataset(Cursor::new("1 2 3 4\n"), &layout(), None),
            Err(DataError::InsufficientRows { found: 1, required: 2 })
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "0.1 0.2 0.3 0.4").unwrap();
        writeln!(file, "0.5 0.6 0.7 0.8").unwrap();
        let dataset = load_dataset(file.path(), &layout(), None).unwrap();
        assert_eq!(dataset.values()[[1, 3]], 0.8);
    }
}
