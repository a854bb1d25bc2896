//! Labeled matrices describing a finished fit, as aligned text or a
//! tab-separated file.

use crate::fit::estimate::FitResult;
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, stack};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to write tab-separated report: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportSection {
    pub title: String,
    pub values: Array2<f64>,
}

impl ReportSection {
    pub fn new(title: impl Into<String>, values: Array2<f64>) -> Self {
        Self {
            title: title.into(),
            values,
        }
    }

    fn from_view(title: impl Into<String>, values: ArrayView2<f64>) -> Self {
        Self::new(title, values.to_owned())
    }

    /// A single row holding one value per output column.
    fn from_row(title: impl Into<String>, values: &Array1<f64>) -> Self {
        Self::new(title, values.view().insert_axis(Axis(0)).to_owned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub sections: Vec<ReportSection>,
}

impl Report {
    /// Collects the inputs, every intermediate layer and the residuals of a fit.
    ///
    /// Coefficient layers are laid out one column per output.
    pub fn from_fit(result: &FitResult<'_>) -> Self {
        let mut sections = vec![
            ReportSection::from_view("Input data: X", result.dataset.inputs()),
            ReportSection::from_view("Input data: Y", result.dataset.outputs()),
            ReportSection::from_view("Normalized X", result.normalized.inputs()),
            ReportSection::from_view("Normalized Y", result.normalized.outputs()),
            ReportSection::from_view("Matrix B", result.targets.b.view()),
            ReportSection::from_view("Matrix A", result.design.raw.view()),
            ReportSection::new(
                "Matrix Lambda",
                columns_side_by_side(result.outputs.iter().map(|fit| fit.lambda.as_view())),
            ),
        ];
        for (j, fit) in result.outputs.iter().enumerate() {
            sections.push(ReportSection::from_view(
                format!("Matrix Psi{}", j + 1),
                fit.psi.aggregated.view(),
            ));
        }
        sections.push(ReportSection::new(
            "Matrix a",
            columns_side_by_side(result.outputs.iter().map(|fit| fit.a.as_view())),
        ));
        for (j, fit) in result.outputs.iter().enumerate() {
            sections.push(ReportSection::from_view(
                format!("Matrix F{}", j + 1),
                fit.fi.aggregated.view(),
            ));
        }
        sections.push(ReportSection::new(
            "Matrix c",
            columns_side_by_side(result.outputs.iter().map(|fit| fit.c.as_view())),
        ));
        sections.push(ReportSection::from_view(
            "Fitted Y (normalized)",
            result.predictions.view(),
        ));
        sections.push(ReportSection::from_view(
            "Fitted Y",
            result.denormalized.view(),
        ));

        let errors = &result.errors;
        sections.push(ReportSection::from_row(
            "Normalized residual (max |Y - F|)",
            &errors.normalized_max,
        ));
        sections.push(ReportSection::from_row(
            "Normalized residual (mean Y - F)",
            &errors.normalized_mean,
        ));
        sections.push(ReportSection::from_row("Residual (max |Y - F|)", &errors.max));
        sections.push(ReportSection::from_row("Residual (mean Y - F)", &errors.mean));

        Self { sections }
    }

    pub fn section(&self, title: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|section| section.title == title)
    }

    /// Every section as a title line followed by right-aligned rows.
    pub fn render_text(&self, precision: usize) -> String {
        self.sections
            .iter()
            .map(|section| {
                let body = section
                    .values
                    .rows()
                    .into_iter()
                    .map(|row| {
                        row.iter()
                            .map(|v| format!("{v:>width$.precision$}", width = precision + 8))
                            .join(" ")
                    })
                    .join("\n");
                format!("{}:\n{}", section.title, body)
            })
            .join("\n\n")
    }

    pub fn write_tsv(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        self.write_tsv_to(File::create(path)?)
    }

    /// One record for each title, then one per row with a leading empty field.
    pub fn write_tsv_to<W: Write>(&self, writer: W) -> Result<(), ReportError> {
        let mut out = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_writer(writer);
        for section in &self.sections {
            out.write_record([section.title.as_str()])?;
            for row in section.values.rows() {
                out.write_record(
                    std::iter::once(String::new()).chain(row.iter().map(f64::to_string)),
                )?;
            }
        }
        out.flush()?;
        Ok(())
    }
}

fn columns_side_by_side<'a>(columns: impl Iterator<Item = ArrayView1<'a, f64>>) -> Array2<f64> {
    let columns: Vec<_> = columns.collect();
    if columns.is_empty() {
        return Array2::zeros((0, 0));
    }
    // Every output column has coefficient vectors of the same length.
    stack(Axis(1), &columns).unwrap_or_else(|_| Array2::zeros((0, columns.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::config::{ColumnLayout, FitSettings, ModelConfig};
    use crate::fit::data::Dataset;
    use crate::fit::estimate::train_model;
    use ndarray::array;
    use tempfile::NamedTempFile;

    fn dataset() -> Dataset {
        Dataset::new(
            array![
                [0.1, 1.0, 5.0, 0.5, 3.0],
                [0.4, 2.0, 3.0, 1.2, 2.0],
                [0.35, 1.5, 4.0, 1.0, 2.5],
                [0.8, 3.0, 1.0, 2.1, 1.0],
                [0.6, 2.5, 2.0, 1.7, 1.5]
            ],
            ColumnLayout::new([1, 1, 1, 2]).unwrap(),
        )
        .unwrap()
    }

    fn config() -> ModelConfig {
        ModelConfig::from_settings(&FitSettings {
            widths: vec![1, 1, 1, 2],
            degrees: vec![1, 2, 1],
            ..FitSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn report_has_a_section_per_layer_and_output() {
        let data = dataset();
        let result = train_model(&data, &config()).unwrap();
        let report = Report::from_fit(&result);

        // 7 leading sections, Psi and F for each of 2 outputs, a, c,
        // two fitted matrices and four residual rows.
        assert_eq!(report.sections.len(), 7 + 2 + 1 + 2 + 1 + 2 + 4);
        assert_eq!(report.section("Matrix Lambda").unwrap().values.shape(), &[2 + 3 + 2, 2]);
        assert_eq!(report.section("Matrix a").unwrap().values.shape(), &[3, 2]);
        assert_eq!(report.section("Matrix c").unwrap().values.shape(), &[3, 2]);
        assert_eq!(report.section("Matrix Psi2").unwrap().values.shape(), &[5, 3]);
        assert_eq!(report.section("Residual (max |Y - F|)").unwrap().values.shape(), &[1, 2]);
    }

    #[test]
    fn text_rendering_lists_titles_in_order() {
        let report = Report {
            sections: vec![
                ReportSection::new("First", array![[1.0, 2.0]]),
                ReportSection::new("Second", array![[3.0], [4.0]]),
            ],
        };
        let text = report.render_text(2);
        assert_eq!(text, "First:\n      1.00       2.00\n\nSecond:\n      3.00\n      4.00");
    }

    #[test]
    fn tsv_export_writes_titles_and_rows() {
        let report = Report {
            sections: vec![ReportSection::new("Matrix c", array![[0.5, 1.5], [2.0, -1.0]])],
        };
        let file = NamedTempFile::new().unwrap();
        report.write_tsv(file.path()).unwrap();
        let written = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(written, "Matrix c\n\t0.5\t1.5\n\t2\t-1\n");
    }
}
