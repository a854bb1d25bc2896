use approx::assert_abs_diff_eq;
use ndarray::{Array2, s};
use polylink::fit::config::{ColumnLayout, ConfigError, FitSettings, ModelConfig};
use polylink::fit::data::{Dataset, load_dataset, parse_dataset};
use polylink::fit::estimate::{EstimationError, train_model};
use polylink::fit::forecast::{ForecastAdapter, LinearTrendForecaster};
use polylink::fit::model::{Predictor, TrainedModel};
use polylink::fit::normalize::NormalizeError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::{Cursor, Write};
use tempfile::NamedTempFile;

/// Inputs drawn uniformly, outputs a smooth function of them plus a little noise.
/// The first input column increases with the row index so it trends over time.
fn synthetic(rows: usize, widths: [usize; 4], seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let inputs: usize = widths[..3].iter().sum();
    let outputs = widths[3];
    let mut values = Array2::zeros((rows, inputs + outputs));
    for i in 0..rows {
        values[[i, 0]] = i as f64 / rows as f64 + rng.gen_range(0.0..0.05);
        for q in 1..inputs {
            values[[i, q]] = rng.gen_range(0.0..1.0);
        }
        let row_inputs = values.slice(s![i, ..inputs]).to_owned();
        for k in 0..outputs {
            let signal: f64 = row_inputs
                .iter()
                .enumerate()
                .map(|(q, &x)| ((q + k + 1) as f64 * x).sin())
                .sum();
            values[[i, inputs + k]] = 2.0 + signal + rng.gen_range(-0.01..0.01);
        }
    }
    Dataset::new(values, ColumnLayout::new(widths).unwrap()).unwrap()
}

fn config(settings: FitSettings) -> ModelConfig {
    ModelConfig::from_settings(&settings).unwrap()
}

#[test]
fn five_row_scaled_logarithmic_fit() {
    let text = "0.1 1.0 5.0 0.5\n0.4 2.0 3.0 1.2\n0.35 1.5 4.0 1.0\n0.8 3.0 1.0 2.1\n0.6 2.5 2.0 1.7\n";
    let cfg = config(FitSettings {
        degrees: vec![1, 1, 1],
        widths: vec![1, 1, 1, 1],
        weights: "scaled".to_string(),
        link: "log".to_string(),
        ..FitSettings::default()
    });
    let dataset = parse_dataset(Cursor::new(text), &cfg.layout, None).unwrap();
    let result = train_model(&dataset, &cfg).unwrap();

    assert_eq!(result.design.raw.ncols(), 6);
    assert_eq!(result.outputs[0].lambda.len(), 6);
    assert_eq!(result.outputs[0].a.len(), 3);
    assert_eq!(result.outputs[0].c.len(), 3);
    assert_eq!(result.denormalized.column(0).len(), 5);
    assert!(result.errors.max[0].is_finite());
    assert!(result.errors.max[0] >= 0.0);
}

#[test]
fn predictor_reproduces_fitted_rows() {
    let dataset = synthetic(40, [2, 1, 1, 2], 7);
    let cfg = config(FitSettings {
        widths: vec![2, 1, 1, 2],
        degrees: vec![2, 2, 1],
        ..FitSettings::default()
    });
    let result = train_model(&dataset, &cfg).unwrap();
    let model = result.trained_model();
    let link = model.config.link_strategy();
    let predictor = Predictor::new(&model, link.as_ref()).unwrap();

    let batch = predictor.predict_matrix(dataset.inputs()).unwrap();
    for (a, b) in batch.iter().zip(result.denormalized.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-9 * b.abs().max(1.0));
    }

    let row = predictor.predict(dataset.inputs().row(11)).unwrap();
    for (a, b) in row.iter().zip(result.denormalized.row(11).iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-9 * b.abs().max(1.0));
    }
}

#[test]
fn prediction_is_repeatable() {
    let dataset = synthetic(30, [1, 1, 1, 1], 11);
    let result = train_model(&dataset, &config(FitSettings::default())).unwrap();
    let model = result.trained_model();
    let link = model.config.link_strategy();
    let predictor = Predictor::new(&model, link.as_ref()).unwrap();

    let features = dataset.inputs().row(3).to_owned();
    let first = predictor.predict(features.view()).unwrap();
    let second = predictor.predict(features.view()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn saved_model_predicts_like_the_original() {
    let dataset = synthetic(25, [1, 2, 0, 1], 3);
    let cfg = config(FitSettings {
        widths: vec![1, 2, 0, 1],
        degrees: vec![3, 1, 2],
        lambda_multiblock: true,
        weights: "average".to_string(),
        ..FitSettings::default()
    });
    let model = train_model(&dataset, &cfg).unwrap().trained_model();

    let file = NamedTempFile::new().unwrap();
    model.save(file.path()).unwrap();
    let loaded = TrainedModel::load(file.path()).unwrap();
    assert_eq!(loaded, model);

    let link = model.config.link_strategy();
    let before = Predictor::new(&model, link.as_ref())
        .unwrap()
        .predict_matrix(dataset.inputs())
        .unwrap();
    let after = Predictor::new(&loaded, link.as_ref())
        .unwrap()
        .predict_matrix(dataset.inputs())
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn every_link_and_solver_fits_smooth_data() {
    let dataset = synthetic(30, [1, 1, 1, 1], 21);
    for link in ["log", "tanh", "arctan"] {
        for solver in ["lstsq", "cg"] {
            let cfg = config(FitSettings {
                degrees: vec![1, 1, 1],
                link: link.to_string(),
                solver: solver.to_string(),
                ..FitSettings::default()
            });
            let result = train_model(&dataset, &cfg).unwrap();
            assert!(
                result.errors.max.iter().all(|e| e.is_finite()),
                "{link}/{solver}: {:?}",
                result.errors.max
            );
        }
    }
}

#[test]
fn forecast_leaves_history_untouched() {
    let dataset = synthetic(20, [1, 1, 1, 1], 5);
    let model = train_model(&dataset, &config(FitSettings::default()))
        .unwrap()
        .trained_model();
    let link = model.config.link_strategy();
    let adapter = ForecastAdapter::new(
        Predictor::new(&model, link.as_ref()).unwrap(),
        &LinearTrendForecaster,
    );

    let result = adapter.forecast(&dataset, 1).unwrap();
    let n = dataset.nrows();
    assert_eq!(result.outputs.nrows(), n);
    assert_eq!(
        result.outputs.slice(s![..n - 1, ..]),
        dataset.outputs().slice(s![..n - 1, ..])
    );
    // The first input column trends upward, so its extrapolation continues past the data.
    assert!(result.inputs[[0, 0]] > dataset.inputs()[[n - 2, 0]]);
}

#[test]
fn settings_file_drives_a_fit() {
    let mut settings = NamedTempFile::new().unwrap();
    writeln!(
        settings,
        "widths = [1, 1, 1, 1]\ndegrees = [2, 1, 1]\nweights = \"average\"\nsolver = \"lstsq\"\nsamples = 4"
    )
    .unwrap();
    let mut data = NamedTempFile::new().unwrap();
    writeln!(
        data,
        "# x1 x2 x3 y\n0.1 1.0 5.0 0.5\n0.4 2.0 3.0 1.2\n0.35 1.5 4.0 1.0\n0.8 3.0 1.0 2.1\n0.6 2.5 2.0 1.7"
    )
    .unwrap();

    let cfg = ModelConfig::from_settings(&FitSettings::load(settings.path()).unwrap()).unwrap();
    let dataset = load_dataset(data.path(), &cfg.layout, cfg.samples).unwrap();
    assert_eq!(dataset.nrows(), 4);
    let result = train_model(&dataset, &cfg).unwrap();
    assert_eq!(result.outputs[0].lambda.len(), 3 + 2 + 2);
}

#[test]
fn unknown_weighting_is_rejected_before_fitting() {
    let err = ModelConfig::from_settings(&FitSettings {
        weights: "median".to_string(),
        ..FitSettings::default()
    })
    .unwrap_err();
    assert!(matches!(err, ConfigError::UnknownWeightingStrategy(_)));
    assert!(err.to_string().contains("median"));
}

#[test]
fn constant_column_is_reported_not_nan() {
    let text = "0.1 7.0 5.0 0.5\n0.4 7.0 3.0 1.2\n0.35 7.0 4.0 1.0\n";
    let cfg = config(FitSettings::default());
    let dataset = parse_dataset(Cursor::new(text), &cfg.layout, None).unwrap();
    match train_model(&dataset, &cfg) {
        Err(EstimationError::Normalize(NormalizeError::DegenerateColumn { column, value })) => {
            assert_eq!(column, 1);
            assert_eq!(value, 7.0);
        }
        other => panic!("expected DegenerateColumn, got {other:?}"),
    }
}
