#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use polylink::fit::config::{FitSettings, ModelConfig};
use polylink::fit::data::{load_dataset, load_feature_rows};
use polylink::fit::estimate::train_model;
use polylink::fit::forecast::{ForecastAdapter, LinearTrendForecaster};
use polylink::fit::model::{Predictor, TrainedModel};
use polylink::fit::report::{Report, ReportSection};

#[derive(Args)]
pub struct FitArgs {
    /// Whitespace-delimited data file: X1 | X2 | X3 | Y columns on every line
    pub data: PathBuf,

    /// TOML settings file; flags given on the command line take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Column counts of X1, X2, X3 and Y
    #[arg(long, value_delimiter = ',')]
    pub widths: Option<Vec<usize>>,

    /// Maximum basis degree of X1, X2 and X3
    #[arg(long, value_delimiter = ',')]
    pub degrees: Option<Vec<usize>>,

    /// Basis family: cheb_t, sh_cheb_t, cheb_u, sh_cheb_u, cos, arctg or tanh
    #[arg(long)]
    pub family: Option<String>,

    /// Read only the first N samples
    #[arg(long, value_name = "N")]
    pub samples: Option<usize>,

    /// First-layer target: average or scaled
    #[arg(long)]
    pub weights: Option<String>,

    /// Solve the first layer independently for every input block
    #[arg(long)]
    pub lambda_multiblock: bool,

    /// Aggregation link: log, tanh or arctan
    #[arg(long)]
    pub link: Option<String>,

    /// Linear solver: lstsq, normal or cg
    #[arg(long)]
    pub solver: Option<String>,

    /// Residual tolerance for the conjugate gradient solver
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Iteration cap for the conjugate gradient solver
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Where to save the trained model
    #[arg(long, default_value = "model.toml")]
    pub model: PathBuf,

    /// Also write every intermediate matrix to this tab-separated file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Print every intermediate matrix
    #[arg(long)]
    pub show: bool,
}

#[derive(Args)]
pub struct PredictArgs {
    /// Whitespace-delimited file of raw input rows (X1 | X2 | X3 only)
    pub features: PathBuf,

    /// Path to trained model file (.toml)
    #[arg(long)]
    pub model: PathBuf,

    /// Write predictions to this tab-separated file instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct ForecastArgs {
    /// Data file in the layout the model was trained on
    pub data: PathBuf,

    /// Path to trained model file (.toml)
    #[arg(long)]
    pub model: PathBuf,

    /// Number of steps to extrapolate, between 1 and the number of samples
    #[arg(long)]
    pub horizon: usize,

    /// Read only the first N samples
    #[arg(long, value_name = "N")]
    pub samples: Option<usize>,

    /// Write the extrapolated inputs and spliced outputs to this tab-separated file
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl FitArgs {
    /// The settings file (or defaults) with command-line overrides applied.
    fn settings(&self) -> Result<FitSettings, Box<dyn std::error::Error>> {
        let mut settings = match &self.config {
            Some(path) => FitSettings::load(path)?,
            None => FitSettings::default(),
        };
        if let Some(widths) = &self.widths {
            settings.widths = widths.clone();
        }
        if let Some(degrees) = &self.degrees {
            settings.degrees = degrees.clone();
        }
        if let Some(family) = &self.family {
            settings.family = family.clone();
        }
        if self.samples.is_some() {
            settings.samples = self.samples;
        }
        if let Some(weights) = &self.weights {
            settings.weights = weights.clone();
        }
        if self.lambda_multiblock {
            settings.lambda_multiblock = true;
        }
        if let Some(link) = &self.link {
            settings.link = link.clone();
        }
        if let Some(solver) = &self.solver {
            settings.solver = solver.clone();
        }
        if let Some(tolerance) = self.tolerance {
            settings.tolerance = tolerance;
        }
        if let Some(max_iterations) = self.max_iterations {
            settings.max_iterations = max_iterations;
        }
        Ok(settings)
    }
}

pub fn fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ModelConfig::from_settings(&args.settings()?)?;

    println!("Loading data from: {}", args.data.display());
    let dataset = load_dataset(&args.data, &config.layout, config.samples)?;

    let result = train_model(&dataset, &config)?;
    let report = Report::from_fit(&result);
    if args.show {
        println!("{}", report.render_text(6));
    }
    for (j, (max, mean)) in result
        .errors
        .max
        .iter()
        .zip(result.errors.mean.iter())
        .enumerate()
    {
        println!("Output {}: max |Y - F| = {max:.6e}, mean (Y - F) = {mean:.6e}", j + 1);
    }
    if !result.diagnostics.all_converged() {
        println!(
            "Note: {} solve(s) hit the iteration cap; see the log for details.",
            result.diagnostics.non_converged().count()
        );
    }

    if let Some(path) = &args.report {
        report.write_tsv(path)?;
        println!("Report saved to: {}", path.display());
    }

    result.trained_model().save(&args.model)?;
    println!("Model saved to: {}", args.model.display());
    Ok(())
}

pub fn predict(args: PredictArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model from: {}", args.model.display());
    let model = TrainedModel::load(&args.model)?;
    let features = load_feature_rows(&args.features, model.num_inputs())?;
    println!("Loaded {} rows for prediction", features.nrows());

    let link = model.config.link_strategy();
    let predictions = Predictor::new(&model, link.as_ref())?.predict_matrix(features.view())?;

    let report = Report {
        sections: vec![ReportSection::new("Predicted Y", predictions)],
    };
    match &args.output {
        Some(path) => {
            report.write_tsv(path)?;
            println!("Predictions saved to: {}", path.display());
        }
        None => report.write_tsv_to(std::io::stdout().lock())?,
    }
    Ok(())
}

pub fn forecast(args: ForecastArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model from: {}", args.model.display());
    let model = TrainedModel::load(&args.model)?;
    let dataset = load_dataset(&args.data, &model.config.layout, args.samples)?;

    let link = model.config.link_strategy();
    let adapter = ForecastAdapter::new(
        Predictor::new(&model, link.as_ref())?,
        &LinearTrendForecaster,
    );
    let result = adapter.forecast(&dataset, args.horizon)?;

    let report = Report {
        sections: vec![
            ReportSection::new("Extrapolated X", result.inputs),
            ReportSection::new("Y with forecast", result.outputs),
        ],
    };
    match &args.output {
        Some(path) => {
            report.write_tsv(path)?;
            println!("Forecast saved to: {}", path.display());
        }
        None => println!("{}", report.render_text(6)),
    }
    Ok(())
}

fn print_help() -> Result<(), Box<dyn std::error::Error>> {
    Cli::command().print_help()?;
    println!();
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "polylink",
    about = "Layered additive nonlinear regression with orthogonal-polynomial bases",
    long_about = "Fits a three-layer additive model mapping three grouped input blocks to one or \
                 more outputs, predicts from saved models, and forecasts by extrapolating inputs."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a model and save it
    Fit(FitArgs),
    /// Predict outputs for new input rows with a saved model
    Predict(PredictArgs),
    /// Extrapolate inputs and splice predicted outputs into the last rows
    Forecast(ForecastArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Fit(args)) => fit(args),
        Some(Commands::Predict(args)) => predict(args),
        Some(Commands::Forecast(args)) => forecast(args),
        None => print_help(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
