use base::{cli::CommonArgs, FitConfig, FitError, ParamKind, SolverMethod};
use std::{
    fmt::{Display, Formatter},
    path::PathBuf,
};

/// merlfit command line interface arguments.
#[derive(clap::Parser, Debug)]
#[clap(
    author,
    version,
    about = "Fits compact parametric models to measured MERL BRDF data."
)]
pub struct CliArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Command to execute.
    #[clap(subcommand)]
    pub command: SubCommand,
}

/// merlfit command.
#[derive(clap::Subcommand, Debug)]
pub enum SubCommand {
    /// Fits measured MERL files.
    Fit(FitOptions),
    /// Fits a synthetic cos(theta_i) cos(theta_o) BRDF sampled on a regular
    /// grid.
    Synth(SynthOptions),
}

#[derive(clap::Args, Debug)]
#[clap(about = "Fit a compact model to measured MERL BRDF files.")]
pub struct FitOptions {
    #[clap(required = true, help = "MERL binary files (.binary) to fit")]
    pub inputs: Vec<PathBuf>,

    #[clap(
        long,
        default_value_t = 1,
        help = "Decode only every n-th bin of the MERL table"
    )]
    pub stride: usize,

    #[command(flatten)]
    pub tuning: TuningOptions,
}

#[derive(clap::Args, Debug)]
#[clap(about = "Fit a compact model to a synthetic cos * cos BRDF.")]
pub struct SynthOptions {
    #[clap(
        long,
        default_value_t = 16,
        help = "Number of zenith bins of the sampling grid"
    )]
    pub resolution: usize,

    #[command(flatten)]
    pub tuning: TuningOptions,
}

/// Options shared by the fitting commands; they override the values of the
/// configuration file.
#[derive(clap::Args, Debug)]
pub struct TuningOptions {
    #[clap(short, long, help = "Path to a TOML fitting configuration")]
    pub config: Option<PathBuf>,

    #[clap(short, long, help = "Parametrisation to fit")]
    pub param: Option<ParamKind>,

    #[clap(short, long, help = "Minimisation method")]
    pub method: Option<SolverMethod>,

    #[clap(long, help = "Maximum number of solver iterations")]
    pub max_iterations: Option<usize>,

    #[clap(long, help = "Convergence tolerance")]
    pub tolerance: Option<f64>,

    #[clap(long, help = "Initial damping factor")]
    pub damping: Option<f64>,

    #[clap(long, help = "Albedo quadrature density (zenith strata)")]
    pub density: Option<u32>,

    #[clap(long, help = "Fit only every n-th sample")]
    pub subsample: Option<usize>,

    #[clap(long, help = "Wall-clock budget of the solver in seconds")]
    pub time_budget: Option<f64>,

    #[clap(short, long, value_enum, default_value_t = OutputFormat::Json, help = "Output format")]
    pub format: OutputFormat,

    #[clap(
        short,
        long,
        help = "Directory where the results are written. Printed to stdout if\nnot specified"
    )]
    pub output: Option<PathBuf>,
}

impl TuningOptions {
    /// Loads the configuration file if any and applies the overrides.
    pub fn config(&self) -> Result<FitConfig, FitError> {
        let mut config = match &self.config {
            Some(path) => FitConfig::load(path)?,
            None => FitConfig::default(),
        };
        if let Some(param) = self.param {
            config.parametrisation = param;
        }
        if let Some(method) = self.method {
            config.method = method;
        }
        if let Some(max_iterations) = self.max_iterations {
            config.max_iterations = max_iterations;
        }
        if let Some(tolerance) = self.tolerance {
            config.tolerance = tolerance;
        }
        if let Some(damping) = self.damping {
            config.initial_damping = damping;
        }
        if let Some(density) = self.density {
            config.albedo.density = density;
        }
        if let Some(stride) = self.subsample {
            config.subsample_stride = stride;
        }
        if let Some(secs) = self.time_budget {
            config.time_budget_secs = Some(secs);
        }
        Ok(config)
    }
}

/// Format of the written results.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty printed JSON record.
    #[default]
    Json,
    /// Plain `key value` lines.
    Text,
}

impl OutputFormat {
    /// File extension of the format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "txt",
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.extension()) }
}
