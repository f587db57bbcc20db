//! Fit results and their flat serialised form.

use crate::{
    albedo::Albedo,
    fitting::{Solution, SolverStatus},
    param::{check_layout, new_parametrisation, Parametrisation},
};
use base::{
    brdf::{DirectionPair, Rgb},
    config::{FitConfig, ParamKind},
    error::FitError,
    RECORD_VERSION,
};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Everything produced by one fitting run.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    /// Parametrisation that has been fitted.
    pub kind: ParamKind,
    /// Fitted parameter vector; its layout is owned by `kind`.
    pub params: Box<[f64]>,
    /// How the solver terminated.
    pub status: SolverStatus,
    /// Mean squared reconstruction error.
    pub error: f64,
    /// Albedo of the fitted model.
    pub albedo: Albedo,
    /// Whether the albedo respects energy conservation.
    pub albedo_in_bounds: bool,
    /// Number of samples contributing to `error`.
    pub n_samples: usize,
    /// Number of samples excluded because of non-finite residuals.
    pub n_excluded: usize,
    /// Number of solver iterations.
    pub iterations: usize,
    /// Name of the fitted material, if known.
    pub material: Option<String>,
}

impl FitResult {
    /// Packs a solver outcome and the albedo of the fitted model.
    pub fn assemble(
        kind: ParamKind,
        solution: Solution,
        albedo: Albedo,
        material: Option<&str>,
    ) -> Self {
        Self {
            kind,
            params: solution.params,
            status: solution.status,
            error: solution.error,
            albedo_in_bounds: albedo.in_bounds(),
            albedo,
            n_samples: solution.n_used,
            n_excluded: solution.n_excluded,
            iterations: solution.iterations,
            material: material.map(str::to_owned),
        }
    }

    /// Returns true if the solver converged.
    pub fn is_converged(&self) -> bool { self.status.is_converged() }

    /// Recreates the parametrisation the result belongs to.
    pub fn model(&self, config: &FitConfig) -> Box<dyn Parametrisation> {
        new_parametrisation(self.kind, config)
    }

    /// Evaluates the fitted BRDF.
    pub fn evaluate(&self, dirs: &DirectionPair, config: &FitConfig) -> Result<Rgb, FitError> {
        self.model(config)
            .evaluate(dirs, &self.params, config.hemisphere_epsilon)
    }

    /// Returns the flat record handed to the writers.
    pub fn record(&self) -> FitRecord {
        FitRecord {
            kind: self.kind,
            count: self.params.len(),
            params: self.params.to_vec(),
            albedo: self.albedo.rgb,
            status: self.status,
            error: self.error,
            material: self.material.clone(),
            version: RECORD_VERSION.to_string(),
        }
    }
}

/// Flat record of a fit result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRecord {
    /// Parametrisation tag.
    pub kind: ParamKind,
    /// Number of parameters.
    pub count: usize,
    /// Ordered parameter values.
    pub params: Vec<f64>,
    /// Albedo per channel.
    pub albedo: Rgb,
    /// Solver status tag.
    pub status: SolverStatus,
    /// Final mean squared error.
    pub error: f64,
    /// Material name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    /// Layout version of the record.
    pub version: String,
}

impl FitRecord {
    /// Serialises the record as pretty JSON.
    pub fn to_json(&self) -> Result<String, FitError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a record and checks that the parameter count matches the
    /// parametrisation.
    pub fn from_json(s: &str) -> Result<Self, FitError> {
        let record: Self = serde_json::from_str(s)?;
        let model = new_parametrisation(record.kind, &FitConfig::default());
        check_layout(model.as_ref(), &record.params)?;
        if record.count != record.params.len() {
            return Err(FitError::ParameterCount {
                expected: record.count,
                actual: record.params.len(),
            });
        }
        Ok(record)
    }

    /// Writes the record as pretty JSON.
    pub fn write_json<W: Write>(&self, mut writer: W) -> Result<(), FitError> {
        writeln!(writer, "{}", self.to_json()?)?;
        Ok(())
    }

    /// Writes the record as plain `key value...` lines.
    pub fn write_text<W: Write>(&self, mut writer: W) -> Result<(), FitError> {
        let join = |values: &[f64]| {
            values
                .iter()
                .map(|v| format!("{:e}", v))
                .collect::<Vec<_>>()
                .join(" ")
        };
        if let Some(material) = &self.material {
            writeln!(writer, "material {}", material)?;
        }
        writeln!(writer, "kind {}", self.kind)?;
        writeln!(writer, "count {}", self.count)?;
        writeln!(writer, "params {}", join(&self.params))?;
        writeln!(writer, "albedo {}", join(&self.albedo))?;
        writeln!(writer, "status {}", self.status)?;
        writeln!(writer, "error {:e}", self.error)?;
        writeln!(writer, "version {}", self.version)?;
        Ok(())
    }
}
