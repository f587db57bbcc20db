//! Configuration of a fitting run.
//!
//! Every tolerance used by the solver and the albedo estimator is carried
//! here and passed down explicitly, so that two runs with the same
//! configuration and the same data give the same result.

use crate::error::FitError;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    path::Path,
    time::Duration,
};

/// Compact parametrisation used to represent a BRDF.
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamKind {
    /// Fewest degrees of freedom, coarsest reconstruction.
    #[default]
    #[cfg_attr(feature = "cli", value(alias = "small"))]
    SmallStorage,
    /// Adds a lobe along the z-axis of the half-vector.
    #[cfg_attr(feature = "cli", value(alias = "z"))]
    ZAugmented,
}

impl ParamKind {
    /// Returns the tag written in result records.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::SmallStorage => "small-storage",
            Self::ZAugmented => "z-augmented",
        }
    }
}

impl Display for ParamKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.tag()) }
}

/// Iterative method used to minimise the reconstruction error.
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverMethod {
    /// Damped Gauss-Newton (Levenberg-Marquardt) with parallel accumulation
    /// of the normal equations.
    #[default]
    #[cfg_attr(feature = "cli", value(alias = "lm"))]
    DampedGaussNewton,
    /// MINPACK Levenberg-Marquardt from the `levenberg-marquardt` crate.
    Minpack,
    /// Hooke-Jeeves pattern search, derivative free.
    #[cfg_attr(feature = "cli", value(alias = "hj"))]
    PatternSearch,
}

/// Which hemispherical integral is reported as albedo.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AlbedoDefinition {
    /// $\frac{1}{\pi}\int\int f \cos\theta_i \cos\theta_o d\omega_i
    /// d\omega_o$, the white-sky albedo.
    #[default]
    Bihemispherical,
    /// $\int f \cos\theta_o d\omega_o$ for a fixed incident zenith angle.
    Directional {
        /// Incident zenith angle in radians.
        theta_i: f64,
    },
}

/// Quadrature rule for hemispherical integration.
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quadrature {
    /// Midpoint rule on a zenith × azimuth product grid with exact cell
    /// solid angles.
    #[default]
    Midpoint,
    /// Stratified cosine-weighted directions.
    Cosine,
}

/// Settings of the albedo estimator.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlbedoConfig {
    /// Integral to compute.
    pub definition: AlbedoDefinition,
    /// Quadrature rule.
    pub quadrature: Quadrature,
    /// Number of zenith strata; azimuth uses four times as many.
    pub density: u32,
}

impl Default for AlbedoConfig {
    fn default() -> Self {
        Self {
            definition: AlbedoDefinition::Bihemispherical,
            quadrature: Quadrature::Midpoint,
            density: 32,
        }
    }
}

/// Configuration of a fitting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Parametrisation to fit.
    pub parametrisation: ParamKind,
    /// Minimisation method.
    pub method: SolverMethod,
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Threshold on the improvement of the mean squared error between two
    /// iterations, and on the gradient norm.
    pub tolerance: f64,
    /// Number of consecutive iterations below tolerance before declaring
    /// convergence.
    pub convergence_window: usize,
    /// Initial damping factor.
    pub initial_damping: f64,
    /// Lower bound of the damping factor.
    pub min_damping: f64,
    /// Upper bound of the damping factor.
    pub max_damping: f64,
    /// Factor applied to the damping after a rejected step.
    pub damping_increase: f64,
    /// Divisor applied to the damping after an accepted step.
    pub damping_decrease: f64,
    /// Number of rejected steps tolerated within one iteration before the
    /// run is declared stagnated.
    pub max_retries: usize,
    /// Only every n-th sample takes part in the fit.
    pub subsample_stride: usize,
    /// Wall-clock budget checked between iterations.
    pub time_budget_secs: Option<f64>,
    /// Tolerance of the unit-length and upper hemisphere checks.
    pub hemisphere_epsilon: f64,
    /// Smallest relative step of the pattern search.
    pub min_step: f64,
    /// Initial relative step of the pattern search.
    pub initial_step: f64,
    /// Initial sharpness of the half-vector lobe.
    pub lobe_sharpness_seed: f64,
    /// Albedo estimation.
    pub albedo: AlbedoConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            parametrisation: ParamKind::SmallStorage,
            method: SolverMethod::DampedGaussNewton,
            max_iterations: 100,
            tolerance: 1.0e-6,
            convergence_window: 3,
            initial_damping: 1.0e-3,
            min_damping: 1.0e-12,
            max_damping: 1.0e12,
            damping_increase: 10.0,
            damping_decrease: 10.0,
            max_retries: 10,
            subsample_stride: 1,
            time_budget_secs: None,
            hemisphere_epsilon: 1.0e-6,
            min_step: 1.0e-6,
            initial_step: 0.25,
            lobe_sharpness_seed: 20.0,
            albedo: AlbedoConfig::default(),
        }
    }
}

impl FitConfig {
    /// Loads a configuration from a TOML file. Missing fields take their
    /// default value.
    pub fn load(path: &Path) -> Result<Self, FitError> {
        let string = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&string)?;
        log::info!("Loaded fitting configuration from {}", path.display());
        Ok(config)
    }

    /// Parses a configuration from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, FitError> { Ok(toml::from_str(s)?) }

    /// Returns the wall-clock budget if any.
    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_secs
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Rejects inconsistent settings before any work starts.
    pub fn validate(&self) -> Result<(), FitError> {
        let invalid = |msg: &str| Err(FitError::InvalidConfig(msg.to_string()));
        let positive = |x: f64| x.is_finite() && x > 0.0;
        if self.max_iterations == 0 {
            return invalid("the iteration budget must be at least one");
        }
        if !positive(self.tolerance) {
            return invalid("the convergence tolerance must be positive");
        }
        if self.convergence_window == 0 {
            return invalid("the convergence window must be at least one");
        }
        if !positive(self.initial_damping)
            || !positive(self.min_damping)
            || !positive(self.max_damping)
            || self.min_damping > self.max_damping
            || self.initial_damping < self.min_damping
            || self.initial_damping > self.max_damping
        {
            return invalid("the damping bounds must satisfy 0 < min <= initial <= max");
        }
        if !(self.damping_increase.is_finite() && self.damping_increase > 1.0)
            || !(self.damping_decrease.is_finite() && self.damping_decrease > 1.0)
        {
            return invalid("the damping factors must be greater than one");
        }
        if self.subsample_stride == 0 {
            return invalid("the subsample stride must be at least one");
        }
        if let Some(secs) = self.time_budget_secs {
            if !positive(secs) {
                return invalid("the time budget must be positive");
            }
        }
        if !positive(self.hemisphere_epsilon) {
            return invalid("the hemisphere epsilon must be positive");
        }
        if !positive(self.min_step) || !positive(self.initial_step) {
            return invalid("the pattern search steps must be positive");
        }
        if !(self.lobe_sharpness_seed.is_finite() && self.lobe_sharpness_seed >= 0.0) {
            return invalid("the lobe sharpness seed must be non-negative");
        }
        if self.albedo.density == 0 {
            return invalid("the albedo quadrature density must be at least one");
        }
        if let AlbedoDefinition::Directional { theta_i } = self.albedo.definition {
            if !(0.0..std::f64::consts::FRAC_PI_2).contains(&theta_i) {
                return invalid("the incident zenith of the directional albedo must be in [0, pi/2)");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() { assert!(FitConfig::default().validate().is_ok()); }

    #[test]
    fn zero_budget_is_rejected() {
        let config = FitConfig {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(FitError::InvalidConfig(_))));
    }

    #[test]
    fn non_positive_tolerance_is_rejected() {
        for tolerance in [0.0, -1.0e-6, f64::NAN] {
            let config = FitConfig {
                tolerance,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "tolerance {tolerance} accepted");
        }
    }

    #[test]
    fn damping_bounds_are_checked() {
        let config = FitConfig {
            initial_damping: 1.0e20,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_partial_toml() {
        let config = FitConfig::from_toml(
            r#"
            parametrisation = "z-augmented"
            method = "pattern-search"
            max_iterations = 250
            time_budget_secs = 5.0

            [albedo]
            quadrature = "cosine"
            definition = { type = "directional", theta_i = 0.5 }
            "#,
        )
        .unwrap();
        assert_eq!(config.parametrisation, ParamKind::ZAugmented);
        assert_eq!(config.method, SolverMethod::PatternSearch);
        assert_eq!(config.max_iterations, 250);
        assert_eq!(config.tolerance, 1.0e-6);
        assert_eq!(config.time_budget(), Some(Duration::from_secs(5)));
        assert_eq!(config.albedo.quadrature, Quadrature::Cosine);
        assert_eq!(config.albedo.density, 32);
        assert_eq!(
            config.albedo.definition,
            AlbedoDefinition::Directional { theta_i: 0.5 }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_variant_fails_to_parse() {
        assert!(matches!(
            FitConfig::from_toml("parametrisation = \"spherical-harmonics\""),
            Err(FitError::Toml(_))
        ));
    }
}
