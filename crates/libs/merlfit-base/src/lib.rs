//! # merlfit-base
//! Base library for merlfit.
//!
//! Contains the types shared by the fitting library and the command line
//! tool: the error taxonomy, the math helpers for working with direction
//! pairs, the in-memory store of measured BRDF samples and the configuration
//! of a fitting run.
#![warn(missing_docs)]

pub mod brdf;
pub mod config;
pub mod error;
pub mod math;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(feature = "io")]
pub mod merl;

pub use brdf::{AngularGrid, DirectionPair, Rgb, Sample, SampleStore, N_CHANNELS};
pub use config::{
    AlbedoConfig, AlbedoDefinition, FitConfig, ParamKind, Quadrature, SolverMethod,
};
pub use error::FitError;

/// Version of anything in merlfit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
}

impl Version {
    /// Creates a new version.
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Returns the version as a string.
    pub fn as_string(&self) -> String { format!("v{}.{}.{}", self.major, self.minor, self.patch) }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

/// Version of the fit record layout written by the result writers.
pub const RECORD_VERSION: Version = Version::new(0, 1, 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string() {
        assert_eq!(Version::new(1, 2, 3).to_string(), "v1.2.3");
        assert_eq!(RECORD_VERSION.as_string(), "v0.1.0");
    }
}
