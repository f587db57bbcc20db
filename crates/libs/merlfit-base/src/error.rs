//! Error types of a fitting run.
//!
//! Defects found before the solver starts (configuration, empty or malformed
//! sample stores) are fatal and reported immediately. Numeric trouble during
//! the iterations is absorbed per sample and only surfaces here as
//! [`FitError::DegenerateData`] when a whole iteration has nothing left to
//! work with. Non-convergence is not an error; it is reported as a status on
//! the fit result.

/// Errors that can occur while preparing or running a fit.
#[derive(Debug, thiserror::Error)]
pub enum FitError {
    /// The configuration is rejected before any work starts.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The sample store holds no sample.
    #[error("The sample store is empty")]
    EmptySampleStore,

    /// A direction pair is not made of unit vectors in the upper hemisphere.
    #[error("Sample {index} has a direction outside the upper hemisphere")]
    InvalidDirection {
        /// Index of the offending sample.
        index: usize,
    },

    /// A measured value is finite but negative.
    #[error("Sample {index} has a negative reflectance")]
    InvalidReflectance {
        /// Index of the offending sample.
        index: usize,
    },

    /// Every sample was excluded from an iteration because of non-finite
    /// residuals or derivatives.
    #[error("Degenerate data: every sample was excluded at iteration {iteration}")]
    DegenerateData {
        /// Iteration at which the data became unusable.
        iteration: usize,
    },

    /// The parameter vector does not match the layout of the parametrisation.
    #[error("Parameter count mismatch: expected {expected}, got {actual}")]
    ParameterCount {
        /// Number of parameters of the parametrisation.
        expected: usize,
        /// Number of parameters provided.
        actual: usize,
    },

    /// I/O error while reading measured data or writing results.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The content of a file does not follow the expected format.
    #[error("Invalid file format: {0}")]
    Format(String),

    /// The configuration file could not be parsed.
    #[error("Toml deserialisation error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The result could not be (de)serialised.
    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FitError {
    /// Returns true if the error is detected before the solver iterates.
    pub fn is_input_defect(&self) -> bool {
        matches!(
            self,
            Self::EmptySampleStore
                | Self::InvalidDirection { .. }
                | Self::InvalidReflectance { .. }
                | Self::InvalidConfig(_)
        )
    }
}
