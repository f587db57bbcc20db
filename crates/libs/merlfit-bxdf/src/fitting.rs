//! Minimisation of the reconstruction error.
//!
//! The error metric is the mean squared residual over every colour channel of
//! the samples taking part in an evaluation. Samples whose residual (or
//! derivative) is not finite are excluded from that evaluation only; they are
//! counted but never contribute to the reported error.
//!
//! Every method evaluates the samples in parallel: the samples are split into
//! one contiguous chunk per worker, each worker fills a private accumulator,
//! and the accumulators are merged in chunk order by the calling thread.
mod lm;
mod nllsq;
mod pattern;

use crate::{
    albedo,
    param::{check_layout, new_parametrisation, Parametrisation, SmallStorage, ZAugmented},
    result::FitResult,
};
use base::{
    brdf::{Sample, SampleStore, N_CHANNELS},
    config::{FitConfig, ParamKind, SolverMethod},
    error::FitError,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    time::Instant,
};

/// How a solver run ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverStatus {
    /// The error stopped improving, or the gradient vanished.
    Converged,
    /// The iteration or time budget ran out; best-effort result.
    BudgetExhausted,
    /// No step could decrease the error; best-effort result.
    Stagnated,
}

impl SolverStatus {
    /// Returns the tag written in result records.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::BudgetExhausted => "budget-exhausted",
            Self::Stagnated => "stagnated",
        }
    }

    /// Returns true if the run converged.
    pub const fn is_converged(&self) -> bool { matches!(self, Self::Converged) }
}

impl Display for SolverStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.tag()) }
}

/// Outcome of a solver run.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Last accepted parameter vector.
    pub params: Box<[f64]>,
    /// Termination status.
    pub status: SolverStatus,
    /// Mean squared error at `params`.
    pub error: f64,
    /// Number of samples contributing to `error`.
    pub n_used: usize,
    /// Number of samples excluded because of non-finite residuals.
    pub n_excluded: usize,
    /// Number of iterations performed.
    pub iterations: usize,
}

/// Sum of squared residuals over the samples of one evaluation.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Cost {
    /// Sum of the squared residuals of every channel.
    pub sum_sq: f64,
    /// Number of samples with finite residuals.
    pub n_used: usize,
    /// Number of samples with non-finite residuals.
    pub n_excluded: usize,
}

impl Cost {
    /// Mean squared error; `None` if no sample could be used.
    pub fn mse(&self) -> Option<f64> {
        (self.n_used > 0).then(|| self.sum_sq / (N_CHANNELS * self.n_used) as f64)
    }

    fn merge(self, other: Self) -> Self {
        Self {
            sum_sq: self.sum_sq + other.sum_sq,
            n_used: self.n_used + other.n_used,
            n_excluded: self.n_excluded + other.n_excluded,
        }
    }
}

/// Number of samples per worker.
pub(crate) fn chunk_size(len: usize) -> usize {
    len.div_ceil(rayon::current_num_threads()).max(1)
}

/// Evaluates the reconstruction error of `params` over `samples`.
pub fn evaluate_cost(model: &dyn Parametrisation, samples: &[Sample], params: &[f64]) -> Cost {
    samples
        .par_chunks(chunk_size(samples.len()))
        .map(|chunk| {
            chunk.iter().fold(Cost::default(), |mut acc, sample| {
                let r = model.residual(sample, params);
                if r.iter().all(|v| v.is_finite()) {
                    acc.sum_sq += r.iter().map(|v| v * v).sum::<f64>();
                    acc.n_used += 1;
                } else {
                    acc.n_excluded += 1;
                }
                acc
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .fold(Cost::default(), Cost::merge)
}

/// Minimises the reconstruction error starting from `init`.
///
/// The method is taken from the configuration. Non-convergence is reported
/// through [`Solution::status`]; the only errors are a parameter vector not
/// matching the parametrisation, an empty sample set and
/// [`FitError::DegenerateData`].
pub fn solve(
    model: &dyn Parametrisation,
    samples: &[Sample],
    init: &[f64],
    config: &FitConfig,
) -> Result<Solution, FitError> {
    check_layout(model, init)?;
    if samples.is_empty() {
        return Err(FitError::EmptySampleStore);
    }
    let mut params = init.to_vec();
    model.project(&mut params);
    log::debug!(
        "Solving {} parameters of {} over {} samples with {:?}",
        model.param_count(),
        model.kind(),
        samples.len(),
        config.method
    );
    let solution = match config.method {
        SolverMethod::DampedGaussNewton => nllsq::minimise(model, samples, params, config)?,
        SolverMethod::Minpack => lm::minimise(model, samples, params, config)?,
        SolverMethod::PatternSearch => pattern::minimise(model, samples, params, config)?,
    };
    if solution.n_excluded > 0 {
        log::warn!(
            "{} samples excluded because of non-finite residuals",
            solution.n_excluded
        );
    }
    match solution.status {
        SolverStatus::Converged => log::info!(
            "Converged after {} iterations, error {:.6e}",
            solution.iterations,
            solution.error
        ),
        status => log::warn!(
            "Best-effort fit ({}) after {} iterations, error {:.6e}",
            status,
            solution.iterations,
            solution.error
        ),
    }
    Ok(solution)
}

/// Runs a complete fit on a sample store: validation, seeding, solving,
/// albedo estimation and result assembly.
///
/// A [`ParamKind::ZAugmented`] fit is staged: the [`ParamKind::SmallStorage`]
/// variant is fitted first, its optimum is lifted with `s = 0` and refined
/// with the iterations and time left. Both stages share one budget, so the
/// z-augmented error never exceeds the small-storage error of the same
/// configuration.
#[derive(Debug, Clone, Default)]
pub struct FitPipeline {
    config: FitConfig,
}

impl FitPipeline {
    /// Creates a pipeline with the given configuration.
    pub fn new(config: FitConfig) -> Self { Self { config } }

    /// Returns the configuration.
    pub fn config(&self) -> &FitConfig { &self.config }

    /// Fits the configured parametrisation to the samples of the store.
    pub fn run(&self, store: &SampleStore) -> Result<FitResult, FitError> {
        let start = Instant::now();
        self.config.validate()?;
        store.validate(self.config.hemisphere_epsilon)?;
        let samples = store.subsample(self.config.subsample_stride);
        let kind = self.config.parametrisation;
        log::info!(
            "Fitting {} to {} ({} of {} samples)",
            kind,
            store.material().unwrap_or("unnamed material"),
            samples.len(),
            store.len()
        );
        let model = new_parametrisation(kind, &self.config);
        let solution = match kind {
            ParamKind::SmallStorage => {
                solve(model.as_ref(), &samples, &model.seed(&samples), &self.config)?
            },
            ParamKind::ZAugmented => self.staged(model.as_ref(), &samples, start)?,
        };
        let albedo = albedo::estimate(model.as_ref(), &solution.params, &self.config.albedo);
        log::info!("  - albedo: {:?}", albedo.rgb);
        let result = FitResult::assemble(kind, solution, albedo, store.material());
        log::info!("Fit finished in {:?}", start.elapsed());
        Ok(result)
    }

    /// Fits the small-storage variant, then refines its lifted optimum with
    /// the remaining budget.
    fn staged(
        &self,
        model: &dyn Parametrisation,
        samples: &[Sample],
        start: Instant,
    ) -> Result<Solution, FitError> {
        log::info!("  - coarse stage: {}", ParamKind::SmallStorage);
        let coarse = solve(&SmallStorage, samples, &SmallStorage.seed(samples), &self.config)?;
        let lifted = Solution {
            params: ZAugmented::new(self.config.lobe_sharpness_seed).lift(&coarse.params)?,
            ..coarse
        };

        let iterations = self.config.max_iterations.saturating_sub(coarse.iterations);
        let time_left = self
            .config
            .time_budget()
            .map(|budget| budget.saturating_sub(start.elapsed()));
        if iterations == 0 || time_left.is_some_and(|left| left.is_zero()) {
            log::info!("  - budget spent by the coarse stage");
            return Ok(lifted);
        }
        let config = FitConfig {
            max_iterations: iterations,
            time_budget_secs: time_left.map(|left| left.as_secs_f64()),
            ..self.config.clone()
        };

        log::info!("  - refining with {} iterations left", iterations);
        let refined = solve(model, samples, &lifted.params, &config)?;
        let iterations = coarse.iterations + refined.iterations;
        if refined.error <= lifted.error {
            Ok(Solution {
                iterations,
                ..refined
            })
        } else {
            log::warn!(
                "Refinement ended above the coarse error ({:.6e} > {:.6e}), keeping the coarse fit",
                refined.error,
                lifted.error
            );
            Ok(Solution {
                iterations,
                ..lifted
            })
        }
    }
}
