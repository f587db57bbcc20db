//! Reference backend built on the MINPACK port of the `levenberg-marquardt`
//! crate.
//!
//! The crate rejects a whole evaluation as soon as one residual is not
//! finite, so samples that are not finite at the initial vector are excluded
//! up front for the whole run.

use super::{evaluate_cost, Solution, SolverStatus};
use crate::param::Parametrisation;
use base::{
    brdf::{Sample, N_CHANNELS},
    config::FitConfig,
    error::FitError,
};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::{DMatrix, DVector, Dyn, Owned, VecStorage, U1};
use rayon::prelude::*;

/// Proxy between the samples and the solver.
struct LmProblem<'a> {
    model: &'a dyn Parametrisation,
    samples: &'a [Sample],
    params: DVector<f64>,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for LmProblem<'_> {
    type ResidualStorage = VecStorage<f64, Dyn, U1>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn, U1>;

    fn set_params(&mut self, x: &DVector<f64>) { self.params.copy_from(x); }

    fn params(&self) -> DVector<f64> { self.params.clone() }

    fn residuals(&self) -> Option<DVector<f64>> {
        let params = self.params.as_slice();
        let mut residuals = DVector::zeros(self.samples.len() * N_CHANNELS);
        residuals
            .as_mut_slice()
            .par_chunks_mut(N_CHANNELS)
            .zip(self.samples.par_iter())
            .for_each(|(out, sample)| out.copy_from_slice(&self.model.residual(sample, params)));
        residuals.iter().all(|r| r.is_finite()).then_some(residuals)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let params = self.params.as_slice();
        let p = self.model.param_count();
        let mut rows = vec![0.0; self.samples.len() * N_CHANNELS * p];
        rows.par_chunks_mut(N_CHANNELS * p)
            .zip(self.samples.par_iter())
            .for_each(|(out, sample)| {
                self.model.eval_with_jacobian(&sample.dirs, params, out);
            });
        rows.iter()
            .all(|v| v.is_finite())
            .then(|| DMatrix::from_row_slice(self.samples.len() * N_CHANNELS, p, &rows))
    }
}

/// Keeps the samples whose residual and derivatives are finite at `params`.
fn usable_samples(model: &dyn Parametrisation, samples: &[Sample], params: &[f64]) -> Vec<Sample> {
    samples
        .par_iter()
        .filter(|sample| {
            let mut jac = vec![0.0; N_CHANNELS * model.param_count()];
            let r = model.gradient(sample, params, &mut jac);
            r.iter().chain(jac.iter()).all(|v| v.is_finite())
        })
        .copied()
        .collect()
}

pub(super) fn minimise(
    model: &dyn Parametrisation,
    samples: &[Sample],
    params: Vec<f64>,
    config: &FitConfig,
) -> Result<Solution, FitError> {
    let usable = usable_samples(model, samples, &params);
    if usable.is_empty() {
        return Err(FitError::DegenerateData { iteration: 0 });
    }
    if config.time_budget().is_some() {
        log::debug!("The minpack backend only honours the iteration budget");
    }
    let problem = LmProblem {
        model,
        samples: &usable,
        params: DVector::from_vec(params),
    };
    let (problem, report) = LevenbergMarquardt::new()
        .with_ftol(config.tolerance)
        .with_xtol(config.tolerance)
        .with_gtol(config.tolerance)
        .with_patience(config.max_iterations.max(1))
        .minimize(problem);
    // The crate allows `patience * (n + 1)` evaluations.
    let iterations = report
        .number_of_evaluations
        .div_ceil(model.param_count() + 1);
    log::debug!(
        "Minpack terminated after {} evaluations: {:?}",
        report.number_of_evaluations,
        report.termination
    );
    let status = match report.termination {
        TerminationReason::Converged { .. }
        | TerminationReason::ResidualsZero
        | TerminationReason::Orthogonal => SolverStatus::Converged,
        TerminationReason::LostPatience => SolverStatus::BudgetExhausted,
        _ => SolverStatus::Stagnated,
    };

    let mut params = problem.params.as_slice().to_vec();
    model.project(&mut params);
    let cost = evaluate_cost(model, &usable, &params);
    let error = cost.mse().ok_or(FitError::DegenerateData {
        iteration: iterations,
    })?;
    Ok(Solution {
        params: params.into_boxed_slice(),
        status,
        error,
        n_used: cost.n_used,
        n_excluded: samples.len() - cost.n_used,
        iterations,
    })
}
