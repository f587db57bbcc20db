//! Damped Gauss-Newton (Levenberg-Marquardt) on the normal equations.
//!
//! Each iteration accumulates $J^T J$ and $J^T r$ over the samples, solves
//! $(J^T J + \lambda\,\mathrm{diag}(J^T J))\,\delta = J^T r$ and tries
//! $p - \delta$. A step is accepted only if it decreases the error; a rejected
//! step increases $\lambda$ and is retried.

use super::{chunk_size, evaluate_cost, Solution, SolverStatus};
use crate::param::Parametrisation;
use base::{
    brdf::{Rgb, Sample, N_CHANNELS},
    config::FitConfig,
    error::FitError,
};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::time::Instant;

/// Floor of the diagonal scaling, keeps the damped system positive definite
/// when a parameter has no influence on the residuals.
const MIN_DIAGONAL: f64 = 1.0e-12;

/// Normal equations accumulated over a set of samples.
#[derive(Debug, Clone)]
struct NormalEquations {
    jtj: DMatrix<f64>,
    jtr: DVector<f64>,
    sum_sq: f64,
    n_used: usize,
    n_excluded: usize,
}

impl NormalEquations {
    fn zeros(n_params: usize) -> Self {
        Self {
            jtj: DMatrix::zeros(n_params, n_params),
            jtr: DVector::zeros(n_params),
            sum_sq: 0.0,
            n_used: 0,
            n_excluded: 0,
        }
    }

    /// Adds the contribution of one sample.
    fn add(&mut self, jac: &[f64], residual: &Rgb) {
        let p = self.jtr.len();
        for (c, r) in residual.iter().enumerate() {
            let row = &jac[c * p..(c + 1) * p];
            for (a, ja) in row.iter().enumerate() {
                if *ja == 0.0 {
                    continue;
                }
                self.jtr[a] += ja * r;
                for (b, jb) in row.iter().enumerate().take(a + 1) {
                    self.jtj[(a, b)] += ja * jb;
                }
            }
        }
        // Same summation order as `evaluate_cost`.
        self.sum_sq += residual.iter().map(|r| r * r).sum::<f64>();
        self.n_used += 1;
    }

    fn merge(mut self, other: Self) -> Self {
        self.jtj += other.jtj;
        self.jtr += other.jtr;
        self.sum_sq += other.sum_sq;
        self.n_used += other.n_used;
        self.n_excluded += other.n_excluded;
        self
    }

    /// Copies the lower triangle into the upper one.
    fn symmetrise(mut self) -> Self {
        self.jtj.fill_upper_triangle_with_lower_triangle();
        self
    }

    fn mse(&self) -> f64 { self.sum_sq / (N_CHANNELS * self.n_used) as f64 }

    /// Infinity norm of the gradient of the mean squared error.
    fn gradient_norm(&self) -> f64 {
        2.0 * self.jtr.amax() / (N_CHANNELS * self.n_used) as f64
    }

    /// Solves the damped system, Cholesky first, LU as a fallback.
    fn damped_step(&self, damping: f64) -> Option<DVector<f64>> {
        let mut a = self.jtj.clone();
        for i in 0..a.nrows() {
            a[(i, i)] += damping * self.jtj[(i, i)].max(MIN_DIAGONAL);
        }
        let step = match a.clone().cholesky() {
            Some(chol) => Some(chol.solve(&self.jtr)),
            None => a.lu().solve(&self.jtr),
        };
        step.filter(|step| step.iter().all(|v| v.is_finite()))
    }
}

/// Accumulates the normal equations at `params`, one private accumulator per
/// worker.
fn accumulate(model: &dyn Parametrisation, samples: &[Sample], params: &[f64]) -> NormalEquations {
    let p = model.param_count();
    samples
        .par_chunks(chunk_size(samples.len()))
        .map(|chunk| {
            let mut acc = NormalEquations::zeros(p);
            let mut jac = vec![0.0; N_CHANNELS * p];
            for sample in chunk {
                let r = model.gradient(sample, params, &mut jac);
                if r.iter().chain(jac.iter()).all(|v| v.is_finite()) {
                    acc.add(&jac, &r);
                } else {
                    acc.n_excluded += 1;
                }
            }
            acc
        })
        .collect::<Vec<_>>()
        .into_iter()
        .fold(NormalEquations::zeros(p), NormalEquations::merge)
        .symmetrise()
}

pub(super) fn minimise(
    model: &dyn Parametrisation,
    samples: &[Sample],
    mut params: Vec<f64>,
    config: &FitConfig,
) -> Result<Solution, FitError> {
    let start = Instant::now();
    let budget = config.time_budget();
    let mut damping = config.initial_damping;
    let mut normal = accumulate(model, samples, &params);
    if normal.n_used == 0 {
        return Err(FitError::DegenerateData { iteration: 0 });
    }
    let mut error = normal.mse();
    let mut status = SolverStatus::BudgetExhausted;
    let mut iterations = 0;
    let mut quiet = 0;

    for iteration in 0..config.max_iterations {
        if budget.is_some_and(|b| start.elapsed() >= b) {
            log::warn!("Time budget exhausted after {} iterations", iteration);
            break;
        }
        if normal.gradient_norm() <= config.tolerance {
            status = SolverStatus::Converged;
            break;
        }
        iterations = iteration + 1;

        let mut accepted = None;
        for _ in 0..=config.max_retries {
            let trial = normal.damped_step(damping).map(|step| {
                let mut trial = params.clone();
                trial.iter_mut().zip(step.iter()).for_each(|(x, d)| *x -= d);
                model.project(&mut trial);
                trial
            });
            if let Some(trial) = trial {
                let trial_error = evaluate_cost(model, samples, &trial).mse();
                if let Some(e) = trial_error.filter(|e| *e < error) {
                    accepted = Some((trial, e));
                    damping = (damping / config.damping_decrease).max(config.min_damping);
                    break;
                }
            }
            damping = (damping * config.damping_increase).min(config.max_damping);
        }

        let Some((trial, trial_error)) = accepted else {
            log::debug!(
                "Iteration {}: no decreasing step after {} retries, damping {:.3e}",
                iterations,
                config.max_retries,
                damping
            );
            status = SolverStatus::Stagnated;
            break;
        };
        let improvement = error - trial_error;
        params = trial;
        normal = accumulate(model, samples, &params);
        if normal.n_used == 0 {
            return Err(FitError::DegenerateData {
                iteration: iterations,
            });
        }
        error = normal.mse();
        log::debug!(
            "Iteration {}: error {:.6e}, improvement {:.3e}, damping {:.3e}",
            iterations,
            error,
            improvement,
            damping
        );
        quiet = if improvement < config.tolerance { quiet + 1 } else { 0 };
        if quiet >= config.convergence_window {
            status = SolverStatus::Converged;
            break;
        }
    }

    Ok(Solution {
        params: params.into_boxed_slice(),
        status,
        error,
        n_used: normal.n_used,
        n_excluded: normal.n_excluded,
        iterations,
    })
}
