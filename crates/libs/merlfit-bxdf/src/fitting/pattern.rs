//! Hooke-Jeeves pattern search.
//!
//! Derivative free: exploratory moves probe each coordinate in both
//! directions, a successful exploration is followed by a pattern move along
//! the direction of improvement. The step is halved whenever exploration
//! fails; the search converges once it falls below `min_step`.

use super::{evaluate_cost, Solution, SolverStatus};
use crate::param::Parametrisation;
use base::{brdf::Sample, config::FitConfig, error::FitError};
use std::time::Instant;

struct Search<'a> {
    model: &'a dyn Parametrisation,
    samples: &'a [Sample],
}

impl Search<'_> {
    /// Error of a trial point; infinite if no sample can be used.
    fn error(&self, params: &[f64]) -> f64 {
        evaluate_cost(self.model, self.samples, params)
            .mse()
            .unwrap_or(f64::INFINITY)
    }

    /// Exploratory moves around `point`, keeping each coordinate change that
    /// decreases the error.
    fn explore(&self, point: &[f64], error: f64, step: f64) -> (Vec<f64>, f64) {
        let mut best = point.to_vec();
        let mut best_error = error;
        for i in 0..best.len() {
            let delta = step * best[i].abs().max(1.0);
            for sign in [1.0, -1.0] {
                let mut trial = best.clone();
                trial[i] += sign * delta;
                self.model.project(&mut trial);
                if trial[i] == best[i] {
                    continue;
                }
                let trial_error = self.error(&trial);
                if trial_error < best_error {
                    best = trial;
                    best_error = trial_error;
                    break;
                }
            }
        }
        (best, best_error)
    }
}

pub(super) fn minimise(
    model: &dyn Parametrisation,
    samples: &[Sample],
    params: Vec<f64>,
    config: &FitConfig,
) -> Result<Solution, FitError> {
    let start = Instant::now();
    let budget = config.time_budget();
    let search = Search { model, samples };
    let mut base = params;
    let mut error = search.error(&base);
    if !error.is_finite() {
        return Err(FitError::DegenerateData { iteration: 0 });
    }
    let mut step = config.initial_step;
    let mut status = SolverStatus::BudgetExhausted;
    let mut iterations = 0;

    for iteration in 0..config.max_iterations {
        if budget.is_some_and(|b| start.elapsed() >= b) {
            log::warn!("Time budget exhausted after {} iterations", iteration);
            break;
        }
        if step < config.min_step {
            status = SolverStatus::Converged;
            break;
        }
        iterations = iteration + 1;

        let (probe, probe_error) = search.explore(&base, error, step);
        if probe_error < error {
            let mut pattern: Vec<f64> = probe.iter().zip(&base).map(|(p, b)| 2.0 * p - b).collect();
            model.project(&mut pattern);
            base = probe;
            error = probe_error;
            let pattern_error = search.error(&pattern);
            let (probe, probe_error) = search.explore(&pattern, pattern_error, step);
            if probe_error < error {
                base = probe;
                error = probe_error;
            }
        } else {
            step *= 0.5;
        }
        log::debug!("Iteration {}: error {:.6e}, step {:.3e}", iterations, error, step);
    }
    if status != SolverStatus::Converged && step < config.min_step {
        status = SolverStatus::Converged;
    }

    let cost = evaluate_cost(model, samples, &base);
    Ok(Solution {
        params: base.into_boxed_slice(),
        status,
        error: cost.mse().unwrap_or(error),
        n_used: cost.n_used,
        n_excluded: cost.n_excluded,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::SmallStorage;
    use base::brdf::{AngularGrid, SampleStore};

    #[test]
    fn decreases_error_from_seed() {
        let truth = [0.02, 0.03, 0.04, 0.5, 0.4, 0.3, 3.0];
        let store =
            SampleStore::from_grid(&AngularGrid::uniform(4), |d| SmallStorage.eval(d, &truth));
        let seed = SmallStorage.seed(store.samples());
        let seed_error = evaluate_cost(&SmallStorage, store.samples(), &seed)
            .mse()
            .unwrap();
        let config = FitConfig {
            max_iterations: 200,
            ..Default::default()
        };
        let solution = minimise(&SmallStorage, store.samples(), seed.to_vec(), &config).unwrap();
        assert!(solution.error < 0.1 * seed_error);
        assert!(solution.iterations > 0);
    }

    #[test]
    fn all_defective_samples_are_degenerate() {
        let store = SampleStore::from_grid(&AngularGrid::uniform(2), |_| [f64::NAN; 3]);
        let err = minimise(
            &SmallStorage,
            store.samples(),
            vec![0.0; SmallStorage::PARAM_COUNT],
            &FitConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FitError::DegenerateData { iteration: 0 }));
    }
}
