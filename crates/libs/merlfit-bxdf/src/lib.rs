//! Compact BRDF parametrisations and the machinery to fit them to measured
//! data.
//!
//! A fitting run goes through the following stages:
//!
//! 1. a [`Parametrisation`] is chosen and seeded from the samples,
//! 2. the solver in [`fitting`] minimises the squared reconstruction error,
//! 3. the [`albedo`] of the fitted model is integrated over the hemisphere,
//! 4. everything is packed into a [`FitResult`] for the writers.
//!
//! [`FitPipeline`] runs the whole sequence.
#![warn(missing_docs)]

pub mod albedo;
pub mod fitting;
pub mod param;
pub mod result;

pub use albedo::Albedo;
pub use fitting::{FitPipeline, Solution, SolverStatus};
pub use param::{new_parametrisation, Parametrisation, SmallStorage, ZAugmented};
pub use result::{FitRecord, FitResult};
