//! Compact parametrisations of isotropic BRDFs.
//!
//! A parametrisation maps a parameter vector to the reflectance of every
//! direction pair. The vector layout belongs to the variant that produced
//! it; the solver only sees the shared contract below and never interprets
//! individual entries.
//!
//! Both variants are built from the same cosine lobe
//! $(\cos\theta_i \cos\theta_o)^n$, which only depends on the zenith angles
//! and therefore needs no azimuthal degree of freedom:
//!
//! - [`SmallStorage`]: $f_c = d_c + k_c (\cos\theta_i \cos\theta_o)^n$
//! - [`ZAugmented`]: adds $s_c e^{m (h_z - 1)}$, a lobe along the z-axis of
//!   the half-vector $h$.

mod small;
mod with_z;

pub use small::SmallStorage;
pub use with_z::ZAugmented;

use base::{
    brdf::{DirectionPair, Rgb, Sample, N_CHANNELS},
    config::{FitConfig, ParamKind},
    error::FitError,
};
use std::fmt::Debug;

/// Lower clamp of $\cos\theta_i \cos\theta_o$ so that the logarithm in the
/// exponent derivative stays finite at grazing angles.
pub(crate) const MIN_COSINE_PRODUCT: f64 = 1.0e-12;

/// Upper bound of the cosine lobe exponent.
pub(crate) const MAX_EXPONENT: f64 = 1.0e3;

/// Upper bound of the half-vector lobe sharpness.
pub(crate) const MAX_SHARPNESS: f64 = 1.0e5;

/// Common interface of the compact BRDF parametrisations.
pub trait Parametrisation: Send + Sync + Debug {
    /// Returns the kind of the parametrisation.
    fn kind(&self) -> ParamKind;

    /// Number of parameters; fixed by the variant.
    fn param_count(&self) -> usize;

    /// Bytes needed to store one fitted vector.
    fn storage_size(&self) -> usize { self.param_count() * std::mem::size_of::<f64>() }

    /// Deterministic initial vector derived from coarse statistics of the
    /// samples.
    fn seed(&self, samples: &[Sample]) -> Box<[f64]>;

    /// Projects a vector onto the valid domain of the parameters.
    fn project(&self, params: &mut [f64]);

    /// Evaluates the reflectance without checking the inputs.
    ///
    /// # Arguments
    ///
    /// * `dirs` - Direction pair in the upper hemisphere.
    /// * `params` - Parameter vector with the layout of this variant.
    fn eval(&self, dirs: &DirectionPair, params: &[f64]) -> Rgb;

    /// Evaluates the reflectance and its partial derivatives.
    ///
    /// `jac` has `N_CHANNELS * param_count()` entries; the derivatives of
    /// channel `c` with respect to parameter `j` are written at
    /// `c * param_count() + j`.
    fn eval_with_jacobian(&self, dirs: &DirectionPair, params: &[f64], jac: &mut [f64]) -> Rgb;

    /// Predicted minus measured reflectance.
    fn residual(&self, sample: &Sample, params: &[f64]) -> Rgb {
        let predicted = self.eval(&sample.dirs, params);
        std::array::from_fn(|c| predicted[c] - sample.value[c])
    }

    /// Residual of the sample; the derivatives of the residual (equal to
    /// those of the prediction) are written into `jac`.
    fn gradient(&self, sample: &Sample, params: &[f64], jac: &mut [f64]) -> Rgb {
        let predicted = self.eval_with_jacobian(&sample.dirs, params, jac);
        std::array::from_fn(|c| predicted[c] - sample.value[c])
    }

    /// Checked evaluation.
    ///
    /// Fails if the vector does not have the layout of this variant or if the
    /// direction pair is not in the upper hemisphere.
    fn evaluate(&self, dirs: &DirectionPair, params: &[f64], eps: f64) -> Result<Rgb, FitError> {
        check_layout(self, params)?;
        if !dirs.is_valid(eps) {
            return Err(FitError::InvalidDirection { index: 0 });
        }
        Ok(self.eval(dirs, params))
    }
}

/// Fails if the length of `params` doesn't match the parametrisation.
pub fn check_layout<P: Parametrisation + ?Sized>(model: &P, params: &[f64]) -> Result<(), FitError> {
    if params.len() != model.param_count() {
        return Err(FitError::ParameterCount {
            expected: model.param_count(),
            actual: params.len(),
        });
    }
    Ok(())
}

/// Creates the parametrisation of the given kind.
pub fn new_parametrisation(kind: ParamKind, config: &FitConfig) -> Box<dyn Parametrisation> {
    match kind {
        ParamKind::SmallStorage => Box::new(SmallStorage),
        ParamKind::ZAugmented => Box::new(ZAugmented::new(config.lobe_sharpness_seed)),
    }
}

/// Clamped $\cos\theta_i \cos\theta_o$.
#[inline]
pub(crate) fn cosine_product(dirs: &DirectionPair) -> f64 {
    (dirs.wi.z * dirs.wo.z).clamp(MIN_COSINE_PRODUCT, 1.0)
}

/// Cosine lobe $x^n$ and its derivative with respect to $n$.
#[inline]
pub(crate) fn cosine_lobe(dirs: &DirectionPair, n: f64) -> (f64, f64) {
    let ln_x = cosine_product(dirs).ln();
    let lobe = (n * ln_x).exp();
    (lobe, lobe * ln_x)
}

/// Half-vector lobe $e^{m (h_z - 1)}$ and its derivative with respect to
/// $m$.
#[inline]
pub(crate) fn half_lobe(dirs: &DirectionPair, m: f64) -> (f64, f64) {
    let t = dirs.half().z.clamp(0.0, 1.0) - 1.0;
    let lobe = (m * t).exp();
    (lobe, lobe * t)
}

/// Shared seed of the cosine part: a small diffuse share of the mean
/// reflectance, the rest carried by a linear cosine lobe.
pub(crate) fn seed_cosine_part(samples: &[Sample]) -> ([f64; N_CHANNELS], [f64; N_CHANNELS]) {
    const DIFFUSE_SHARE: f64 = 0.1;
    let means = base::brdf::channel_means(samples).unwrap_or([0.0; N_CHANNELS]);
    let (sum_x, count) = samples
        .iter()
        .filter(|s| s.is_finite())
        .fold((0.0, 0usize), |(acc, n), s| (acc + cosine_product(&s.dirs), n + 1));
    let mean_x = if count > 0 { sum_x / count as f64 } else { 0.5 };
    let diffuse = means.map(|m| DIFFUSE_SHARE * m.max(0.0));
    let lobe = means.map(|m| (1.0 - DIFFUSE_SHARE) * m.max(0.0) / mean_x);
    (diffuse, lobe)
}
