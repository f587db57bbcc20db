//! Hemispherical integration of reflectance.
//!
//! The directional albedo at incident zenith $\theta_i$ is
//! $$\rho(\theta_i) = \int_{H^2} f(\omega_i, \omega_o) \cos\theta_o d\omega_o$$
//! and the bihemispherical (white-sky) albedo is its cosine-weighted average
//! over the incident hemisphere
//! $$\bar\rho = \frac{1}{\pi}\int_{H^2} \rho(\theta_i) \cos\theta_i
//! d\omega_i.$$
//!
//! Energy conservation bounds both by one. The bound is not enforced here; a
//! value outside `[0, 1]` is flagged on the result as a sign of a fitting or
//! data defect.

use crate::param::Parametrisation;
use base::{
    brdf::{DirectionPair, Rgb, Sample, N_CHANNELS},
    config::{AlbedoConfig, AlbedoDefinition, Quadrature},
    math::sph_to_cart,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_1_PI, FRAC_PI_2, PI, TAU};

/// Albedo per colour channel.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Albedo {
    /// Red, green and blue albedo.
    pub rgb: Rgb,
}

impl Albedo {
    /// Creates a new albedo.
    pub const fn new(rgb: Rgb) -> Self { Self { rgb } }

    /// Returns true if every channel is finite and within `[0, 1]`.
    pub fn in_bounds(&self) -> bool {
        self.rgb
            .iter()
            .all(|v| v.is_finite() && (0.0..=1.0).contains(v))
    }

    /// Average over the channels.
    pub fn mean(&self) -> f64 { self.rgb.iter().sum::<f64>() / N_CHANNELS as f64 }
}

/// Integrates the fitted model.
pub fn estimate(model: &dyn Parametrisation, params: &[f64], config: &AlbedoConfig) -> Albedo {
    let density = config.density.max(1) as usize;
    let rgb = match config.definition {
        AlbedoDefinition::Bihemispherical => {
            bihemispherical(model, params, config.quadrature, density)
        },
        AlbedoDefinition::Directional { theta_i } => {
            directional(model, params, theta_i, config.quadrature, density)
        },
    };
    let albedo = Albedo::new(rgb);
    if !albedo.in_bounds() {
        log::warn!("Albedo {:?} violates energy conservation", albedo.rgb);
    }
    albedo
}

/// Bihemispherical albedo of measured samples, using the per-sample measure.
///
/// Samples with non-finite values are skipped.
pub fn integrate_measured(samples: &[Sample]) -> Albedo {
    let sum = samples
        .par_iter()
        .filter(|s| s.is_finite())
        .map(|s| {
            let w = s.weight * s.dirs.wi.z.max(0.0) * s.dirs.wo.z.max(0.0);
            s.value.map(|v| v * w)
        })
        .reduce(|| [0.0; N_CHANNELS], add);
    Albedo::new(sum.map(|v| v * FRAC_1_PI))
}

fn add(a: Rgb, b: Rgb) -> Rgb { std::array::from_fn(|c| a[c] + b[c]) }

fn scale(a: Rgb, s: f64) -> Rgb { a.map(|v| v * s) }

/// Midpoint of the zenith bin and $\int \cos\theta \sin\theta d\theta$ over the
/// bin.
fn projected_band(i: usize, n: usize) -> (f64, f64) {
    let d_theta = FRAC_PI_2 / n as f64;
    let lo = i as f64 * d_theta;
    let hi = lo + d_theta;
    (lo + 0.5 * d_theta, 0.5 * (hi.sin().powi(2) - lo.sin().powi(2)))
}

/// Zenith angle of the i-th stratum of the cosine-weighted mapping.
fn cosine_stratum(i: usize, n: usize) -> f64 { ((i as f64 + 0.5) / n as f64).sqrt().asin() }

fn directional(
    model: &dyn Parametrisation,
    params: &[f64],
    theta_i: f64,
    quadrature: Quadrature,
    n: usize,
) -> Rgb {
    let wi = sph_to_cart(theta_i, 0.0);
    let n_phi = 4 * n;
    let d_phi = TAU / n_phi as f64;
    let mut sum = [0.0; N_CHANNELS];
    for j in 0..n {
        let (theta_o, w) = match quadrature {
            Quadrature::Midpoint => {
                let (theta_o, band) = projected_band(j, n);
                (theta_o, band * d_phi)
            },
            Quadrature::Cosine => (cosine_stratum(j, n), PI / (n * n_phi) as f64),
        };
        for k in 0..n_phi {
            let wo = sph_to_cart(theta_o, (k as f64 + 0.5) * d_phi);
            let f = model.eval(&DirectionPair::new(wi, wo), params);
            sum = add(sum, scale(f, w));
        }
    }
    sum
}

fn bihemispherical(
    model: &dyn Parametrisation,
    params: &[f64],
    quadrature: Quadrature,
    n: usize,
) -> Rgb {
    // Isotropy: rho only depends on theta_i.
    (0..n)
        .into_par_iter()
        .map(|i| match quadrature {
            Quadrature::Midpoint => {
                let (theta_i, band) = projected_band(i, n);
                // (1/pi) * 2pi * band
                scale(directional(model, params, theta_i, quadrature, n), 2.0 * band)
            },
            Quadrature::Cosine => {
                let theta_i = cosine_stratum(i, n);
                scale(directional(model, params, theta_i, quadrature, n), 1.0 / n as f64)
            },
        })
        .collect::<Vec<_>>()
        .into_iter()
        .fold([0.0; N_CHANNELS], add)
}
