//! Measured BRDF samples.
//!
//! The store is the decoded, in-memory form of a dense reflectance table.
//! Each sample carries the direction pair it was measured at, the RGB
//! reflectance and the 4D solid-angle measure of the cell it represents so
//! that the raw data can be integrated without resampling.

use crate::{
    error::FitError,
    math::{io2hd, sph_to_cart, DVec3, Sph2},
};
use rayon::prelude::*;
use std::{
    borrow::Cow,
    f64::consts::{FRAC_PI_2, TAU},
};

/// Number of colour channels of a sample.
pub const N_CHANNELS: usize = 3;

/// Reflectance per colour channel (red, green, blue).
pub type Rgb = [f64; N_CHANNELS];

/// Pair of incident and outgoing directions in the local shading frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionPair {
    /// Incident direction, pointing away from the surface.
    pub wi: DVec3,
    /// Outgoing direction, pointing away from the surface.
    pub wo: DVec3,
}

impl DirectionPair {
    /// Creates a new direction pair.
    pub const fn new(wi: DVec3, wo: DVec3) -> Self { Self { wi, wo } }

    /// Creates a new direction pair from spherical coordinates.
    pub fn from_sph(wi: Sph2, wo: Sph2) -> Self { Self::new(wi.to_cartesian(), wo.to_cartesian()) }

    /// Returns true if both directions are unit length and located in the
    /// upper hemisphere, up to `eps`.
    pub fn is_valid(&self, eps: f64) -> bool {
        let unit = |v: &DVec3| v.is_finite() && (v.length() - 1.0).abs() <= eps;
        unit(&self.wi) && unit(&self.wo) && self.wi.z >= -eps && self.wo.z >= -eps
    }

    /// Returns the normalised half-vector. Zero if the directions are
    /// opposite.
    pub fn half(&self) -> DVec3 { (self.wi + self.wo).normalize_or_zero() }

    /// Returns the half and difference vectors (Rusinkiewicz
    /// reparametrisation).
    pub fn half_diff(&self) -> (DVec3, DVec3) { io2hd(&self.wi, &self.wo) }
}

/// A measured reflectance value at a direction pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Where the sample has been measured.
    pub dirs: DirectionPair,
    /// Measured reflectance per channel.
    pub value: Rgb,
    /// Measure $d\omega_i d\omega_o$ of the cell represented by the sample.
    pub weight: f64,
}

impl Sample {
    /// Creates a new sample.
    pub const fn new(dirs: DirectionPair, value: Rgb, weight: f64) -> Self {
        Self {
            dirs,
            value,
            weight,
        }
    }

    /// Returns true if every channel of the measured value is finite.
    pub fn is_finite(&self) -> bool { self.value.iter().all(|v| v.is_finite()) }
}

/// Regular angular grid over the isotropic BRDF domain.
///
/// The incident azimuth is fixed to zero and the outgoing azimuth spans the
/// full circle, so every cell stands for the whole ring of incident azimuths.
/// Cell centres are midpoints; weights are the exact solid angles of the
/// cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AngularGrid {
    /// Number of incident zenith bins over [0, pi/2).
    pub n_theta_i: usize,
    /// Number of outgoing zenith bins over [0, pi/2).
    pub n_theta_o: usize,
    /// Number of outgoing azimuth bins over [0, 2pi).
    pub n_phi_o: usize,
}

impl AngularGrid {
    /// Creates a grid with the same resolution for both zenith angles and
    /// four times as many azimuth bins.
    pub const fn uniform(n_theta: usize) -> Self {
        Self {
            n_theta_i: n_theta,
            n_theta_o: n_theta,
            n_phi_o: n_theta * 4,
        }
    }

    /// Total number of cells.
    pub const fn len(&self) -> usize { self.n_theta_i * self.n_theta_o * self.n_phi_o }

    /// Returns true if the grid has no cell.
    pub const fn is_empty(&self) -> bool { self.len() == 0 }

    /// Returns the direction pair at the centre of the cell and its measure.
    pub fn cell(&self, i: usize, j: usize, k: usize) -> (DirectionPair, f64) {
        let (theta_i, band_i) = zenith_band(i, self.n_theta_i);
        let (theta_o, band_o) = zenith_band(j, self.n_theta_o);
        let d_phi = TAU / self.n_phi_o as f64;
        let phi_o = (k as f64 + 0.5) * d_phi;
        let dirs = DirectionPair::new(sph_to_cart(theta_i, 0.0), sph_to_cart(theta_o, phi_o));
        // The incident azimuth is integrated over the whole circle.
        (dirs, band_i * TAU * band_o * d_phi)
    }
}

/// Midpoint zenith angle of a bin and the cosine band width of the bin.
fn zenith_band(i: usize, n: usize) -> (f64, f64) {
    let d_theta = FRAC_PI_2 / n as f64;
    let lo = i as f64 * d_theta;
    let hi = lo + d_theta;
    (lo + 0.5 * d_theta, lo.cos() - hi.cos())
}

/// In-memory collection of measured samples.
///
/// The store is read-only once built; the fitting pipeline only borrows it.
#[derive(Debug, Clone, Default)]
pub struct SampleStore {
    samples: Box<[Sample]>,
    material: Option<String>,
}

impl SampleStore {
    /// Creates a store from already decoded samples.
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples: samples.into_boxed_slice(),
            material: None,
        }
    }

    /// Creates a store by evaluating `f` at the centre of every cell of the
    /// grid.
    pub fn from_grid<F>(grid: &AngularGrid, f: F) -> Self
    where
        F: Fn(&DirectionPair) -> Rgb + Sync,
    {
        let per_theta_i = grid.n_theta_o * grid.n_phi_o;
        let samples = (0..grid.len())
            .into_par_iter()
            .map(|idx| {
                let i = idx / per_theta_i;
                let j = (idx % per_theta_i) / grid.n_phi_o;
                let k = idx % grid.n_phi_o;
                let (dirs, weight) = grid.cell(i, j, k);
                Sample::new(dirs, f(&dirs), weight)
            })
            .collect::<Vec<_>>();
        Self::new(samples)
    }

    /// Attaches the material name, passed through to the fit result.
    pub fn with_material(mut self, name: impl Into<String>) -> Self {
        self.material = Some(name.into());
        self
    }

    /// Returns the material name if known.
    pub fn material(&self) -> Option<&str> { self.material.as_deref() }

    /// Number of samples.
    pub fn len(&self) -> usize { self.samples.len() }

    /// Returns true if the store holds no sample.
    pub fn is_empty(&self) -> bool { self.samples.is_empty() }

    /// Returns the samples.
    pub fn samples(&self) -> &[Sample] { &self.samples }

    /// Iterates over the samples.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> { self.samples.iter() }

    /// Checks the store before fitting.
    ///
    /// Fails on an empty store, on a direction pair outside the upper
    /// hemisphere and on finite negative reflectances. Non-finite values are
    /// accepted here; the solver excludes them per iteration.
    pub fn validate(&self, eps: f64) -> Result<(), FitError> {
        if self.samples.is_empty() {
            return Err(FitError::EmptySampleStore);
        }
        for (index, sample) in self.samples.iter().enumerate() {
            if !sample.dirs.is_valid(eps) {
                return Err(FitError::InvalidDirection { index });
            }
            if sample.value.iter().any(|v| v.is_finite() && *v < 0.0) {
                return Err(FitError::InvalidReflectance { index });
            }
        }
        Ok(())
    }

    /// Keeps every `stride`-th sample. A stride of one borrows the store.
    pub fn subsample(&self, stride: usize) -> Cow<'_, [Sample]> {
        if stride <= 1 {
            Cow::Borrowed(&self.samples)
        } else {
            Cow::Owned(self.samples.iter().step_by(stride).copied().collect())
        }
    }
}

/// Mean measured value per channel over the samples with finite values.
pub fn channel_means(samples: &[Sample]) -> Option<Rgb> {
    let (sum, count) = samples
        .iter()
        .filter(|s| s.is_finite())
        .fold(([0.0; N_CHANNELS], 0usize), |(mut acc, n), s| {
            acc.iter_mut().zip(s.value.iter()).for_each(|(a, v)| *a += v);
            (acc, n + 1)
        });
    (count > 0).then(|| sum.map(|s| s / count as f64))
}
