//! Decoder for BRDF data from the MERL database: <http://www.merl.com/brdf/>
//!
//! The binary file starts with three little-endian `i32` dimensions
//! (theta_h, theta_d, phi_d) followed by the samples as little-endian `f64`,
//! stored channel by channel (red, green, blue), each channel in row-major
//! order with phi_d varying fastest. Missing measurements are negative.
//!
//! The table is isotropic: the azimuth of the half-vector is always zero and
//! only half of the difference azimuths are stored, the other half follows
//! from reciprocity.

use crate::{
    brdf::{DirectionPair, Rgb, Sample, SampleStore, N_CHANNELS},
    error::FitError,
    math::{hd2io, sph_to_cart},
};
use byteorder::{LittleEndian, ReadBytesExt};
use rayon::prelude::*;
use std::{
    f64::consts::{FRAC_PI_2, PI, TAU},
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

/// The number of zenith angles for the half-vector.
pub const RES_THETA_H: usize = 90;
/// The number of zenith angles for the difference vector.
pub const RES_THETA_D: usize = 90;
/// The number of azimuthal angles for the difference vector.
pub const RES_PHI_D: usize = 180;
/// The total number of samples per channel.
pub const RES_TOTAL: usize = RES_THETA_H * RES_THETA_D * RES_PHI_D;
/// The scale factor of each channel.
pub const SCALE: Rgb = [1.0 / 1500.0, 1.15 / 1500.0, 1.66 / 1500.0];

/// Loads a MERL BRDF file into a sample store.
///
/// The material name is taken from the file stem.
///
/// # Arguments
///
/// * `filepath` - The path to the MERL BRDF data.
/// * `stride` - Only every `stride`-th bin is decoded.
pub fn load<P: AsRef<Path>>(filepath: P, stride: usize) -> Result<SampleStore, FitError> {
    let path = filepath.as_ref();
    log::info!("Reading MERL BRDF from {}", path.display());
    let file = File::open(path)?;
    let store = read(BufReader::new(file), stride)?;
    log::info!("  - {} valid samples decoded", store.len());
    Ok(match path.file_stem().and_then(|s| s.to_str()) {
        Some(name) => store.with_material(name),
        None => store,
    })
}

/// Reads a MERL BRDF from any byte source.
pub fn read<R: Read>(mut reader: R, stride: usize) -> Result<SampleStore, FitError> {
    let mut dims = [0usize; 3];
    for dim in dims.iter_mut() {
        let n = reader.read_i32::<LittleEndian>()?;
        *dim = usize::try_from(n)
            .map_err(|_| FitError::Format(format!("negative MERL dimension {}", n)))?;
    }
    if dims != [RES_THETA_H, RES_THETA_D, RES_PHI_D] {
        return Err(FitError::Format(format!(
            "invalid MERL dimensions (expecting {:?}, actual {:?})",
            [RES_THETA_H, RES_THETA_D, RES_PHI_D],
            dims
        )));
    }
    let mut data = vec![0.0f64; RES_TOTAL * N_CHANNELS];
    reader.read_f64_into::<LittleEndian>(&mut data)?;
    Ok(decode(&data, stride))
}

fn decode(data: &[f64], stride: usize) -> SampleStore {
    debug_assert_eq!(data.len(), RES_TOTAL * N_CHANNELS);
    let samples = (0..RES_TOTAL)
        .into_par_iter()
        .step_by(stride.max(1))
        .filter_map(|idx| decode_bin(data, idx))
        .collect::<Vec<_>>();
    SampleStore::new(samples)
}

fn decode_bin(data: &[f64], idx: usize) -> Option<Sample> {
    let value: Rgb = std::array::from_fn(|c| data[c * RES_TOTAL + idx] * SCALE[c]);
    if value.iter().any(|v| *v < 0.0) {
        return None;
    }
    let i = idx / (RES_THETA_D * RES_PHI_D);
    let j = (idx / RES_PHI_D) % RES_THETA_D;
    let k = idx % RES_PHI_D;
    let (theta_h, band_h) = theta_h_bin(i);
    let (theta_d, band_d) = theta_d_bin(j);
    let d_phi = PI / RES_PHI_D as f64;
    let phi_d = (k as f64 + 0.5) * d_phi;

    let (wi, wo) = hd2io(&sph_to_cart(theta_h, 0.0), &sph_to_cart(theta_d, phi_d));
    if wi.z <= 0.0 || wo.z <= 0.0 {
        return None;
    }
    // dwi dwo = 4 cos(theta_d) dwh dwd; the half-vector azimuth spans the
    // full circle and each stored phi_d bin stands for its mirror as well.
    let weight = 4.0 * theta_d.cos() * band_h * TAU * band_d * d_phi * 2.0;
    Some(Sample::new(
        DirectionPair::new(wi.normalize(), wo.normalize()),
        value,
        weight,
    ))
}

/// Centre and cosine band width of a half-vector zenith bin.
///
/// The mapping is not linear: bin `i` covers
/// $[(i/90)^2, ((i+1)/90)^2] \cdot \pi/2$.
fn theta_h_bin(i: usize) -> (f64, f64) {
    let angle = |x: f64| (x / RES_THETA_H as f64).powi(2) * FRAC_PI_2;
    let lo = angle(i as f64);
    let hi = angle(i as f64 + 1.0);
    (angle(i as f64 + 0.5), lo.cos() - hi.cos())
}

/// Centre and cosine band width of a difference-vector zenith bin.
fn theta_d_bin(j: usize) -> (f64, f64) {
    let step = FRAC_PI_2 / RES_THETA_D as f64;
    let lo = j as f64 * step;
    (lo + 0.5 * step, lo.cos() - (lo + step).cos())
}
