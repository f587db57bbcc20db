//! Math utilities.
//!
//! Directions live in the local shading frame: the surface is the xy-plane
//! and the z-axis is the normal. All angles are in radians.

use serde::{Deserialize, Serialize};
use std::{
    f64::consts::TAU,
    fmt::{Debug, Formatter},
};

pub use glam::{DMat3, DVec3};

/// Reciprocal of a double precision floating point number.
///
/// Returns a signed infinity for zero instead of panicking in debug builds.
#[inline]
pub fn rcp_f64(x: f64) -> f64 {
    if x == 0.0 {
        return f64::INFINITY.copysign(x);
    }
    1.0 / x
}

/// Spherical coordinate on the unit sphere.
#[derive(Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sph2 {
    /// Zenith angle (polar angle) in radians. 0 is the zenith, pi/2 is the
    /// horizon.
    pub theta: f64,
    /// Azimuth angle in radians, in the range [0, 2pi).
    pub phi: f64,
}

impl Sph2 {
    /// Create a new spherical coordinate.
    pub const fn new(theta: f64, phi: f64) -> Self { Self { theta, phi } }

    /// Convert to a cartesian coordinate.
    pub fn to_cartesian(&self) -> DVec3 { sph_to_cart(self.theta, self.phi) }

    /// Convert from a cartesian coordinate.
    pub fn from_cartesian(v: DVec3) -> Self { cart_to_sph(v) }
}

impl Debug for Sph2 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ θ: {:.4}°, φ: {:.4}° }}",
            self.theta.to_degrees(),
            self.phi.to_degrees()
        )
    }
}

/// Conversion from spherical coordinate system to cartesian coordinate system.
///
/// # Arguments
///
/// * `theta` - zenith angle in radians
/// * `phi` - azimuth angle in radians
pub fn sph_to_cart(theta: f64, phi: f64) -> DVec3 {
    let (sin_theta, cos_theta) = theta.sin_cos();
    let (sin_phi, cos_phi) = phi.sin_cos();
    DVec3::new(sin_theta * cos_phi, sin_theta * sin_phi, cos_theta)
}

/// Conversion from cartesian coordinate system to spherical coordinate system.
///
/// The length of the vector is discarded.
pub fn cart_to_sph(v: DVec3) -> Sph2 {
    let rho = v.length();
    let theta = (v.z * rcp_f64(rho)).clamp(-1.0, 1.0).acos();
    let mut phi = v.y.atan2(v.x);
    if phi < 0.0 {
        phi += TAU;
    }
    Sph2::new(theta, phi)
}

#[rustfmt::skip]
/// Converts the incident and outgoing direction to the half and difference
/// vector.
///
/// $$
/// \begin{cases}
///   \mathbf{\h} = \frac{\mathbf{\i} + \mathbf{\o}}{||\mathbf{\i} + \mathbf{\o}||} \\\\
///   \mathbf{\d} = Rot_y(-\theta_h) \cdot Rot_z(-\phi_h) \cdot \mathbf{\i}
/// \end{cases}
/// $$
///
/// where $\theta_h$ and $\phi_h$ are the polar and azimuthal angles of the half-vector.
///
/// # Returns
///
/// (half, difference)
pub fn io2hd(vi: &DVec3, vo: &DVec3) -> (DVec3, DVec3) {
    let h = (*vi + *vo).normalize_or_zero();
    let wh = Sph2::from_cartesian(h);
    let rot_y = DMat3::from_rotation_y(-wh.theta);
    let rot_z = DMat3::from_rotation_z(-wh.phi);
    let d = rot_y * rot_z * *vi;
    (h, d)
}

#[rustfmt::skip]
/// Converts the half and difference vectors to the incident and outgoing
/// direction.
///
/// $$
/// \begin{cases}
///   \mathbf{\i} = Rot_z(+\phi_h) \cdot Rot_y(+\theta_h) \cdot \mathbf{\d} \\\\
///   \mathbf{\o} = 2 \cdot (\mathbf{\i} \cdot \mathbf{h})\mathbf{\h} - \mathbf{\i}
/// \end{cases}
/// $$
///
/// # Returns
///
/// (incident, outgoing)
pub fn hd2io(vh: &DVec3, vd: &DVec3) -> (DVec3, DVec3) {
    let wh = Sph2::from_cartesian(*vh);
    let rot_y = DMat3::from_rotation_y(wh.theta);
    let rot_z = DMat3::from_rotation_z(wh.phi);
    let vi = rot_z * rot_y * *vd;
    let vo = 2.0 * vi.dot(*vh) * *vh - vi;
    (vi, vo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[track_caller]
    fn assert_vec3_eq(v1: &DVec3, v2: &DVec3) {
        assert!((v1.x - v2.x).abs() < 1e-6, "x: {} != {}", v1.x, v2.x);
        assert!((v1.y - v2.y).abs() < 1e-6, "y: {} != {}", v1.y, v2.y);
        assert!((v1.z - v2.z).abs() < 1e-6, "z: {} != {}", v1.z, v2.z);
    }

    #[test]
    fn test_io2hd() {
        let i = DVec3::new(1.0, 0.0, 0.0);
        let o = DVec3::new(0.0, 1.0, 0.0);
        let (h, d) = io2hd(&i, &o);
        assert_vec3_eq(&h, &DVec3::new(1.0, 1.0, 0.0).normalize());
        assert_vec3_eq(&d, &DVec3::new(0.0, -1.0, 1.0).normalize());

        let (i_converted, o_converted) = hd2io(&h, &d);
        assert_vec3_eq(&i_converted, &i);
        assert_vec3_eq(&o_converted, &o);

        let wi = Sph2::new(PI / 4.0, PI / 3.0);
        let wo = Sph2::new(PI / 3.0, PI / 2.0);
        let (h, d) = io2hd(&wi.to_cartesian(), &wo.to_cartesian());
        assert_vec3_eq(&h, &DVec3::new(0.182143, 0.761639, 0.621876));
        assert_vec3_eq(
            &d.normalize(),
            &DVec3::new(-0.132232527864, -0.201426960293, 0.970536829925),
        );
    }

    #[test]
    fn cart_to_sph_wraps_azimuth() {
        let s = cart_to_sph(DVec3::new(0.0, -1.0, 0.0));
        approx::assert_relative_eq!(s.theta, FRAC_PI_2, epsilon = 1e-12);
        approx::assert_relative_eq!(s.phi, 1.5 * PI, epsilon = 1e-12);
        assert_eq!(rcp_f64(-0.0), f64::NEG_INFINITY);
    }

    proptest! {
        #[test]
        fn half_vector_bisects(ti in 0.0..1.5f64, pi in 0.0..6.28f64, to in 0.0..1.5f64, po in 0.0..6.28f64) {
            let vi = sph_to_cart(ti, pi);
            let vo = sph_to_cart(to, po);
            let (h, d) = io2hd(&vi, &vo);
            prop_assume!((vi + vo).length() > 1e-3);
            // The difference vector is the incident direction seen from the half-vector frame.
            prop_assert!((d.z - vi.dot(h)).abs() < 1e-9);
            prop_assert!((vi.dot(h) - vo.dot(h)).abs() < 1e-9);
            let (i2, o2) = hd2io(&h, &d);
            prop_assert!((i2 - vi).length() < 1e-9);
            prop_assert!((o2 - vo).length() < 1e-9);
        }
    }
}
