use super::{cosine_lobe, seed_cosine_part, Parametrisation, MAX_EXPONENT};
use base::{
    brdf::{DirectionPair, Rgb, Sample, N_CHANNELS},
    config::ParamKind,
};

/// Diffuse term plus a cosine lobe per channel and a shared exponent.
///
/// $$f_c(\omega_i, \omega_o) = d_c + k_c (\cos\theta_i \cos\theta_o)^n$$
///
/// Parameter layout: `[d_r, d_g, d_b, k_r, k_g, k_b, n]`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SmallStorage;

impl SmallStorage {
    /// Offset of the diffuse terms.
    pub const DIFFUSE: usize = 0;
    /// Offset of the lobe amplitudes.
    pub const LOBE: usize = N_CHANNELS;
    /// Index of the lobe exponent.
    pub const EXPONENT: usize = 2 * N_CHANNELS;
    /// Number of parameters.
    pub const PARAM_COUNT: usize = 2 * N_CHANNELS + 1;
}

impl Parametrisation for SmallStorage {
    fn kind(&self) -> ParamKind { ParamKind::SmallStorage }

    fn param_count(&self) -> usize { Self::PARAM_COUNT }

    fn seed(&self, samples: &[Sample]) -> Box<[f64]> {
        let (diffuse, lobe) = seed_cosine_part(samples);
        let mut params = [0.0; Self::PARAM_COUNT];
        params[Self::DIFFUSE..Self::LOBE].copy_from_slice(&diffuse);
        params[Self::LOBE..Self::EXPONENT].copy_from_slice(&lobe);
        params[Self::EXPONENT] = 1.0;
        Box::new(params)
    }

    fn project(&self, params: &mut [f64]) {
        for p in &mut params[Self::DIFFUSE..Self::EXPONENT] {
            *p = p.max(0.0);
        }
        params[Self::EXPONENT] = params[Self::EXPONENT].clamp(0.0, MAX_EXPONENT);
    }

    fn eval(&self, dirs: &DirectionPair, params: &[f64]) -> Rgb {
        let (lobe, _) = cosine_lobe(dirs, params[Self::EXPONENT]);
        std::array::from_fn(|c| params[Self::DIFFUSE + c] + params[Self::LOBE + c] * lobe)
    }

    fn eval_with_jacobian(&self, dirs: &DirectionPair, params: &[f64], jac: &mut [f64]) -> Rgb {
        let p = Self::PARAM_COUNT;
        let (lobe, dlobe_dn) = cosine_lobe(dirs, params[Self::EXPONENT]);
        jac.fill(0.0);
        std::array::from_fn(|c| {
            let k = params[Self::LOBE + c];
            let row = &mut jac[c * p..(c + 1) * p];
            row[Self::DIFFUSE + c] = 1.0;
            row[Self::LOBE + c] = lobe;
            row[Self::EXPONENT] = k * dlobe_dn;
            params[Self::DIFFUSE + c] + k * lobe
        })
    }
}
