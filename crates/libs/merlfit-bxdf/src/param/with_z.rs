use super::{
    check_layout, cosine_lobe, half_lobe, seed_cosine_part, Parametrisation, SmallStorage,
    MAX_EXPONENT, MAX_SHARPNESS,
};
use base::{
    brdf::{DirectionPair, Rgb, Sample, N_CHANNELS},
    config::ParamKind,
    error::FitError,
};

/// [`SmallStorage`] augmented with a lobe along the z-axis of the
/// half-vector.
///
/// $$f_c = d_c + k_c (\cos\theta_i \cos\theta_o)^n + s_c e^{m (h_z - 1)}$$
///
/// Parameter layout: `[d_r, d_g, d_b, k_r, k_g, k_b, n, s_r, s_g, s_b, m]`.
/// With `s = 0` the model reduces to [`SmallStorage`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ZAugmented {
    sharpness_seed: f64,
}

impl ZAugmented {
    /// Offset of the half-vector lobe amplitudes.
    pub const SPECULAR: usize = SmallStorage::PARAM_COUNT;
    /// Index of the half-vector lobe sharpness.
    pub const SHARPNESS: usize = SmallStorage::PARAM_COUNT + N_CHANNELS;
    /// Number of parameters.
    pub const PARAM_COUNT: usize = SmallStorage::PARAM_COUNT + N_CHANNELS + 1;

    /// Creates the parametrisation; `sharpness_seed` is the initial value of
    /// `m`.
    pub fn new(sharpness_seed: f64) -> Self { Self { sharpness_seed } }

    /// Embeds a fitted [`SmallStorage`] vector, the half-vector lobe being
    /// switched off.
    pub fn lift(&self, small: &[f64]) -> Result<Box<[f64]>, FitError> {
        check_layout(&SmallStorage, small)?;
        let mut params = [0.0; Self::PARAM_COUNT];
        params[..Self::SPECULAR].copy_from_slice(small);
        params[Self::SHARPNESS] = self.sharpness_seed;
        Ok(Box::new(params))
    }
}

impl Default for ZAugmented {
    fn default() -> Self { Self::new(20.0) }
}

impl Parametrisation for ZAugmented {
    fn kind(&self) -> ParamKind { ParamKind::ZAugmented }

    fn param_count(&self) -> usize { Self::PARAM_COUNT }

    fn seed(&self, samples: &[Sample]) -> Box<[f64]> {
        let (diffuse, lobe) = seed_cosine_part(samples);
        let mut params = [0.0; Self::PARAM_COUNT];
        params[SmallStorage::DIFFUSE..SmallStorage::LOBE].copy_from_slice(&diffuse);
        params[SmallStorage::LOBE..SmallStorage::EXPONENT].copy_from_slice(&lobe);
        params[SmallStorage::EXPONENT] = 1.0;
        params[Self::SHARPNESS] = self.sharpness_seed;
        Box::new(params)
    }

    fn project(&self, params: &mut [f64]) {
        let (cosine, half) = params.split_at_mut(Self::SPECULAR);
        for p in cosine[..SmallStorage::EXPONENT]
            .iter_mut()
            .chain(half[..N_CHANNELS].iter_mut())
        {
            *p = p.max(0.0);
        }
        params[SmallStorage::EXPONENT] = params[SmallStorage::EXPONENT].clamp(0.0, MAX_EXPONENT);
        params[Self::SHARPNESS] = params[Self::SHARPNESS].clamp(0.0, MAX_SHARPNESS);
    }

    fn eval(&self, dirs: &DirectionPair, params: &[f64]) -> Rgb {
        let (lobe, _) = cosine_lobe(dirs, params[SmallStorage::EXPONENT]);
        let (spec, _) = half_lobe(dirs, params[Self::SHARPNESS]);
        std::array::from_fn(|c| {
            params[SmallStorage::DIFFUSE + c]
                + params[SmallStorage::LOBE + c] * lobe
                + params[Self::SPECULAR + c] * spec
        })
    }

    fn eval_with_jacobian(&self, dirs: &DirectionPair, params: &[f64], jac: &mut [f64]) -> Rgb {
        let p = Self::PARAM_COUNT;
        let (lobe, dlobe_dn) = cosine_lobe(dirs, params[SmallStorage::EXPONENT]);
        let (spec, dspec_dm) = half_lobe(dirs, params[Self::SHARPNESS]);
        jac.fill(0.0);
        std::array::from_fn(|c| {
            let k = params[SmallStorage::LOBE + c];
            let s = params[Self::SPECULAR + c];
            let row = &mut jac[c * p..(c + 1) * p];
            row[SmallStorage::DIFFUSE + c] = 1.0;
            row[SmallStorage::LOBE + c] = lobe;
            row[SmallStorage::EXPONENT] = k * dlobe_dn;
            row[Self::SPECULAR + c] = spec;
            row[Self::SHARPNESS] = s * dspec_dm;
            params[SmallStorage::DIFFUSE + c] + k * lobe + s * spec
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::math::sph_to_cart;

    #[test]
    fn lifted_vector_reproduces_small_storage() {
        let small = [0.05, 0.04, 0.03, 0.8, 0.7, 0.6, 2.0];
        let model = ZAugmented::new(25.0);
        let lifted = model.lift(&small).unwrap();
        assert_eq!(lifted.len(), ZAugmented::PARAM_COUNT);
        assert_eq!(lifted[ZAugmented::SHARPNESS], 25.0);
        for (ti, to, po) in [(0.1, 0.2, 0.3), (0.9, 0.4, 3.0), (1.4, 1.2, 5.0)] {
            let dirs = DirectionPair::new(sph_to_cart(ti, 0.0), sph_to_cart(to, po));
            assert_eq!(model.eval(&dirs, &lifted), SmallStorage.eval(&dirs, &small));
        }
        assert!(matches!(
            model.lift(&lifted),
            Err(FitError::ParameterCount { expected: 7, .. })
        ));
    }

    #[test]
    fn seed_extends_small_storage_seed() {
        let dirs = DirectionPair::new(sph_to_cart(0.2, 0.0), sph_to_cart(0.3, 1.0));
        let samples = [Sample::new(dirs, [0.3, 0.2, 0.1], 1.0)];
        let model = ZAugmented::default();
        let seed = model.seed(&samples);
        assert_eq!(&seed[..ZAugmented::SPECULAR], &*SmallStorage.seed(&samples));
        assert_eq!(&seed[ZAugmented::SPECULAR..ZAugmented::SHARPNESS], &[0.0; 3]);
    }

    #[test]
    fn specular_peak_at_mirror_direction() {
        let params = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 50.0];
        let model = ZAugmented::default();
        let mirror = DirectionPair::new(sph_to_cart(0.6, 0.0), sph_to_cart(0.6, std::f64::consts::PI));
        let off = DirectionPair::new(sph_to_cart(0.6, 0.0), sph_to_cart(0.6, 0.5));
        let f_mirror = model.eval(&mirror, &params);
        assert!((f_mirror[0] - 1.0).abs() < 1e-12);
        assert!(model.eval(&off, &params)[0] < f_mirror[0]);
    }

    #[test]
    fn projection_clamps_to_domain() {
        let mut params = [-1.0; ZAugmented::PARAM_COUNT];
        params[ZAugmented::SHARPNESS] = 1.0e9;
        ZAugmented::default().project(&mut params);
        assert!(params[..ZAugmented::SHARPNESS].iter().all(|p| *p == 0.0));
        assert_eq!(params[ZAugmented::SHARPNESS], MAX_SHARPNESS);
    }
}
