//! Atmospheric ν_μ disappearance in a simplified three-flavour picture.
//!
//! The survival probability is the usual two-flavour term plus a θ13 term
//! whose effective mixing is resonantly modified in matter:
//!
//! - `P = 1 - sin²2θ23 cos⁴θ13 sin²Δ - sin²θ23 sin²2θ13ᵐ sin²Δ`
//! - `Δ = 1.267 |Δm²31| L / E` (eV², km, GeV)
//! - `sin²2θ13ᵐ = sin²2θ13 / ((cos2θ13 - A)² + sin²2θ13)`
//!
//! `A` grows with energy and path length through the Earth and takes the sign
//! of `Δm²31`, which is what makes the two mass orderings distinguishable.

/// Earth radius (km).
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Mean neutrino production height in the atmosphere (km).
const PRODUCTION_HEIGHT_KM: f64 = 20.0;

/// Phase constant for `Δm²[eV²] L[km] / E[GeV]`.
const PHASE_CONST: f64 = 1.267;

/// Energy scale of the matter resonance for a full Earth crossing (GeV).
const MATTER_RESONANCE_GEV: f64 = 6.0;

/// Oscillation parameters (radians, eV²).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscParams {
    pub theta23: f64,
    pub theta13: f64,
    pub deltam31: f64,
}

/// Path length from the production point to the detector.
///
/// `coszen = 1` is straight down (just the atmosphere), `coszen = -1` is
/// straight up through the Earth's diameter.
pub fn baseline_km(coszen: f64) -> f64 {
    let cz = coszen.clamp(-1.0, 1.0);
    let r = EARTH_RADIUS_KM;
    let rh = r + PRODUCTION_HEIGHT_KM;
    (rh * rh - r * r * (1.0 - cz * cz)).sqrt() - r * cz
}

/// ν_μ survival probability at `energy_gev` after `baseline` km.
pub fn survival_probability(energy_gev: f64, baseline: f64, osc: OscParams) -> f64 {
    if !(energy_gev > 0.0) {
        return 1.0;
    }

    let phase = PHASE_CONST * osc.deltam31.abs() * baseline / energy_gev;
    let sin2_phase = phase.sin().powi(2);

    let sin2_2t23 = (2.0 * osc.theta23).sin().powi(2);
    let cos4_t13 = osc.theta13.cos().powi(4);
    let sin2_t23 = osc.theta23.sin().powi(2);

    let sin2_2t13 = (2.0 * osc.theta13).sin().powi(2);
    let cos_2t13 = (2.0 * osc.theta13).cos();
    let crossing = (baseline / (2.0 * EARTH_RADIUS_KM)).min(1.0);
    let a = osc.deltam31.signum() * crossing * energy_gev / MATTER_RESONANCE_GEV;
    let denom = (cos_2t13 - a).powi(2) + sin2_2t13;
    let sin2_2t13_m = if denom > 0.0 { sin2_2t13 / denom } else { 1.0 };

    let p = 1.0 - sin2_2t23 * cos4_t13 * sin2_phase - sin2_t23 * sin2_2t13_m * sin2_phase;
    p.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const OSC: OscParams = OscParams {
        theta23: 0.785,
        theta13: 0.15,
        deltam31: 0.0025,
    };

    #[test]
    fn baseline_limits() {
        assert_relative_eq!(baseline_km(1.0), PRODUCTION_HEIGHT_KM, epsilon = 1e-9);
        assert_relative_eq!(
            baseline_km(-1.0),
            2.0 * EARTH_RADIUS_KM + PRODUCTION_HEIGHT_KM,
            epsilon = 1e-9
        );
        assert!(baseline_km(-0.5) > baseline_km(0.0));
    }

    #[test]
    fn probability_is_bounded() {
        for &e in &[1.0, 3.0, 10.0, 25.0, 80.0] {
            for &cz in &[-1.0, -0.6, -0.2, 0.0, 0.5] {
                let p = survival_probability(e, baseline_km(cz), OSC);
                assert!((0.0..=1.0).contains(&p), "p={p} at E={e}, cz={cz}");
            }
        }
    }

    #[test]
    fn no_oscillation_without_baseline() {
        assert_relative_eq!(survival_probability(10.0, 0.0, OSC), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn first_maximum_is_deep_for_maximal_mixing() {
        // Δ = π/2 at E = 1.267 * Δm² * L / (π/2).
        let l = baseline_km(-1.0);
        let e = PHASE_CONST * OSC.deltam31 * l / std::f64::consts::FRAC_PI_2;
        assert!(survival_probability(e, l, OSC) < 0.1);
    }

    #[test]
    fn orderings_differ_through_the_earth() {
        let ih = OscParams {
            deltam31: -OSC.deltam31,
            ..OSC
        };
        let l = baseline_km(-0.8);
        let p_nh = survival_probability(8.0, l, OSC);
        let p_ih = survival_probability(8.0, l, ih);
        assert!((p_nh - p_ih).abs() > 1e-6);
    }
}
