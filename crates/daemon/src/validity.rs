//! Validity evaluator: maps a frame's metrics and the configured thresholds
//! to an accept/reject decision.

use crate::config::{Limit, ScaleUnit, ThresholdsConfig};
use crate::frame::FrameMetrics;

/// FWHM as compared against its limit.
pub fn scaled_fwhm(fwhm: f64, thresholds: &ThresholdsConfig) -> f64 {
    match thresholds.scale_unit {
        ScaleUnit::Arcsec => fwhm * thresholds.subframe_scale,
        ScaleUnit::Pixels => fwhm,
    }
}

fn exceeds(value: f64, limit: Limit) -> bool {
    limit.active().is_some_and(|l| value > l)
}

fn below(value: f64, limit: Limit) -> bool {
    limit.active().is_some_and(|l| value < l)
}

/// True when every enabled check passes.
///
/// FWHM, eccentricity and PSF fail above their limit; SNR fails below it.
/// Limits are inclusive.
pub fn is_valid(metrics: &FrameMetrics, thresholds: &ThresholdsConfig) -> bool {
    !(exceeds(scaled_fwhm(metrics.fwhm, thresholds), thresholds.fwhm_limit)
        || exceeds(metrics.eccentricity, thresholds.eccentricity_limit)
        || below(metrics.snr, thresholds.snr_limit)
        || exceeds(metrics.psf, thresholds.psf_limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn metrics(fwhm: f64, eccentricity: f64, snr: f64, psf: f64) -> FrameMetrics {
        FrameMetrics { fwhm, eccentricity, snr, psf }
    }

    fn thresholds(fwhm: f64, ecc: f64, snr: f64, psf: f64) -> ThresholdsConfig {
        ThresholdsConfig {
            fwhm_limit: Limit::new(fwhm),
            eccentricity_limit: Limit::new(ecc),
            snr_limit: Limit::new(snr),
            psf_limit: Limit::new(psf),
            ..ThresholdsConfig::default()
        }
    }

    #[test]
    fn test_fwhm_boundary_is_inclusive() {
        let t = thresholds(3.0, 0.0, 0.0, 0.0);
        assert!(!is_valid(&metrics(3.01, 0.0, 0.0, 0.0), &t));
        assert!(is_valid(&metrics(3.00, 0.0, 0.0, 0.0), &t));
    }

    #[test]
    fn test_snr_inverse_sense() {
        let t = thresholds(0.0, 0.0, 10.0, 0.0);
        assert!(!is_valid(&metrics(0.0, 0.0, 9.99, 0.0), &t));
        assert!(is_valid(&metrics(0.0, 0.0, 10.0, 0.0), &t));
    }

    #[test]
    fn test_fwhm_scaled_in_arcsec_mode_only() {
        let mut t = thresholds(3.0, 0.0, 0.0, 0.0);
        t.subframe_scale = 1.5;
        let m = metrics(2.5, 0.0, 0.0, 0.0);

        // 2.5 px * 1.5 "/px = 3.75"
        assert!(!is_valid(&m, &t));

        t.scale_unit = ScaleUnit::Pixels;
        assert!(is_valid(&m, &t));
    }

    #[test]
    fn test_eccentricity_and_psf_limits() {
        let t = thresholds(0.0, 0.6, 0.0, 0.2);
        assert!(is_valid(&metrics(9.0, 0.6, 0.0, 0.2), &t));
        assert!(!is_valid(&metrics(9.0, 0.61, 0.0, 0.2), &t));
        assert!(!is_valid(&metrics(9.0, 0.6, 0.0, 0.21), &t));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_all_disabled_always_valid(
            fwhm in 0.0f64..100.0,
            ecc in 0.0f64..1.0,
            snr in 0.0f64..1000.0,
            psf in 0.0f64..10.0,
            scale in 0.1f64..10.0,
        ) {
            let mut t = ThresholdsConfig::default();
            t.subframe_scale = scale;
            prop_assert!(is_valid(&metrics(fwhm, ecc, snr, psf), &t));
        }

        #[test]
        fn prop_any_failing_check_rejects(
            fwhm in 0.0f64..10.0,
            ecc in 0.0f64..1.0,
            snr in 1.0f64..100.0,
            psf in 0.0f64..1.0,
            which in 0usize..4,
        ) {
            // Start from limits every frame passes, then tighten one past the value.
            let mut t = thresholds(fwhm + 1.0, ecc + 0.1, snr - 0.5, psf + 0.1);
            prop_assert!(is_valid(&metrics(fwhm, ecc, snr, psf), &t));

            match which {
                0 => t.fwhm_limit = Limit::new(fwhm * 0.5 - 0.01),
                1 => t.eccentricity_limit = Limit::new(ecc * 0.5 - 0.01),
                2 => t.snr_limit = Limit::new(snr + 1.0),
                _ => t.psf_limit = Limit::new(psf * 0.5 - 0.01),
            }
            let disabled = t.fwhm_limit.active().is_none()
                || t.eccentricity_limit.active().is_none()
                || t.psf_limit.active().is_none();
            prop_assert!(!is_valid(&metrics(fwhm, ecc, snr, psf), &t) || disabled);
        }

        #[test]
        fn prop_fwhm_matches_scaled_comparison(
            fwhm in 0.0f64..10.0,
            limit in 0.01f64..10.0,
            scale in 0.1f64..3.0,
        ) {
            let mut t = thresholds(limit, 0.0, 0.0, 0.0);
            t.subframe_scale = scale;
            prop_assert_eq!(is_valid(&metrics(fwhm, 0.0, 0.0, 0.0), &t), fwhm * scale <= limit);
        }
    }
}
