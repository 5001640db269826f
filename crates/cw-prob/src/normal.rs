//! Standard normal quantiles and tail probabilities.

use cw_core::{Error, Result};
use statrs::distribution::{ContinuousCDF, Normal};

const PROB_EPS: f64 = 1e-12;

#[inline]
fn standard_normal() -> Normal {
    // Safe by construction for mean=0, sigma=1.
    Normal::new(0.0, 1.0).expect("standard normal should be constructible")
}

/// Standard normal CDF.
#[inline]
pub fn cdf(z: f64) -> f64 {
    standard_normal().cdf(z)
}

/// Standard normal quantile, with `p` clipped away from 0 and 1.
#[inline]
pub fn quantile(p: f64) -> f64 {
    standard_normal().inverse_cdf(p.clamp(PROB_EPS, 1.0 - PROB_EPS))
}

/// Two-sided critical value `z` such that `P(|Z| <= z) = conf_level`.
pub fn two_sided_critical(conf_level: f64) -> Result<f64> {
    if !(conf_level.is_finite() && conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Validation(format!("conf_level must be in (0,1), got {conf_level}")));
    }
    Ok(quantile(0.5 + 0.5 * conf_level))
}

/// Two-sided p-value of a z statistic. Non-finite `z` maps to 0 (infinite) or 1 (NaN).
pub fn two_sided_p(z: f64) -> f64 {
    if z.is_nan() {
        return 1.0;
    }
    (2.0 * (1.0 - cdf(z.abs()))).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_95() {
        let z = two_sided_critical(0.95).unwrap();
        assert!((z - 1.959_963_984_540_054).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_conf_level() {
        assert!(two_sided_critical(0.0).is_err());
        assert!(two_sided_critical(1.0).is_err());
        assert!(two_sided_critical(f64::NAN).is_err());
    }

    #[test]
    fn test_two_sided_p() {
        assert!((two_sided_p(0.0) - 1.0).abs() < 1e-12);
        assert!((two_sided_p(1.959_963_984_540_054) - 0.05).abs() < 1e-6);
        assert_eq!(two_sided_p(f64::NAN), 1.0);
        assert!(two_sided_p(f64::INFINITY) < 1e-12);
    }
}
