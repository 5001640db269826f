//! Student-t critical values and p-values (location 0, scale 1).

use cw_core::{Error, Result};
use statrs::distribution::{ContinuousCDF, StudentsT};

fn t_dist(df: f64) -> Result<StudentsT> {
    if !(df.is_finite() && df > 0.0) {
        return Err(Error::Validation(format!("degrees of freedom must be finite and > 0, got {df}")));
    }
    StudentsT::new(0.0, 1.0, df)
        .map_err(|e| Error::Validation(format!("invalid t distribution (df={df}): {e}")))
}

/// Two-sided critical value `t` such that `P(|T_df| <= t) = conf_level`.
pub fn two_sided_critical(conf_level: f64, df: f64) -> Result<f64> {
    if !(conf_level.is_finite() && conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Validation(format!("conf_level must be in (0,1), got {conf_level}")));
    }
    Ok(t_dist(df)?.inverse_cdf(0.5 + 0.5 * conf_level))
}

/// Two-sided p-value of a t statistic with `df` degrees of freedom.
pub fn two_sided_p(t: f64, df: f64) -> Result<f64> {
    if t.is_nan() {
        return Ok(1.0);
    }
    let dist = t_dist(df)?;
    Ok((2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_matches_tables() {
        // t_{0.975, 10} = 2.228139
        let t = two_sided_critical(0.95, 10.0).unwrap();
        assert!((t - 2.228_139).abs() < 1e-5, "t={t}");
    }

    #[test]
    fn test_large_df_approaches_normal() {
        let t = two_sided_critical(0.95, 1e6).unwrap();
        assert!((t - 1.959_964).abs() < 1e-3);
    }

    #[test]
    fn test_p_value_symmetry_and_bounds() {
        let p1 = two_sided_p(2.0, 20.0).unwrap();
        let p2 = two_sided_p(-2.0, 20.0).unwrap();
        assert!((p1 - p2).abs() < 1e-15);
        assert!(p1 > 0.0 && p1 < 0.1);
        assert!((two_sided_p(0.0, 5.0).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_df() {
        assert!(two_sided_critical(0.95, 0.0).is_err());
        assert!(two_sided_p(1.0, -1.0).is_err());
    }
}
