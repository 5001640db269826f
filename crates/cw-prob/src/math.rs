//! Small numerically-stable logistic utilities.

/// Stable sigmoid: `1 / (1 + exp(-x))`.
///
/// Single `exp(-|x|)`, so large `|x|` never overflows.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    let e = (-x.abs()).exp();
    let recip = 1.0 / (1.0 + e);
    if x >= 0.0 { recip } else { e * recip }
}

/// Fused `(log(1+exp(x)), sigmoid(x))` with one `exp()` call.
///
/// This is the inner loop of the logistic negative log-likelihood and its
/// gradient.
#[inline(always)]
pub fn log1pexp_and_sigmoid(x: f64) -> (f64, f64) {
    let e = (-x.abs()).exp(); // in (0, 1], no overflow
    let log_term = x.max(0.0) + e.ln_1p();
    let recip = 1.0 / (1.0 + e);
    let sigma = if x >= 0.0 { recip } else { e * recip };
    (log_term, sigma)
}

/// Clamp a probability into `[eps, 1 - eps]`.
#[inline]
pub fn clip_probability(p: f64, eps: f64) -> f64 {
    p.clamp(eps, 1.0 - eps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_bounds_and_symmetry() {
        for x in [-50.0, -10.0, -1.0, 0.0, 1.0, 10.0, 50.0] {
            let s = sigmoid(x);
            assert!((0.0..=1.0).contains(&s), "sigmoid({x})={s}");
            assert!((s + sigmoid(-x) - 1.0).abs() < 1e-15, "symmetry failed at {x}");
        }
    }

    #[test]
    fn test_fused_matches_naive_moderate_values() {
        for x in [-10.0_f64, -2.0, -0.1, 0.0, 0.1, 2.0, 10.0] {
            let (l, s) = log1pexp_and_sigmoid(x);
            assert!((l - (1.0 + x.exp()).ln()).abs() < 1e-12, "x={x}");
            assert!((s - sigmoid(x)).abs() < 1e-15, "x={x}");
        }
    }

    #[test]
    fn test_fused_is_finite_at_extremes() {
        for x in [-1e6, 1e6] {
            let (l, s) = log1pexp_and_sigmoid(x);
            assert!(l.is_finite() && s.is_finite());
        }
    }

    #[test]
    fn test_clip_probability() {
        assert_eq!(clip_probability(0.0, 0.01), 0.01);
        assert_eq!(clip_probability(1.0, 0.01), 0.99);
        assert_eq!(clip_probability(0.3, 0.01), 0.3);
    }
}
