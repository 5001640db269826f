//! Resampling helpers: row draws, sample summaries, percentile intervals.

use cw_core::{Error, Result};
use rand::Rng;
use rand::rngs::StdRng;

/// Row indices drawn uniformly with replacement.
pub fn with_replacement(rng: &mut StdRng, n: usize, k: usize) -> Vec<usize> {
    (0..k).map(|_| rng.random_range(0..n)).collect()
}

/// Row indices drawn without replacement, in ascending order.
pub fn without_replacement(rng: &mut StdRng, n: usize, k: usize) -> Vec<usize> {
    let mut idx = rand::seq::index::sample(rng, n, k.min(n)).into_vec();
    idx.sort_unstable();
    idx
}

/// Mean and sample standard deviation of simulation draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleSummary {
    /// Number of draws.
    pub n: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Sample standard deviation (`n − 1` denominator; 0 for one draw).
    pub sd: f64,
}

impl SampleSummary {
    /// Summarize `values`; `None` when empty.
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let sd = if n > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        Some(Self { n, mean, sd })
    }

    /// Standard error of the mean.
    pub fn se_mean(&self) -> f64 {
        self.sd / (self.n as f64).sqrt()
    }
}

/// Quantile of sorted data via linear interpolation (`NaN` when empty).
pub fn quantile_linear_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        len => {
            let pos = q.clamp(0.0, 1.0) * (len - 1) as f64;
            let (i, j) = (pos.floor() as usize, pos.ceil() as usize);
            let t = pos - i as f64;
            (1.0 - t) * sorted[i] + t * sorted[j]
        }
    }
}

/// Percentile interval of `samples` at `conf_level`.
pub fn percentile_interval(samples: &[f64], conf_level: f64) -> Result<(f64, f64)> {
    if samples.len() < 2 {
        return Err(Error::Validation("percentile interval requires at least 2 samples".into()));
    }
    if !(conf_level.is_finite() && conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Validation(format!("conf_level must be in (0,1), got {conf_level}")));
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let alpha = 0.5 * (1.0 - conf_level);
    Ok((quantile_linear_sorted(&sorted, alpha), quantile_linear_sorted(&sorted, 1.0 - alpha)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_quantiles() {
        let s = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile_linear_sorted(&s, 0.0), 1.0);
        assert_eq!(quantile_linear_sorted(&s, 1.0), 5.0);
        assert_eq!(quantile_linear_sorted(&s, 0.5), 3.0);
        assert!((quantile_linear_sorted(&s, 0.1) - 1.4).abs() < 1e-12);
        assert!(quantile_linear_sorted(&[], 0.5).is_nan());
    }

    #[test]
    fn test_percentile_interval() {
        let samples: Vec<f64> = (0..=100).rev().map(f64::from).collect();
        let (lo, hi) = percentile_interval(&samples, 0.9).unwrap();
        assert!((lo - 5.0).abs() < 1e-12 && (hi - 95.0).abs() < 1e-12);
        assert!(percentile_interval(&[1.0], 0.9).is_err());
        assert!(percentile_interval(&samples, 1.0).is_err());
    }

    #[test]
    fn test_summary() {
        let s = SampleSummary::of(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(s.mean, 2.5);
        assert!((s.sd - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!((s.se_mean() - s.sd / 2.0).abs() < 1e-12);
        assert!(SampleSummary::of(&[]).is_none());
        assert_eq!(SampleSummary::of(&[7.0]).unwrap().sd, 0.0);
    }

    #[test]
    fn test_index_draws() {
        let mut rng = StdRng::seed_from_u64(3);
        let a = with_replacement(&mut rng, 10, 25);
        assert_eq!(a.len(), 25);
        assert!(a.iter().all(|&i| i < 10));
        let b = without_replacement(&mut rng, 10, 8);
        assert_eq!(b.len(), 8);
        assert!(b.windows(2).all(|w| w[0] < w[1]));
    }
}
