//! Synthetic media-mix data with a known causal structure.
//!
//! Confounders are generated first, each by its own process. Every channel's
//! spend then depends on the confounders plus independent noise, and the
//! outcome depends on every channel's spend plus the confounders plus noise:
//!
//! ```text
//! spend_c = base_spend_c + Σ_k spend_effect_k · (conf_k − center_k) + N(0, spend_noise_c²)
//! sales   = OUTCOME_BASELINE + Σ_c sensitivity_c · spend_c + Σ_k outcome_effect_k · conf_k
//!           + noise_level · N(0, 1)
//! ```
//!
//! Each confounder therefore opens a backdoor path spend ← conf → sales, and
//! `sensitivity_c` is the ground-truth ATE of channel `c`.

use cw_core::{Dataset, Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Intercept of the generated outcome.
pub const OUTCOME_BASELINE: f64 = 5.0;

/// Name of the generated outcome column.
pub const OUTCOME_COLUMN: &str = "sales";

fn default_spend_noise() -> f64 {
    2.0
}

/// One marketing channel (a candidate treatment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Column name (e.g. `"social"`).
    pub name: String,
    /// Spend level when every confounder sits at its center.
    pub base_spend: f64,
    /// Outcome change per unit of spend (the true ATE).
    pub sensitivity: f64,
    /// Standard deviation of the channel's independent spend noise.
    #[serde(default = "default_spend_noise")]
    pub spend_noise: f64,
}

impl ChannelConfig {
    /// Channel with the default spend noise.
    pub fn new(name: impl Into<String>, base_spend: f64, sensitivity: f64) -> Self {
        Self { name: name.into(), base_spend, sensitivity, spend_noise: default_spend_noise() }
    }

    /// The five demo channels.
    pub fn default_channels() -> Vec<Self> {
        vec![
            Self::new("tv", 20.0, 0.6),
            Self::new("search", 20.0, 0.9),
            Self::new("social", 20.0, 0.8),
            Self::new("display", 20.0, 0.3),
            Self::new("email", 20.0, 0.4),
        ]
    }
}

/// Stochastic process generating one confounder column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfounderProcess {
    /// Deterministic `amplitude · sin(2π t / period)`.
    Seasonal {
        /// Peak deviation from zero.
        amplitude: f64,
        /// Period in rows (52 = weekly data with yearly seasonality).
        period: f64,
    },
    /// AR(1) process with stationary law `N(mean, sd²)`; `reversion = 1` is i.i.d.
    MeanReverting {
        /// Long-run mean.
        mean: f64,
        /// Stationary standard deviation.
        sd: f64,
        /// Pull toward the mean per step, in `(0, 1]`.
        reversion: f64,
    },
    /// I.i.d. uniform draws.
    Uniform {
        /// Lower bound.
        low: f64,
        /// Upper bound.
        high: f64,
    },
    /// I.i.d. normal draws.
    Normal {
        /// Mean.
        mean: f64,
        /// Standard deviation.
        sd: f64,
    },
}

impl ConfounderProcess {
    /// Nominal level the spend equation is centered on.
    pub fn center(&self) -> f64 {
        match *self {
            Self::Seasonal { .. } => 0.0,
            Self::MeanReverting { mean, .. } | Self::Normal { mean, .. } => mean,
            Self::Uniform { low, high } => 0.5 * (low + high),
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        let bad = |what: &str| Err(Error::Validation(format!("confounder '{name}': {what}")));
        match *self {
            Self::Seasonal { amplitude, period } => {
                if !amplitude.is_finite() {
                    return bad("amplitude must be finite");
                }
                if !(period.is_finite() && period > 0.0) {
                    return bad("period must be finite and > 0");
                }
            }
            Self::MeanReverting { mean, sd, reversion } => {
                if !(mean.is_finite() && sd.is_finite() && sd >= 0.0) {
                    return bad("mean must be finite and sd finite and >= 0");
                }
                if !(reversion > 0.0 && reversion <= 1.0) {
                    return bad("reversion must be in (0, 1]");
                }
            }
            Self::Uniform { low, high } => {
                if !(low.is_finite() && high.is_finite() && low <= high) {
                    return bad("uniform bounds must be finite with low <= high");
                }
            }
            Self::Normal { mean, sd } => {
                if !(mean.is_finite() && sd.is_finite() && sd >= 0.0) {
                    return bad("mean must be finite and sd finite and >= 0");
                }
            }
        }
        Ok(())
    }

    fn sample_path(&self, n: usize, rng: &mut StdRng) -> Vec<f64> {
        match *self {
            Self::Seasonal { amplitude, period } => (0..n)
                .map(|t| amplitude * (2.0 * std::f64::consts::PI * t as f64 / period).sin())
                .collect(),
            Self::MeanReverting { mean, sd, reversion } => {
                let phi = 1.0 - reversion;
                let innovation_sd = sd * (1.0 - phi * phi).sqrt();
                let mut out = Vec::with_capacity(n);
                let mut prev = mean;
                for t in 0..n {
                    let eps: f64 = StandardNormal.sample(rng);
                    let x = if t == 0 {
                        mean + sd * eps
                    } else {
                        mean + phi * (prev - mean) + innovation_sd * eps
                    };
                    out.push(x);
                    prev = x;
                }
                out
            }
            Self::Uniform { low, high } => {
                (0..n).map(|_| low + (high - low) * rng.random::<f64>()).collect()
            }
            Self::Normal { mean, sd } => (0..n)
                .map(|_| {
                    let eps: f64 = StandardNormal.sample(rng);
                    mean + sd * eps
                })
                .collect(),
        }
    }
}

/// One confounder and its effects on spend and on the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfounderConfig {
    /// Column name.
    pub name: String,
    /// Generating process.
    pub process: ConfounderProcess,
    /// Effect on every channel's spend per unit deviation from the center.
    pub spend_effect: f64,
    /// Effect on the outcome per unit.
    pub outcome_effect: f64,
}

impl ConfounderConfig {
    /// Seasonality (period 52) and a mean-reverting price, as in the demo data.
    pub fn default_confounders() -> Vec<Self> {
        vec![
            Self {
                name: "seasonality".to_string(),
                process: ConfounderProcess::Seasonal { amplitude: 0.5, period: 52.0 },
                spend_effect: 3.0,
                outcome_effect: 2.5,
            },
            Self {
                name: "price".to_string(),
                process: ConfounderProcess::MeanReverting { mean: 100.0, sd: 5.0, reversion: 0.5 },
                spend_effect: -0.1,
                outcome_effect: -0.05,
            },
        ]
    }
}

/// All generator inputs, serializable as part of an analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Number of rows.
    pub n_rows: usize,
    /// Channels (treatments).
    pub channels: Vec<ChannelConfig>,
    /// Confounders.
    pub confounders: Vec<ConfounderConfig>,
    /// Outcome noise scale.
    pub noise_level: f64,
    /// RNG seed; `None` draws fresh OS entropy on every call.
    pub seed: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            n_rows: 500,
            channels: ChannelConfig::default_channels(),
            confounders: ConfounderConfig::default_confounders(),
            noise_level: 0.5,
            seed: Some(123),
        }
    }
}

impl SyntheticConfig {
    /// Generate the dataset described by this configuration.
    pub fn generate(&self) -> Result<Dataset> {
        generate(self.n_rows, &self.channels, &self.confounders, self.noise_level, self.seed)
    }

    /// Ground-truth ATE of `channel` on the outcome.
    pub fn true_effect(&self, channel: &str) -> Option<f64> {
        self.channels.iter().find(|c| c.name == channel).map(|c| c.sensitivity)
    }
}

fn validate_inputs(
    channels: &[ChannelConfig],
    confounders: &[ConfounderConfig],
    noise_level: f64,
) -> Result<()> {
    if channels.is_empty() {
        return Err(Error::Validation("at least one channel is required".into()));
    }
    if !(noise_level.is_finite() && noise_level >= 0.0) {
        return Err(Error::Validation(format!("noise_level must be finite and >= 0, got {noise_level}")));
    }
    let mut seen: Vec<&str> = vec![OUTCOME_COLUMN];
    let names = channels.iter().map(|c| c.name.as_str()).chain(confounders.iter().map(|c| c.name.as_str()));
    for name in names {
        if name.trim().is_empty() {
            return Err(Error::Validation("channel/confounder names must be non-empty".into()));
        }
        if seen.contains(&name) {
            return Err(Error::Validation(format!("duplicate or reserved column name '{name}'")));
        }
        seen.push(name);
    }
    for ch in channels {
        if !(ch.base_spend.is_finite() && ch.sensitivity.is_finite()) {
            return Err(Error::Validation(format!("channel '{}': parameters must be finite", ch.name)));
        }
        if !(ch.spend_noise.is_finite() && ch.spend_noise >= 0.0) {
            return Err(Error::Validation(format!("channel '{}': spend_noise must be >= 0", ch.name)));
        }
    }
    for conf in confounders {
        conf.process.validate(&conf.name)?;
        if !(conf.spend_effect.is_finite() && conf.outcome_effect.is_finite()) {
            return Err(Error::Validation(format!("confounder '{}': effects must be finite", conf.name)));
        }
    }
    Ok(())
}

/// Generate a synthetic dataset with channels, confounders and the `sales` outcome.
///
/// Columns are ordered: channels, confounders, outcome. With `seed = Some(s)` the
/// output is bit-reproducible; `n_rows = 0` yields a dataset with every column and
/// no rows.
pub fn generate(
    n_rows: usize,
    channel_configs: &[ChannelConfig],
    confounder_configs: &[ConfounderConfig],
    noise_level: f64,
    seed: Option<u64>,
) -> Result<Dataset> {
    validate_inputs(channel_configs, confounder_configs, noise_level)?;

    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_os_rng(),
    };

    let confounders: Vec<Vec<f64>> =
        confounder_configs.iter().map(|c| c.process.sample_path(n_rows, &mut rng)).collect();

    let mut spends: Vec<Vec<f64>> = Vec::with_capacity(channel_configs.len());
    for ch in channel_configs {
        let mut spend: Vec<f64> = (0..n_rows)
            .map(|i| {
                let driven: f64 = confounder_configs
                    .iter()
                    .zip(&confounders)
                    .map(|(cfg, col)| cfg.spend_effect * (col[i] - cfg.process.center()))
                    .sum();
                let eps: f64 = StandardNormal.sample(&mut rng);
                ch.base_spend + driven + ch.spend_noise * eps
            })
            .collect();
        // Spend cannot be negative: shift the whole column (a constant, so slopes are kept).
        let min = spend.iter().copied().fold(f64::INFINITY, f64::min);
        if min < 0.0 {
            spend.iter_mut().for_each(|s| *s -= min);
        }
        spends.push(spend);
    }

    let outcome: Vec<f64> = (0..n_rows)
        .map(|i| {
            let media: f64 =
                channel_configs.iter().zip(&spends).map(|(ch, s)| ch.sensitivity * s[i]).sum();
            let conf: f64 = confounder_configs
                .iter()
                .zip(&confounders)
                .map(|(cfg, col)| cfg.outcome_effect * col[i])
                .sum();
            let eps: f64 = StandardNormal.sample(&mut rng);
            OUTCOME_BASELINE + media + conf + noise_level * eps
        })
        .collect();

    let mut columns: Vec<(String, Vec<f64>)> =
        Vec::with_capacity(channel_configs.len() + confounder_configs.len() + 1);
    columns.extend(channel_configs.iter().map(|c| c.name.clone()).zip(spends));
    columns.extend(confounder_configs.iter().map(|c| c.name.clone()).zip(confounders));
    columns.push((OUTCOME_COLUMN.to_string(), outcome));

    tracing::debug!(
        n_rows,
        channels = channel_configs.len(),
        confounders = confounder_configs.len(),
        seeded = seed.is_some(),
        "generated synthetic dataset"
    );
    Dataset::from_columns(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SyntheticConfig {
        SyntheticConfig { n_rows: 200, seed: Some(7), ..Default::default() }
    }

    #[test]
    fn test_columns_and_shape() {
        let ds = cfg().generate().unwrap();
        assert_eq!(ds.n_rows(), 200);
        let names: Vec<&str> = ds.names().iter().map(String::as_str).collect();
        assert_eq!(names, ["tv", "search", "social", "display", "email", "seasonality", "price", "sales"]);
        assert!(ds.column("social").unwrap().iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let a = cfg().generate().unwrap();
        let b = cfg().generate().unwrap();
        assert_eq!(a, b);
        let c = SyntheticConfig { seed: Some(8), ..cfg() }.generate().unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_unseeded_generation_differs() {
        let c = SyntheticConfig { seed: None, ..cfg() };
        assert_ne!(c.generate().unwrap(), c.generate().unwrap());
    }

    #[test]
    fn test_zero_rows_is_well_formed() {
        let ds = SyntheticConfig { n_rows: 0, ..cfg() }.generate().unwrap();
        assert_eq!(ds.n_rows(), 0);
        assert_eq!(ds.n_columns(), 8);
    }

    #[test]
    fn test_seasonality_is_periodic() {
        let ds = SyntheticConfig { n_rows: 105, ..cfg() }.generate().unwrap();
        let s = ds.column("seasonality").unwrap();
        assert!((s[0] - s[52]).abs() < 1e-9);
        assert!((s[13] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_spend_tracks_confounder() {
        // Positive spend_effect on seasonality: spend should correlate positively.
        let ds = SyntheticConfig { n_rows: 2000, ..cfg() }.generate().unwrap();
        let x = ds.column("seasonality").unwrap();
        let y = ds.column("tv").unwrap();
        let n = x.len() as f64;
        let mx = x.iter().sum::<f64>() / n;
        let my = y.iter().sum::<f64>() / n;
        let cov: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum::<f64>() / n;
        assert!(cov > 0.0);
    }

    #[test]
    fn test_zero_noise_outcome_is_exact() {
        let c = SyntheticConfig {
            n_rows: 10,
            channels: vec![ChannelConfig::new("social", 10.0, 0.8)],
            confounders: vec![],
            noise_level: 0.0,
            seed: Some(1),
        };
        let ds = c.generate().unwrap();
        let s = ds.column("social").unwrap();
        let y = ds.column(OUTCOME_COLUMN).unwrap();
        for (si, yi) in s.iter().zip(y) {
            assert!((yi - (OUTCOME_BASELINE + 0.8 * si)).abs() < 1e-12);
        }
        assert_eq!(c.true_effect("social"), Some(0.8));
        assert_eq!(c.true_effect("tv"), None);
    }

    #[test]
    fn test_rejects_invalid_inputs() {
        let dup = vec![ChannelConfig::new("sales", 1.0, 1.0)];
        assert!(generate(10, &dup, &[], 0.1, Some(1)).is_err());
        let ok = ChannelConfig::default_channels();
        assert!(generate(10, &ok, &[], -1.0, Some(1)).is_err());
        let bad_period = vec![ConfounderConfig {
            name: "season".into(),
            process: ConfounderProcess::Seasonal { amplitude: 1.0, period: 0.0 },
            spend_effect: 1.0,
            outcome_effect: 1.0,
        }];
        assert!(generate(10, &ok, &bad_period, 0.1, Some(1)).is_err());
    }
}
