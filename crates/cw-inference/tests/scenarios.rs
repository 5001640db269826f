//! Golden end-to-end scenarios on generated marketing-mix data.

use cw_core::Dataset;
use cw_inference::{
    AnalysisConfig, AnalysisContext, ChannelConfig, ConfounderConfig, EstimatorMethod, RunControl,
    SyntheticConfig, build_graph, estimate, identify,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

fn social_only(n_rows: usize, sensitivity: f64, noise_level: f64, seed: u64) -> SyntheticConfig {
    SyntheticConfig {
        n_rows,
        channels: vec![ChannelConfig::new("social", 20.0, sensitivity)],
        confounders: ConfounderConfig::default_confounders(),
        noise_level,
        seed: Some(seed),
    }
}

#[test]
fn test_social_scenario_recovers_sensitivity() {
    let ds = social_only(500, 0.8, 0.1, 42).generate().unwrap();
    let graph = build_graph("social", "sales", &["seasonality", "price"]).unwrap();
    let estimand = identify(&graph, &[EstimatorMethod::LinearRegression]).unwrap();
    let r = estimate(&ds, &estimand, EstimatorMethod::LinearRegression, 0.95).unwrap();

    assert!((r.ate - 0.8).abs() < 0.1, "ate={}", r.ate);
    assert!(r.ci_lower > 0.0, "CI [{}, {}] should exclude zero", r.ci_lower, r.ci_upper);
    assert!(r.significant);
    assert_eq!(r.n_obs, 500);
}

#[test]
fn test_zero_sensitivity_intervals_cover_zero() {
    let seeds = 100..140u64;
    let runs = (seeds.end - seeds.start) as f64;
    let mut covered = [0usize; 4];
    let mut ate_sum = [0.0f64; 4];
    let mut se_sum = [0.0f64; 4];
    for seed in seeds.clone() {
        let mut cfg = AnalysisConfig::new("social", "sales", &["seasonality", "price"]);
        cfg.synthetic = Some(social_only(500, 0.0, 0.1, seed));
        let ctx = AnalysisContext::from_config(cfg).unwrap();
        let outcomes = ctx.estimate_all().unwrap();
        assert_eq!(outcomes.len(), 4);
        for (k, o) in outcomes.iter().enumerate() {
            let r = o.result.as_ref().unwrap_or_else(|e| panic!("seed {seed} {} failed: {e}", o.method));
            assert_eq!(r.confidence_level, 0.95);
            covered[k] += usize::from(r.ci_contains(0.0));
            ate_sum[k] += r.ate;
            se_sum[k] += r.std_error;
        }
    }
    // 95% intervals; at least 34 of 40 leaves room for sampling noise but not for bias.
    for (k, method) in EstimatorMethod::ALL.iter().enumerate() {
        assert!(covered[k] >= 34, "{method}: zero covered in {} of {runs} runs", covered[k]);
    }
    // The regression-adjusted estimators must also be centred on zero.
    for method in [EstimatorMethod::LinearRegression, EstimatorMethod::PropensityScoreStratification] {
        let k = EstimatorMethod::ALL.iter().position(|m| *m == method).unwrap();
        let (mean_ate, mean_se) = (ate_sum[k] / runs, se_sum[k] / runs);
        assert!(mean_ate.abs() < 0.5 * mean_se, "{method}: mean ate {mean_ate} vs mean se {mean_se}");
    }
}

#[test]
fn test_renamed_outcome_as_confounder_is_rejected_before_estimation() {
    let ds = social_only(200, 0.8, 0.5, 3).generate().unwrap();
    let sales = ds.column("sales").unwrap().to_vec();
    let ds = ds.with_column("revenue", sales).unwrap();

    let cfg = AnalysisConfig::new("social", "sales", &["seasonality", "revenue"]);
    let err = AnalysisContext::new(ds, cfg).unwrap_err();
    assert_eq!(err.kind(), "invalid_model");
    assert!(err.to_string().contains("revenue"), "{err}");
    assert!(err.hint().is_some());
}

#[test]
fn test_declaring_outcome_as_confounder_is_rejected() {
    let ds = social_only(100, 0.8, 0.5, 3).generate().unwrap();
    let cfg = AnalysisConfig::new("social", "sales", &["seasonality", "sales"]);
    assert_eq!(AnalysisContext::new(ds, cfg).unwrap_err().kind(), "invalid_model");
}

#[test]
fn test_propensity_collapse_triggers_positivity_warning() {
    let n = 400;
    let mut rng = StdRng::seed_from_u64(2024);
    let x: Vec<f64> = (0..n).map(|_| StandardNormal.sample(&mut rng)).collect();
    let t: Vec<f64> = x
        .iter()
        .map(|&x| {
            let e: f64 = StandardNormal.sample(&mut rng);
            f64::from(4.0 * x + 0.3 * e > 0.0)
        })
        .collect();
    let y: Vec<f64> = t
        .iter()
        .zip(&x)
        .map(|(&t, &x)| {
            let e: f64 = StandardNormal.sample(&mut rng);
            1.0 + 2.0 * t + x + e
        })
        .collect();
    let ds = Dataset::from_columns(vec![("x".into(), x), ("t".into(), t), ("y".into(), y)]).unwrap();

    let graph = build_graph("t", "y", &["x"]).unwrap();
    let estimand = identify(&graph, &[EstimatorMethod::InverseProbabilityWeighting]).unwrap();
    let r = estimate(&ds, &estimand, EstimatorMethod::InverseProbabilityWeighting, 0.95).unwrap();

    assert!(r.ate.is_finite() && r.std_error.is_finite());
    assert!(r.ci_lower <= r.ate && r.ate <= r.ci_upper);
    assert!(r.has_warning("positivity"), "warnings: {:?}", r.warnings);
}

#[test]
fn test_template_run_produces_complete_report() {
    let mut cfg = AnalysisConfig::template();
    cfg.synthetic = Some(SyntheticConfig { n_rows: 400, ..SyntheticConfig::default() });
    cfg.estimator_options.bootstrap_samples = 30;
    for spec in &mut cfg.refutations {
        spec.params.num_simulations = Some(8);
    }
    let ctx = AnalysisContext::from_config(cfg).unwrap();
    let report = ctx.run(&RunControl::default()).unwrap();

    assert_eq!(report.comparison.requested, 4);
    assert_eq!(report.comparison.succeeded + report.comparison.failed, 4);
    assert_eq!(report.robustness.requested, 16);
    assert_eq!(
        report.robustness.completed + report.robustness.errors,
        report.robustness.requested
    );
    let methods: Vec<_> = report.comparison.rows.iter().map(|r| r.method).collect();
    assert_eq!(methods, EstimatorMethod::ALL);
    assert_eq!(report.graph.edges.len(), 5);
}
