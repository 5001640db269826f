//! Statistical properties of the estimators and refuters.
//!
//! These run many small analyses; all randomness is seeded so the outcomes
//! are fixed.

use cw_inference::{
    AnalysisConfig, AnalysisContext, ChannelConfig, ConfounderConfig, EstimatorMethod,
    RefutationKind, RefutationParams, RunControl, SyntheticConfig, build_graph, estimate, identify,
    refute,
};

fn social_only(n_rows: usize, noise_level: f64, seed: u64) -> SyntheticConfig {
    SyntheticConfig {
        n_rows,
        channels: vec![ChannelConfig::new("social", 20.0, 0.8)],
        confounders: ConfounderConfig::default_confounders(),
        noise_level,
        seed: Some(seed),
    }
}

#[test]
fn test_linear_regression_is_consistent_for_every_channel() {
    let cfg = SyntheticConfig { n_rows: 5000, noise_level: 0.1, seed: Some(17), ..SyntheticConfig::default() };
    let ds = cfg.generate().unwrap();
    for channel in &cfg.channels {
        let graph = build_graph(&channel.name, "sales", &["seasonality", "price"]).unwrap();
        let estimand = identify(&graph, &[EstimatorMethod::LinearRegression]).unwrap();
        let r = estimate(&ds, &estimand, EstimatorMethod::LinearRegression, 0.95).unwrap();
        let truth = cfg.true_effect(&channel.name).unwrap();
        assert!(
            (r.ate - truth).abs() < 0.08,
            "{}: ate={} truth={truth} se={}",
            channel.name,
            r.ate,
            r.std_error
        );
    }
}

#[test]
fn test_estimation_error_shrinks_with_sample_size() {
    let se = |n: usize| {
        let ds = social_only(n, 1.0, 5).generate().unwrap();
        let graph = build_graph("social", "sales", &["seasonality", "price"]).unwrap();
        let estimand = identify(&graph, &[EstimatorMethod::LinearRegression]).unwrap();
        estimate(&ds, &estimand, EstimatorMethod::LinearRegression, 0.95).unwrap().std_error
    };
    let (small, large) = (se(250), se(4000));
    // SE scales like 1/sqrt(n): a 16x larger sample gives roughly a 4x smaller SE.
    assert!(large < small / 2.5, "se(250)={small} se(4000)={large}");
}

#[test]
fn test_every_interval_contains_its_estimate() {
    for seed in 0..5 {
        let mut cfg = AnalysisConfig::new("social", "sales", &["seasonality", "price"]);
        cfg.synthetic = Some(social_only(300, 0.5, seed));
        cfg.estimator_options.bootstrap_samples = 20;
        let ctx = AnalysisContext::from_config(cfg).unwrap();
        for o in ctx.estimate_all().unwrap() {
            if let Ok(r) = o.result {
                assert!(r.ci_lower <= r.ate && r.ate <= r.ci_upper, "seed {seed} {}: {r:?}", o.method);
                assert!(r.std_error >= 0.0);
                assert!((0.0..=1.0).contains(&r.p_value));
            }
        }
    }
}

#[test]
fn test_placebo_false_positive_rate_is_bounded() {
    let graph = build_graph("social", "sales", &["seasonality", "price"]).unwrap();
    let estimand = identify(&graph, &[EstimatorMethod::LinearRegression]).unwrap();
    let trials = 200u64;
    let mut false_positives = 0;
    for seed in 0..trials {
        let ds = social_only(200, 0.5, 1000 + seed).generate().unwrap();
        let fitted = estimate(&ds, &estimand, EstimatorMethod::LinearRegression, 0.95).unwrap();
        let params = RefutationParams::default().with_simulations(20).with_seed(seed);
        let r = refute(&ds, &estimand, &fitted, RefutationKind::PlaceboTreatment, &params).unwrap();
        if !r.passed {
            false_positives += 1;
        }
    }
    let rate = false_positives as f64 / trials as f64;
    assert!(rate < 0.10, "placebo false-positive rate {rate}");
}

#[test]
fn test_bootstrap_interval_matches_analytic_width() {
    let ds = social_only(1000, 1.0, 99).generate().unwrap();
    let graph = build_graph("social", "sales", &["seasonality", "price"]).unwrap();
    let estimand = identify(&graph, &[EstimatorMethod::LinearRegression]).unwrap();
    let fitted = estimate(&ds, &estimand, EstimatorMethod::LinearRegression, 0.95).unwrap();
    let params = RefutationParams::default().with_simulations(400).with_seed(12);
    let r = refute(&ds, &estimand, &fitted, RefutationKind::Bootstrap, &params).unwrap();

    let ratio = r.ci_width_ratio.unwrap();
    assert!((0.75..=1.25).contains(&ratio), "half-width ratio {ratio}");
    let (lo, hi) = r.empirical_ci.unwrap();
    assert!(lo < fitted.ate && fitted.ate < hi);
    assert!(r.passed);
}

#[test]
fn test_stability_refuters_pass_on_a_sound_model() {
    let ds = social_only(500, 0.5, 21).generate().unwrap();
    let graph = build_graph("social", "sales", &["seasonality", "price"]).unwrap();
    let estimand = identify(&graph, &EstimatorMethod::ALL).unwrap();
    let fitted = estimate(&ds, &estimand, EstimatorMethod::LinearRegression, 0.95).unwrap();
    for test in [RefutationKind::RandomCommonCause, RefutationKind::DataSubset] {
        let params = RefutationParams::default().with_simulations(30).with_seed(4);
        let r = refute(&ds, &estimand, &fitted, test, &params).unwrap();
        assert!(r.passed, "{test}: {r:?}");
    }
}

#[test]
fn test_saved_configuration_reproduces_the_analysis() {
    let mut cfg = AnalysisConfig::template()
        .with_methods(&[EstimatorMethod::LinearRegression, EstimatorMethod::InverseProbabilityWeighting]);
    cfg.synthetic = Some(social_only(300, 0.5, 8));
    for spec in &mut cfg.refutations {
        spec.params.num_simulations = Some(6);
    }

    let path = std::env::temp_dir().join(format!("causeway_roundtrip_{}.json", std::process::id()));
    cfg.save(&path).unwrap();
    let loaded = AnalysisConfig::load(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(loaded, cfg);

    let a = AnalysisContext::from_config(cfg).unwrap().run(&RunControl::default()).unwrap();
    let b = AnalysisContext::from_config(loaded).unwrap().run(&RunControl::default()).unwrap();
    assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
}
