use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use cw_inference::AnalysisConfig;

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_causeway"))
}

fn tmp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("causeway_cli_{}_{}_{}", std::process::id(), nanos, name));
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn stdout_json(out: &Output) -> serde_json::Value {
    assert!(out.status.success(), "command failed, stderr={}", String::from_utf8_lossy(&out.stderr));
    serde_json::from_slice(&out.stdout).expect("stdout should be JSON")
}

fn generated_dataset(name: &str, extra: &[&str]) -> PathBuf {
    let path = tmp_path(name);
    let mut args = vec!["generate", "--rows", "400", "--seed", "42", "--output", path.to_str().unwrap()];
    args.extend_from_slice(extra);
    let out = run(&args);
    assert!(out.status.success(), "generate failed, stderr={}", String::from_utf8_lossy(&out.stderr));
    path
}

const VARS: [&str; 8] =
    ["--treatment", "social", "--outcome", "sales", "--confounder", "seasonality", "--confounder", "price"];

#[test]
fn version_prints_crate_version() {
    let out = run(&["version"]);
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.starts_with("causeway "), "{text}");
    assert!(text.contains(cw_inference::VERSION));
}

#[test]
fn generate_is_deterministic_with_seed() {
    let a = stdout_json(&run(&["generate", "--rows", "50", "--seed", "9"]));
    let b = stdout_json(&run(&["generate", "--rows", "50", "--seed", "9"]));
    assert_eq!(a, b);
    let rows = a.as_array().unwrap();
    assert_eq!(rows.len(), 50);
    let first = rows[0].as_object().unwrap();
    for key in ["tv", "search", "social", "display", "email", "seasonality", "price", "sales"] {
        assert!(first.contains_key(key), "missing {key}");
    }
}

#[test]
fn generate_rejects_unknown_channel() {
    let out = run(&["generate", "--rows", "10", "--sensitivity", "radio=1.0"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("radio"));
}

#[test]
fn graph_renders_json_and_dot() {
    let mut args = vec!["graph"];
    args.extend_from_slice(&VARS);
    let graph = stdout_json(&run(&args));
    assert_eq!(graph["treatment"], "social");
    assert_eq!(graph["edges"].as_array().unwrap().len(), 5);

    args.extend_from_slice(&["--format", "dot"]);
    let out = run(&args);
    assert!(out.status.success());
    let dot = String::from_utf8_lossy(&out.stdout);
    assert!(dot.contains("\"social\" -> \"sales\""), "{dot}");
}

#[test]
fn estimate_reports_every_requested_method() {
    let data = generated_dataset("estimate.json", &[]);
    let mut args = vec!["estimate", "--data", data.to_str().unwrap()];
    args.extend_from_slice(&VARS);
    args.extend_from_slice(&["--method", "linear_regression,ipw"]);
    let report = stdout_json(&run(&args));
    let _ = std::fs::remove_file(&data);

    let table = &report["comparison"];
    assert_eq!(table["requested"], 2);
    let rows = table["rows"].as_array().unwrap();
    assert_eq!(rows[0]["method"], "linear_regression");
    assert_eq!(rows[1]["method"], "propensity_score_weighting");
    let ate = rows[0]["estimate"]["ate"].as_f64().unwrap();
    assert!((ate - 0.8).abs() < 0.3, "ate={ate}");
}

#[test]
fn estimate_logs_method_diagnostics() {
    let path = tmp_path("small.json");
    let generated = run(&["generate", "--rows", "30", "--seed", "3", "--output", path.to_str().unwrap()]);
    assert!(generated.status.success(), "generate failed, stderr={}", String::from_utf8_lossy(&generated.stderr));

    let mut args = vec!["estimate", "--data", path.to_str().unwrap()];
    args.extend_from_slice(&VARS);
    args.extend_from_slice(&["--method", "linear_regression"]);
    let out = run(&args);
    let _ = std::fs::remove_file(&path);
    let report = stdout_json(&out);
    let warnings = report["comparison"]["rows"][0]["estimate"]["warnings"].as_array().unwrap();
    assert!(warnings.iter().any(|w| w["category"] == "sample_size"));

    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("sample_size") && stderr.contains("residual degrees of freedom"), "{stderr}");
}

#[test]
fn estimate_rejects_renamed_outcome() {
    let data = generated_dataset("renamed.json", &[]);
    let json = std::fs::read_to_string(&data).unwrap();
    let mut rows: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
    for row in &mut rows {
        let sales = row["sales"].clone();
        row.as_object_mut().unwrap().insert("revenue".into(), sales);
    }
    std::fs::write(&data, serde_json::to_string(&rows).unwrap()).unwrap();

    let out = run(&[
        "estimate",
        "--data",
        data.to_str().unwrap(),
        "--treatment",
        "social",
        "--outcome",
        "sales",
        "--confounder",
        "seasonality,revenue",
    ]);
    let _ = std::fs::remove_file(&data);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("invalid model") && stderr.contains("revenue"), "{stderr}");
}

#[test]
fn refute_bootstrap_reports_interval() {
    let data = generated_dataset("refute.json", &[]);
    let mut args = vec!["refute", "--data", data.to_str().unwrap()];
    args.extend_from_slice(&VARS);
    args.extend_from_slice(&["--test", "bootstrap", "--simulations", "30", "--seed", "5"]);
    let out = stdout_json(&run(&args));
    let _ = std::fs::remove_file(&data);

    let r = &out["refutation"];
    assert_eq!(r["test"], "bootstrap");
    assert_eq!(r["simulations_run"], 30);
    assert_eq!(r["sample_size"], 320);
    assert!(r["passed"].is_boolean());
    assert!(r["empirical_ci"].is_array());
    assert!(out["interpretation"].as_str().unwrap().contains("bootstrap"));
}

#[test]
fn config_template_round_trips_and_runs() {
    let template = run(&["config-template"]);
    assert!(template.status.success());
    let mut cfg = AnalysisConfig::from_json(&String::from_utf8_lossy(&template.stdout)).unwrap();
    assert_eq!(cfg, AnalysisConfig::template());

    if let Some(s) = cfg.synthetic.as_mut() {
        s.n_rows = 300;
    }
    cfg.estimator_options.bootstrap_samples = 20;
    for spec in &mut cfg.refutations {
        spec.params.num_simulations = Some(5);
    }
    let cfg_path = tmp_path("config.json");
    cfg.save(&cfg_path).unwrap();
    let out_path = tmp_path("report.json");
    let out = run(&["run", "--config", cfg_path.to_str().unwrap(), "--output", out_path.to_str().unwrap()]);
    assert!(out.status.success(), "run failed, stderr={}", String::from_utf8_lossy(&out.stderr));

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
    let _ = std::fs::remove_file(&cfg_path);
    let _ = std::fs::remove_file(&out_path);
    assert_eq!(report["n_rows"], 300);
    assert_eq!(report["comparison"]["requested"], 4);
    assert_eq!(report["robustness"]["requested"], 16);
}

#[test]
fn unknown_method_is_a_usage_error() {
    let out = run(&["estimate", "--data", "x.json", "--treatment", "a", "--outcome", "b", "--method", "lasso"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("lasso"));
}
