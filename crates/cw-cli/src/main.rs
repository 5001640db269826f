//! Causeway CLI

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use cw_core::Dataset;
use cw_inference::{
    AnalysisConfig, AnalysisContext, ChannelConfig, ComparisonTable, EstimatorMethod, PlaceboType,
    RefutationKind, RefutationParams, RunControl, Severity, SyntheticConfig, aggregate_estimates,
    build_graph, collect_warnings, estimate_with, interpret_estimate, interpret_refutation,
    refute_with,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "causeway")]
#[command(about = "Causeway - causal effect estimation and robustness checks")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

/// Variable declaration shared by the analysis commands.
#[derive(Args)]
struct Variables {
    /// Treatment column (e.g. channel spend)
    #[arg(short, long)]
    treatment: String,

    /// Outcome column
    #[arg(short = 'y', long)]
    outcome: String,

    /// Confounder columns (repeat or comma-separate)
    #[arg(short, long = "confounder", value_delimiter = ',')]
    confounders: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic marketing-mix dataset (JSON records)
    Generate {
        /// Number of rows
        #[arg(long, default_value = "500")]
        rows: usize,

        /// Outcome noise scale
        #[arg(long, default_value = "0.5")]
        noise: f64,

        /// RNG seed. Omit for fresh entropy on every call.
        #[arg(long)]
        seed: Option<u64>,

        /// Override a channel's sensitivity: NAME=VALUE (repeatable)
        #[arg(long = "sensitivity", value_parser = parse_sensitivity)]
        sensitivities: Vec<(String, f64)>,

        /// Take the generator settings from a configuration's synthetic section
        #[arg(long, conflicts_with_all = ["rows", "noise", "seed", "sensitivities"])]
        config: Option<PathBuf>,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build and print the causal graph
    Graph {
        #[command(flatten)]
        vars: Variables,

        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        format: GraphFormat,

        /// Output file. Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Estimate the ATE with one or more methods
    Estimate {
        /// Dataset (JSON array of records)
        #[arg(short, long)]
        data: PathBuf,

        #[command(flatten)]
        vars: Variables,

        /// Methods to run (default: all)
        #[arg(short, long = "method", value_delimiter = ',')]
        methods: Vec<EstimatorMethod>,

        /// Confidence level
        #[arg(long, default_value = "0.95")]
        confidence: f64,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Estimate with one method, then run a refutation test against it
    Refute {
        /// Dataset (JSON array of records)
        #[arg(short, long)]
        data: PathBuf,

        #[command(flatten)]
        vars: Variables,

        /// Method whose estimate is refuted
        #[arg(short, long, default_value = "linear_regression")]
        method: EstimatorMethod,

        /// Refutation test
        #[arg(long)]
        test: RefutationKind,

        /// Simulations (default depends on the test)
        #[arg(long)]
        simulations: Option<usize>,

        /// Fraction of rows per subset (data_subset)
        #[arg(long, default_value = "0.8")]
        subset_fraction: f64,

        /// Rows per resample (bootstrap; default: 80% of the rows, at most all of them)
        #[arg(long)]
        sample_size: Option<usize>,

        /// Placebo draw (placebo_treatment)
        #[arg(long, value_enum, default_value = "random-noise")]
        placebo: PlaceboArg,

        /// Allowed drift in standard errors
        #[arg(long, default_value = "1.0")]
        tolerance: f64,

        /// Base seed. Omit for fresh entropy.
        #[arg(long)]
        seed: Option<u64>,

        /// Confidence level
        #[arg(long, default_value = "0.95")]
        confidence: f64,

        /// Simulation worker threads (0 = auto)
        #[arg(long, default_value = "0")]
        workers: usize,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a full analysis from a configuration file
    Run {
        /// Analysis configuration (JSON, see `config-template`)
        #[arg(long)]
        config: PathBuf,

        /// Dataset (JSON array of records). Defaults to the configuration's synthetic section.
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Output file for the report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Print a complete example configuration
    ConfigTemplate {
        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
enum GraphFormat {
    Json,
    Dot,
}

#[derive(Clone, Copy, ValueEnum)]
enum PlaceboArg {
    RandomNoise,
    Permute,
}

impl From<PlaceboArg> for PlaceboType {
    fn from(p: PlaceboArg) -> Self {
        match p {
            PlaceboArg::RandomNoise => PlaceboType::RandomNoise,
            PlaceboArg::Permute => PlaceboType::Permute,
        }
    }
}

fn parse_sensitivity(s: &str) -> std::result::Result<(String, f64), String> {
    let (name, value) = s.split_once('=').ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    let value: f64 = value.trim().parse().map_err(|e| format!("bad sensitivity '{value}': {e}"))?;
    Ok((name.trim().to_string(), value))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Generate { rows, noise, seed, sensitivities, config, output } => {
            cmd_generate(rows, noise, seed, &sensitivities, config.as_ref(), output.as_ref())
        }
        Commands::Graph { vars, format, output } => cmd_graph(&vars, format, output.as_ref()),
        Commands::Estimate { data, vars, methods, confidence, output, threads } => {
            cmd_estimate(&data, &vars, &methods, confidence, output.as_ref(), threads)
        }
        Commands::Refute {
            data,
            vars,
            method,
            test,
            simulations,
            subset_fraction,
            sample_size,
            placebo,
            tolerance,
            seed,
            confidence,
            workers,
            output,
        } => {
            let params = RefutationParams {
                num_simulations: simulations,
                subset_fraction,
                sample_size,
                placebo_type: placebo.into(),
                tolerance,
                seed,
                workers,
            };
            cmd_refute(&data, &vars, method, test, &params, confidence, output.as_ref())
        }
        Commands::Run { config, data, output, threads } => {
            cmd_run(&config, data.as_ref(), output.as_ref(), threads)
        }
        Commands::ConfigTemplate { output } => {
            write_json(output.as_ref(), serde_json::to_value(AnalysisConfig::template())?)
        }
        Commands::Version => {
            println!("causeway {}", cw_inference::VERSION);
            Ok(())
        }
    }
}

fn cmd_generate(
    rows: usize,
    noise: f64,
    seed: Option<u64>,
    sensitivities: &[(String, f64)],
    config: Option<&PathBuf>,
    output: Option<&PathBuf>,
) -> Result<()> {
    let synthetic = match config {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?
            .synthetic
            .context("configuration has no synthetic section")?,
        None => {
            let mut channels = ChannelConfig::default_channels();
            for (name, value) in sensitivities {
                match channels.iter_mut().find(|c| &c.name == name) {
                    Some(ch) => ch.sensitivity = *value,
                    None => bail!("unknown channel '{name}'"),
                }
            }
            SyntheticConfig { n_rows: rows, channels, noise_level: noise, seed, ..SyntheticConfig::default() }
        }
    };
    let dataset = synthetic.generate()?;
    tracing::info!(rows = dataset.n_rows(), columns = dataset.n_columns(), "generated dataset");
    write_json(output, serde_json::Value::Array(dataset.to_json_records()))
}

fn cmd_graph(vars: &Variables, format: GraphFormat, output: Option<&PathBuf>) -> Result<()> {
    let graph = build_graph(&vars.treatment, &vars.outcome, vars.confounders.as_slice())?;
    match format {
        GraphFormat::Json => write_json(output, serde_json::to_value(graph.export())?),
        GraphFormat::Dot => write_text(output, &graph.to_dot()),
    }
}

fn cmd_estimate(
    data: &PathBuf,
    vars: &Variables,
    methods: &[EstimatorMethod],
    confidence: f64,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    setup_threads(threads);
    let dataset = load_dataset(data)?;
    let mut config = AnalysisConfig::new(&vars.treatment, &vars.outcome, vars.confounders.as_slice());
    if !methods.is_empty() {
        config.methods = methods.to_vec();
    }
    config.confidence_level = confidence;
    let ctx = AnalysisContext::new(dataset, config)?;

    let table = aggregate_estimates(&ctx.estimate_all()?);
    tracing::info!(summary = %table.headline(), "estimation complete");
    log_diagnostics(&table);

    let output_json = serde_json::json!({
        "estimand": ctx.estimand(),
        "expression": ctx.estimand().expression(),
        "comparison": table,
    });
    write_json(output, output_json)
}

fn cmd_refute(
    data: &PathBuf,
    vars: &Variables,
    method: EstimatorMethod,
    test: RefutationKind,
    params: &RefutationParams,
    confidence: f64,
    output: Option<&PathBuf>,
) -> Result<()> {
    let mut config = AnalysisConfig::new(&vars.treatment, &vars.outcome, vars.confounders.as_slice())
        .with_methods(&[method]);
    config.confidence_level = confidence;
    config.estimator_options.seed = params.seed.unwrap_or_default();
    let ctx = AnalysisContext::new(load_dataset(data)?, config)?;

    let options = &ctx.config().estimator_options;
    let fitted = estimate_with(ctx.dataset(), ctx.estimand(), method, confidence, options)?;
    let control = RunControl::new().with_progress(|p| {
        tracing::debug!(test = p.test.id(), completed = p.completed, total = p.total, "progress");
    });
    let refutation = refute_with(ctx.dataset(), ctx.estimand(), &fitted, test, params, &control)?;
    tracing::info!(test = test.id(), passed = refutation.passed, "refutation finished");

    let output_json = serde_json::json!({
        "estimate": fitted.without_fit(),
        "estimate_interpretation": interpret_estimate(&fitted, &vars.treatment, &vars.outcome),
        "refutation": refutation,
        "interpretation": interpret_refutation(&refutation),
    });
    write_json(output, output_json)
}

fn cmd_run(
    config: &PathBuf,
    data: Option<&PathBuf>,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    setup_threads(threads);
    tracing::info!(path = %config.display(), "loading configuration");
    let config = AnalysisConfig::load(config).with_context(|| format!("loading {}", config.display()))?;
    let ctx = match data {
        Some(path) => AnalysisContext::new(load_dataset(path)?, config)?,
        None => AnalysisContext::from_config(config)?,
    };
    let control = RunControl::new().with_progress(|p| {
        if p.completed == p.total {
            tracing::info!(test = p.test.id(), simulations = p.total, "simulations finished");
        }
    });
    let report = ctx.run(&control)?;
    log_diagnostics(&report.comparison);
    write_json(output, serde_json::to_value(&report)?)
}

fn log_diagnostics(table: &ComparisonTable) {
    for (method, d) in collect_warnings(table) {
        if d.severity != Severity::Info {
            tracing::warn!(method = method.id(), category = %d.category, "{}", d.message);
        }
    }
}

fn setup_threads(threads: usize) {
    if threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }
}

fn load_dataset(path: &PathBuf) -> Result<Dataset> {
    tracing::info!(path = %path.display(), "loading dataset");
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let dataset = Dataset::from_json_str(&json)?;
    tracing::info!(rows = dataset.n_rows(), columns = dataset.n_columns(), "dataset loaded");
    Ok(dataset)
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    write_text(output, &serde_json::to_string_pretty(&value)?)
}

fn write_text(output: Option<&PathBuf>, text: &str) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, text)?;
    } else {
        println!("{text}");
    }
    Ok(())
}
