//! Fund Simulation CLI
//!
//! ```bash
//! # Single run with a JSON report and per-period snapshot CSV
//! fund-sim simulate --config fund.json --seed 42 --output report.json --snapshots snapshots.csv
//!
//! # Monte Carlo batch
//! fund-sim monte-carlo --config fund.json --simulations 1000 --seed 42 --output mc.json
//! ```

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;

use fund_simulation::metrics::PerformanceMetrics;
use fund_simulation::portfolio::PortfolioMetrics;
use fund_simulation::{
    FundConfig, MonteCarloConfig, MonteCarloResult, MonteCarloRunner, ParameterVariation, SimulationResult,
    SuburbDataset, ZoneDataSource,
};

/// Fund Simulation - lifecycle and performance analytics for lending funds
#[derive(Parser)]
#[command(name = "fund-sim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Optional suburb reference dataset (CSV)
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one simulation and report its metrics
    Simulate {
        /// Fund configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Random seed; defaults to the configuration's seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Write the JSON report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write per-period snapshot metrics as CSV
        #[arg(long)]
        snapshots: Option<PathBuf>,

        /// Write the cash-flow ledger as CSV
        #[arg(long)]
        cash_flows: Option<PathBuf>,
    },

    /// Run a Monte Carlo batch over parameter variations
    MonteCarlo {
        /// Fund configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Monte Carlo settings (JSON); command-line values override it
        #[arg(long)]
        settings: Option<PathBuf>,

        #[arg(short = 'n', long)]
        simulations: Option<usize>,

        /// Base seed; sample i uses seed + i
        #[arg(short, long)]
        seed: Option<u64>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct SimulationReport<'a> {
    generated_at: DateTime<Utc>,
    fund_name: &'a str,
    seed: u64,
    initial_portfolio: &'a PortfolioMetrics,
    total_exits: usize,
    total_defaults: usize,
    total_reinvested: f64,
    metrics: &'a PerformanceMetrics,
}

#[derive(Serialize)]
struct MonteCarloReport<'a> {
    generated_at: DateTime<Utc>,
    fund_name: &'a str,
    settings: &'a MonteCarloConfig,
    elapsed_seconds: f64,
    result: &'a MonteCarloResult,
}

/// Flat per-period row for the snapshot CSV
#[derive(Serialize)]
struct SnapshotRow {
    period: u32,
    active_count: usize,
    active_amount: f64,
    exited_count: usize,
    exited_amount: f64,
    new_deployment_count: usize,
    new_reinvestment_count: usize,
    new_reinvestment_amount: f64,
    default_count: usize,
    interest_income: f64,
    appreciation_income: f64,
    exit_value: f64,
    reinvestment_capital: f64,
    portfolio_value: f64,
    zone_drift: f64,
}

fn load_dataset(path: Option<&Path>) -> Result<Option<SuburbDataset>> {
    path.map(|p| SuburbDataset::load_from(p).with_context(|| format!("loading dataset {}", p.display())))
        .transpose()
}

fn load_config(path: &Path) -> Result<FundConfig> {
    FundConfig::from_json_file(path).with_context(|| format!("loading fund config {}", path.display()))
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            serde_json::to_writer_pretty(BufWriter::new(file), value)?;
            println!("Report written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn write_snapshots(result: &SimulationResult, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for (period, snapshot) in &result.lifecycle.snapshots {
        let m = &snapshot.metrics;
        writer.serialize(SnapshotRow {
            period: *period,
            active_count: m.active_count,
            active_amount: m.active_amount,
            exited_count: m.exited_count,
            exited_amount: m.exited_amount,
            new_deployment_count: m.new_deployment_count,
            new_reinvestment_count: m.new_reinvestment_count,
            new_reinvestment_amount: m.new_reinvestment_amount,
            default_count: m.default_count,
            interest_income: m.interest_income,
            appreciation_income: m.appreciation_income,
            exit_value: m.exit_value,
            reinvestment_capital: m.reinvestment_capital,
            portfolio_value: m.portfolio_value,
            zone_drift: m.total_drift(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn write_cash_flows(result: &SimulationResult, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for row in result.ledger.rows.values() {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn simulate(
    config_path: &Path,
    seed: Option<u64>,
    dataset: Option<&dyn ZoneDataSource>,
    output: Option<&Path>,
    snapshots: Option<&Path>,
    cash_flows: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let seed = seed.or(config.seed).unwrap_or(42);

    let start = Instant::now();
    let result = fund_simulation::run(&config, seed, &ParameterVariation::default(), dataset)?;
    log::info!("Simulation complete in {:?}", start.elapsed());

    let metrics = &result.metrics;
    println!("Fund: {}", config.name);
    println!("  Loans:          {}", result.initial_portfolio.loan_count);
    println!("  Fund IRR:       {:.2}% ({})", metrics.fund_irr.value * 100.0, metrics.fund_irr.method.as_str());
    println!("  LP IRR:         {:.2}%", metrics.lp_irr.value * 100.0);
    println!("  Gross IRR:      {:.2}%", metrics.gross_irr() * 100.0);
    println!("  Equity multiple {:.3}x", metrics.returns.equity_multiple);
    println!("  TVPI:           {:.3}x", metrics.ratios.tvpi);
    println!();

    if let Some(path) = snapshots {
        write_snapshots(&result, path)?;
        println!("Snapshots written to {}", path.display());
    }
    if let Some(path) = cash_flows {
        write_cash_flows(&result, path)?;
        println!("Cash flows written to {}", path.display());
    }

    let report = SimulationReport {
        generated_at: Utc::now(),
        fund_name: &config.name,
        seed,
        initial_portfolio: &result.initial_portfolio,
        total_exits: result.lifecycle.total_exits(),
        total_defaults: result.lifecycle.total_defaults(),
        total_reinvested: result.lifecycle.total_reinvested(),
        metrics: &result.metrics,
    };
    write_json(&report, output)
}

fn monte_carlo(
    config_path: &Path,
    settings_path: Option<&Path>,
    simulations: Option<usize>,
    seed: Option<u64>,
    dataset: Option<&dyn ZoneDataSource>,
    output: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mut settings = match settings_path {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            serde_json::from_reader::<_, MonteCarloConfig>(file)?
        }
        None => MonteCarloConfig::default(),
    };
    if let Some(n) = simulations {
        settings.num_simulations = n;
    }
    if let Some(seed) = seed {
        settings.base_seed = seed;
    }

    let start = Instant::now();
    let mut runner = MonteCarloRunner::new(config.clone(), settings.clone())?;
    if let Some(dataset) = dataset {
        runner = runner.with_dataset(dataset);
    }
    let result = runner.run();
    let elapsed = start.elapsed();

    println!("Monte Carlo: {} of {} samples succeeded in {:?}", result.successful, result.num_simulations, elapsed);
    println!(
        "  Fund IRR P5/P50/P95: {:.2}% / {:.2}% / {:.2}%",
        result.fund_irr.p5 * 100.0,
        result.fund_irr.p50 * 100.0,
        result.fund_irr.p95 * 100.0
    );
    println!("  P(IRR < 0):          {:.1}%", result.probability_negative_irr * 100.0);
    println!();

    let report = MonteCarloReport {
        generated_at: Utc::now(),
        fund_name: &config.name,
        settings: &settings,
        elapsed_seconds: elapsed.as_secs_f64(),
        result: &result,
    };
    write_json(&report, output)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let dataset = load_dataset(cli.dataset.as_deref())?;
    let dataset_ref = dataset.as_ref().map(|d| d as &dyn ZoneDataSource);

    match cli.command {
        Commands::Simulate {
            config,
            seed,
            output,
            snapshots,
            cash_flows,
        } => simulate(
            &config,
            seed,
            dataset_ref,
            output.as_deref(),
            snapshots.as_deref(),
            cash_flows.as_deref(),
        ),
        Commands::MonteCarlo {
            config,
            settings,
            simulations,
            seed,
            output,
        } => monte_carlo(&config, settings.as_deref(), simulations, seed, dataset_ref, output.as_deref()),
    }
}
