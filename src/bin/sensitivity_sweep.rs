//! Sweep one fund parameter over a grid and write headline metrics as CSV
//!
//! fund-sim's single-run pipeline is evaluated once per grid point, in parallel,
//! with the same seed so only the swept parameter changes between rows.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use rayon::prelude::*;
use serde::Serialize;

use fund_simulation::{FundConfig, ParameterVariation, SimulationError};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Parameter {
    InterestRate,
    AppreciationMultiplier,
    DefaultMultiplier,
    AvgExitYear,
    AvgLtv,
    ManagementFeeRate,
    HurdleRate,
}

impl Parameter {
    fn apply(self, base: &FundConfig, value: f64) -> (FundConfig, ParameterVariation) {
        let mut config = base.clone();
        let mut variation = ParameterVariation::default();
        match self {
            Parameter::InterestRate => config.interest_rate = value,
            Parameter::AppreciationMultiplier => variation.appreciation_multiplier = value,
            Parameter::DefaultMultiplier => variation.default_multiplier = value,
            Parameter::AvgExitYear => config.avg_loan_exit_year = value,
            Parameter::AvgLtv => config.avg_loan_ltv = value,
            Parameter::ManagementFeeRate => config.management_fee_rate = value,
            Parameter::HurdleRate => config.hurdle_rate = value,
        }
        (config, variation)
    }
}

#[derive(Parser)]
#[command(name = "sensitivity-sweep", about = "Sweep one fund parameter and record metrics")]
struct Args {
    /// Fund configuration (JSON); defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, value_enum)]
    parameter: Parameter,

    #[arg(long)]
    from: f64,

    #[arg(long)]
    to: f64,

    #[arg(long, default_value_t = 11)]
    steps: usize,

    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    #[arg(short, long, default_value = "sensitivity_sweep.csv")]
    output: PathBuf,
}

#[derive(Serialize)]
struct SweepRow {
    value: f64,
    fund_irr: f64,
    lp_irr: f64,
    gross_irr: f64,
    irr_method: &'static str,
    equity_multiple: f64,
    tvpi: f64,
    max_drawdown: f64,
    defaults: usize,
    error: String,
}

fn grid(from: f64, to: f64, steps: usize) -> Vec<f64> {
    if steps <= 1 {
        return vec![from];
    }
    let step = (to - from) / (steps - 1) as f64;
    (0..steps).map(|i| from + step * i as f64).collect()
}

fn evaluate(base: &FundConfig, parameter: Parameter, value: f64, seed: u64) -> SweepRow {
    let (config, variation) = parameter.apply(base, value);
    match fund_simulation::run(&config, seed, &variation, None) {
        Ok(result) => {
            let m = &result.metrics;
            SweepRow {
                value,
                fund_irr: m.fund_irr.value,
                lp_irr: m.lp_irr.value,
                gross_irr: m.gross_irr(),
                irr_method: m.fund_irr.method.as_str(),
                equity_multiple: m.returns.equity_multiple,
                tvpi: m.ratios.tvpi,
                max_drawdown: m.risk.max_drawdown,
                defaults: result.lifecycle.total_defaults(),
                error: String::new(),
            }
        }
        Err(err) => {
            log::warn!("{:?} = {}: {}", parameter, value, err);
            SweepRow {
                value,
                fund_irr: f64::NAN,
                lp_irr: f64::NAN,
                gross_irr: f64::NAN,
                irr_method: "",
                equity_multiple: f64::NAN,
                tvpi: f64::NAN,
                max_drawdown: f64::NAN,
                defaults: 0,
                error: err.to_string(),
            }
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let base = match &args.config {
        Some(path) => FundConfig::from_json_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => FundConfig::default(),
    };
    if !args.from.is_finite() || !args.to.is_finite() {
        bail!(SimulationError::InvalidConfig {
            field: "grid".to_string(),
            reason: "bounds must be finite".to_string(),
        });
    }

    let start = Instant::now();
    let values = grid(args.from, args.to, args.steps);
    println!("Sweeping {:?} over {} points...", args.parameter, values.len());

    let rows: Vec<SweepRow> = values
        .par_iter()
        .map(|&value| evaluate(&base, args.parameter, value, args.seed))
        .collect();

    let mut writer = csv::Writer::from_path(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    let failed = rows.iter().filter(|r| !r.error.is_empty()).count();
    println!("Output written to {} ({} failed points)", args.output.display(), failed);
    println!("Total time: {:?}", start.elapsed());
    Ok(())
}
