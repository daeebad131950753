//! TradeLab CLI — run backtests from a TOML config over local CSV data.
//!
//! Commands:
//! - `run` — execute a simulation from a TOML config file and print a summary
//!
//! The config names an account, a fee model, a date range, an allocation mode
//! and one strategy spec per instrument; price data comes from
//! `<data_dir>/<SYMBOL>.csv`. No network access.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tradelab_core::data::{load_records, MemoryPriceSource};
use tradelab_core::domain::{Account, InstrumentId};
use tradelab_core::engine::{
    DistributedAllocation, ImmediateAllocation, RunReport, SimContext, Simulation,
};
use tradelab_core::fees::FeeModel;
use tradelab_core::pricing::WorstCasePriceLogic;
use tradelab_core::strategy::StrategySpec;

#[derive(Parser)]
#[command(name = "tradelab", about = "TradeLab CLI — deterministic backtesting engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a simulation from a TOML config file.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Output directory for the report and ledger JSON.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,

        /// Skip writing artifacts; print the summary only.
        #[arg(long, default_value_t = false)]
        no_artifacts: bool,
    },
}

/// Top-level run configuration. Dates are quoted ISO strings.
#[derive(Debug, Deserialize)]
struct RunConfig {
    account: AccountConfig,
    run: RunSection,
    #[serde(default)]
    strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Deserialize)]
struct AccountConfig {
    #[serde(default = "default_account_id")]
    id: String,
    initial_cash: f64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    margin: bool,
    /// Defaults to the run start date.
    #[serde(default)]
    opened: Option<NaiveDate>,
    #[serde(default)]
    closed: Option<NaiveDate>,
    #[serde(default)]
    fees: FeeModel,
}

#[derive(Debug, Deserialize)]
struct RunSection {
    start: NaiveDate,
    end: NaiveDate,
    #[serde(default)]
    settlement_delay_days: i64,
    /// `immediate` or `distributed`.
    #[serde(default = "default_allocation")]
    allocation: String,
    data_dir: PathBuf,
    #[serde(default)]
    liquidate_discontinued: bool,
    /// Fill buys at the high and sells at the low instead of the close.
    #[serde(default)]
    worst_case_pricing: bool,
}

#[derive(Debug, Deserialize)]
struct StrategyConfig {
    symbol: String,
    #[serde(default)]
    exchange: Option<String>,
    name: String,
    /// Weight under the distributed allocation policy.
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    params: BTreeMap<String, f64>,
}

fn default_account_id() -> String {
    "backtest".to_string()
}

fn default_allocation() -> String {
    "immediate".to_string()
}

impl StrategyConfig {
    fn instrument(&self) -> InstrumentId {
        match &self.exchange {
            Some(exchange) => InstrumentId::with_exchange(&self.symbol, exchange),
            None => InstrumentId::new(&self.symbol),
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            output_dir,
            no_artifacts,
        } => run_cmd(&config, &output_dir, no_artifacts),
    }
}

fn run_cmd(config_path: &Path, output_dir: &Path, no_artifacts: bool) -> Result<()> {
    let raw = std::fs::read_to_string(config_path)
        .with_context(|| format!("reading config {}", config_path.display()))?;
    let config: RunConfig = toml::from_str(&raw)
        .with_context(|| format!("parsing config {}", config_path.display()))?;

    if config.strategies.is_empty() {
        bail!("config declares no [[strategies]]");
    }

    let prices = load_price_source(&config)?;
    let mut ctx = SimContext::new(Arc::new(prices), config.run.settlement_delay_days);
    if config.run.worst_case_pricing {
        ctx = ctx.with_price_logic(Arc::new(WorstCasePriceLogic));
    }

    let mut account = build_account(&config);
    let mut sim = build_simulation(&config, &ctx)?;

    let report = sim.execute(&mut account, config.run.start, config.run.end);
    print_summary(&config, &account, &report);

    if !no_artifacts {
        save_artifacts(&account, &report, output_dir)?;
        println!("Artifacts saved to: {}", output_dir.display());
    }

    Ok(())
}

fn load_price_source(config: &RunConfig) -> Result<MemoryPriceSource> {
    let mut source = MemoryPriceSource::new();
    let mut loaded: Vec<InstrumentId> = Vec::new();

    for strategy in &config.strategies {
        let instrument = strategy.instrument();
        if loaded.contains(&instrument) {
            continue;
        }
        let path = config.run.data_dir.join(format!("{}.csv", strategy.symbol));
        let records = load_records(&path)
            .with_context(|| format!("loading price data for {instrument}"))?;
        source.insert(instrument.clone(), records)?;
        loaded.push(instrument);
    }
    Ok(source)
}

fn build_account(config: &RunConfig) -> Account {
    let opened = config.account.opened.unwrap_or(config.run.start);
    let mut account = Account::new(&config.account.id, opened, config.account.initial_cash)
        .with_fees(config.account.fees.clone())
        .with_margin(config.account.margin);
    if let Some(currency) = &config.account.currency {
        account = account.with_currency(currency);
    }
    if let Some(closed) = config.account.closed {
        account = account.with_close_date(closed);
    }
    account
}

fn build_simulation(config: &RunConfig, ctx: &SimContext) -> Result<Simulation> {
    let mut sim = match config.run.allocation.as_str() {
        "immediate" => Simulation::new(ctx.clone(), Box::new(ImmediateAllocation::new(ctx.clone()))),
        "distributed" => {
            let mut policy = DistributedAllocation::new(ctx.clone());
            for strategy in &config.strategies {
                if let Some(weight) = strategy.weight {
                    let key = tradelab_core::strategy::StrategyKey {
                        name: strategy.name.clone(),
                        instrument: strategy.instrument(),
                    };
                    policy.set_weight(key, weight);
                }
            }
            Simulation::new(ctx.clone(), Box::new(policy))
        }
        other => bail!("unknown allocation mode '{other}'. Valid: immediate, distributed"),
    };
    sim = sim.with_liquidate_discontinued(config.run.liquidate_discontinued);

    for strategy in &config.strategies {
        let instrument = strategy.instrument();
        let mut spec = StrategySpec::new(&strategy.name);
        for (key, value) in &strategy.params {
            spec = spec.with_param(key, *value);
        }
        let series = Simulation::signal_series(ctx, &instrument);
        let built = spec
            .build(instrument.clone(), &series)
            .with_context(|| format!("building strategy '{}' for {instrument}", strategy.name))?;
        sim.add_strategy(built);
    }
    Ok(sim)
}

fn save_artifacts(account: &Account, report: &RunReport, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let report_json = serde_json::to_string_pretty(report)?;
    std::fs::write(output_dir.join("report.json"), report_json)?;

    // Full persisted ledger shape, reloadable via Account::from_json
    std::fs::write(output_dir.join("account.json"), account.to_json()?)?;
    Ok(())
}

fn print_summary(config: &RunConfig, account: &Account, report: &RunReport) {
    println!();
    println!("=== Simulation Result ===");
    println!("Account:         {}", account.id);
    println!("Period:          {} to {}", report.from, report.to);
    println!("Allocation:      {}", config.run.allocation);
    println!("Ticks:           {}", report.ticks);
    println!(
        "Signals:         {} entries, {} exits",
        report.entry_signals, report.exit_signals
    );
    println!("Orders filled:   {}", report.orders_filled);
    println!();
    println!("--- Performance ---");
    println!("Initial Cash:    {:.2}", account.initial_cash);
    println!("Final Cash:      {:.2}", report.final_cash);
    println!("Final Value:     {:.2}", report.final_value);
    println!("Realized:        {:.2}", report.realized_gains);
    println!("Unrealized:      {:.2}", report.unrealized_gains);
    println!("Fees:            {:.2}", report.total_fees);
    println!("Total Profit:    {:.2}", report.total_profit);
    if account.initial_cash > 0.0 {
        println!(
            "Total Return:    {:.2}%",
            report.total_profit / account.initial_cash * 100.0
        );
    }
    println!();
}
