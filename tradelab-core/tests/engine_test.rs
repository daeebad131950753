//! End-to-end simulation runs through the public API: strategies, allocation
//! policies, execution and reporting together.

use chrono::NaiveDate;
use tradelab_core::data::MemoryPriceSource;
use tradelab_core::domain::{Account, InstrumentId, PriceRecord, TransactionStatus};
use tradelab_core::engine::{
    project, DistributedAllocation, ImmediateAllocation, RunReport, SimContext, Simulation,
};
use tradelab_core::fees::FeeModel;
use tradelab_core::strategy::{BuyAndHold, StrategySpec, TradingStrategy};
use std::sync::Arc;

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

fn record(d: u32, close: f64) -> PriceRecord {
    PriceRecord {
        date: date(d),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1_000,
        adjustment: 1.0,
    }
}

fn series(closes: &[(u32, f64)]) -> Vec<PriceRecord> {
    closes.iter().map(|&(d, c)| record(d, c)).collect()
}

fn ctx_for(data: &[(&str, Vec<PriceRecord>)], delay: i64) -> SimContext {
    let mut source = MemoryPriceSource::new();
    for (ticker, records) in data {
        source
            .insert(InstrumentId::new(*ticker), records.clone())
            .unwrap();
    }
    SimContext::new(Arc::new(source), delay)
}

#[test]
fn sma_cross_with_fees_round_trips() {
    let spy = series(&[
        (2, 10.0),
        (3, 10.0),
        (4, 10.0),
        (5, 13.0),
        (8, 13.0),
        (9, 7.0),
        (10, 7.0),
        (11, 7.0),
    ]);
    let ctx = ctx_for(&[("SPY", spy)], 1);
    let signal = Simulation::signal_series(&ctx, &InstrumentId::new("SPY"));
    let strategy = StrategySpec::new("sma_cross")
        .with_param("period", 3.0)
        .build(InstrumentId::new("SPY"), &signal)
        .unwrap();

    let policy = ImmediateAllocation::new(ctx.clone());
    let mut sim = Simulation::new(ctx.clone(), Box::new(policy));
    sim.add_strategy(strategy);

    let mut account = Account::new("sma", date(2), 1_000.0)
        .with_fees(FeeModel::PerTrade { amount: 1.0 });
    let report = sim.execute(&mut account, date(2), date(11));

    assert_eq!(report.entry_signals, 1);
    assert!(report.exit_signals >= 1);
    assert!(report.orders_filled >= 2);
    // Round trip ends flat
    assert_eq!(account.quantity_of(&InstrumentId::new("SPY")), 0.0);
    // Two fills at one currency unit each
    let fees: f64 = account.transactions().iter().map(|t| t.fees).sum();
    assert_eq!(fees, 2.0);
}

#[test]
fn deferred_weights_shape_the_allocation() {
    let data = [
        ("AAA", series(&[(2, 100.0), (3, 100.0), (4, 100.0)])),
        ("BBB", series(&[(2, 100.0), (3, 100.0), (4, 100.0)])),
    ];
    let ctx = ctx_for(&data, 0);
    let mut policy = DistributedAllocation::new(ctx.clone());
    let aaa = BuyAndHold::new(InstrumentId::new("AAA"));
    let bbb = BuyAndHold::new(InstrumentId::new("BBB"));
    policy.set_weight(aaa.key(), 3.0);
    policy.set_weight(bbb.key(), 1.0);

    let mut sim = Simulation::new(ctx, Box::new(policy));
    sim.add_strategy(Box::new(aaa));
    sim.add_strategy(Box::new(bbb));

    let mut account = Account::new("weighted", date(2), 10_000.0);
    sim.execute(&mut account, date(2), date(4));

    // 3:1 split of 10,000 at price 100
    assert!((account.quantity_of(&InstrumentId::new("AAA")) - 75.0).abs() < 1e-9);
    assert!((account.quantity_of(&InstrumentId::new("BBB")) - 25.0).abs() < 1e-9);
}

#[test]
fn trading_stops_at_the_account_close_date() {
    let spy = series(&[(2, 100.0), (3, 100.0), (8, 100.0), (9, 100.0)]);
    let ctx = ctx_for(&[("SPY", spy)], 1);
    let policy = ImmediateAllocation::new(ctx.clone());
    let mut sim = Simulation::new(ctx, Box::new(policy));
    sim.add_strategy(Box::new(BuyAndHold::new(InstrumentId::new("SPY"))));

    // Entry signal on the 2nd; settlement delay pushes the earliest fill to
    // the 3rd, but the account closes on the 2nd.
    let mut account = Account::new("closed", date(2), 10_000.0).with_close_date(date(2));
    sim.execute(&mut account, date(2), date(9));

    let unfilled = account
        .transactions()
        .iter()
        .filter(|t| !t.is_cash_transfer())
        .all(|t| t.status == TransactionStatus::Planned);
    assert!(unfilled);
}

#[test]
fn report_serializes_for_downstream_tooling() {
    let spy = series(&[(2, 100.0), (3, 101.0), (4, 102.0)]);
    let ctx = ctx_for(&[("SPY", spy)], 1);
    let policy = ImmediateAllocation::new(ctx.clone());
    let mut sim = Simulation::new(ctx, Box::new(policy));
    sim.add_strategy(Box::new(BuyAndHold::new(InstrumentId::new("SPY"))));

    let mut account = Account::new("report", date(2), 10_000.0);
    let report = sim.execute(&mut account, date(2), date(4));

    let json = serde_json::to_string(&report).unwrap();
    let restored: RunReport = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.ticks, report.ticks);
    assert_eq!(restored.final_value, report.final_value);
}

#[test]
fn rerunning_settlement_adds_no_transactions() {
    let spy = series(&[(2, 100.0), (3, 101.0), (4, 102.0)]);
    let ctx = ctx_for(&[("SPY", spy)], 1);
    let policy = ImmediateAllocation::new(ctx.clone());
    let mut sim = Simulation::new(ctx.clone(), Box::new(policy));
    sim.add_strategy(Box::new(BuyAndHold::new(InstrumentId::new("SPY"))));

    let mut account = Account::new("idem", date(2), 10_000.0);
    sim.execute(&mut account, date(2), date(4));
    let count = account.transactions().len();

    // A second full pass finds every signal already positioned and every
    // order terminal.
    sim.execute(&mut account, date(2), date(4));
    assert_eq!(account.transactions().len(), count);
}

#[test]
fn projection_after_run_matches_report() {
    let spy = series(&[(2, 100.0), (3, 104.0), (4, 99.0), (5, 107.0)]);
    let ctx = ctx_for(&[("SPY", spy)], 1);
    let policy = ImmediateAllocation::new(ctx.clone());
    let mut sim = Simulation::new(ctx.clone(), Box::new(policy));
    sim.add_strategy(Box::new(BuyAndHold::new(InstrumentId::new("SPY"))));

    let mut account = Account::new("proj", date(2), 10_000.0);
    let report = sim.execute(&mut account, date(2), date(5));

    let portfolio = project(&account, date(5), ctx.prices.as_ref());
    assert!((portfolio.total_profit() - report.total_profit).abs() < 1e-9);
    assert!(
        (portfolio.total_value(account.cash_at(date(5))) - report.final_value).abs() < 1e-9
    );
}
