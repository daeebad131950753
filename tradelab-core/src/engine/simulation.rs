//! The simulation loop — merges per-instrument price series into one global
//! tick stream and drives strategies, allocation and execution through it.

use super::allocation::AllocationPolicy;
use super::context::SimContext;
use super::execution::OrderExecutionEngine;
use super::projector::project;
use crate::domain::{Account, InstrumentId, PriceRecord, Transaction};
use crate::strategy::TradingStrategy;
use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One strategy/record pairing in the merged stream. `index` addresses the
/// strategy's own valid-record series, which is also the index space its
/// signals are evaluated in.
#[derive(Debug, Clone, Copy)]
struct Tick {
    date: NaiveDate,
    strategy: usize,
    index: usize,
}

/// Summary of a completed run, for reporting and regression comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub ticks: usize,
    /// Entry signals evaluated in range, whether or not the allocation
    /// policy turned them into a transaction.
    pub entry_signals: usize,
    /// Exit signals evaluated in range, including forced liquidations.
    pub exit_signals: usize,
    pub orders_filled: usize,
    pub final_cash: f64,
    pub realized_gains: f64,
    pub unrealized_gains: f64,
    pub total_fees: f64,
    pub total_profit: f64,
    pub final_value: f64,
}

/// Single-threaded, deterministic driver. One pass over the merged tick
/// stream; day boundaries trigger allocation settlement followed by order
/// execution, so fills land before the next day's signals are evaluated.
pub struct Simulation {
    ctx: SimContext,
    strategies: Vec<Box<dyn TradingStrategy>>,
    /// Each strategy's valid-record series, in signal index space.
    series: Vec<Vec<PriceRecord>>,
    policy: Box<dyn AllocationPolicy>,
    engine: OrderExecutionEngine,
    /// Instruments dropped from the active configuration. Never entered;
    /// force-exited when `liquidate_discontinued` is set.
    discontinued: BTreeSet<InstrumentId>,
    liquidate_discontinued: bool,
}

impl Simulation {
    pub fn new(ctx: SimContext, policy: Box<dyn AllocationPolicy>) -> Self {
        let engine = OrderExecutionEngine::new(ctx.clone());
        Self {
            ctx,
            strategies: Vec::new(),
            series: Vec::new(),
            policy,
            engine,
            discontinued: BTreeSet::new(),
            liquidate_discontinued: false,
        }
    }

    pub fn mark_discontinued(&mut self, instrument: InstrumentId) {
        self.discontinued.insert(instrument);
    }

    pub fn with_liquidate_discontinued(mut self, liquidate: bool) -> Self {
        self.liquidate_discontinued = liquidate;
        self
    }

    pub fn add_strategy(&mut self, strategy: Box<dyn TradingStrategy>) {
        let series: Vec<PriceRecord> = self
            .ctx
            .prices
            .history(strategy.instrument())
            .iter()
            .filter(|r| r.is_valid())
            .cloned()
            .collect();
        self.series.push(series);
        self.strategies.push(strategy);
    }

    /// The valid-record series a strategy should be constructed against, so
    /// that its signal indices line up with the loop's tick indices.
    pub fn signal_series(ctx: &SimContext, instrument: &InstrumentId) -> Vec<PriceRecord> {
        ctx.prices
            .history(instrument)
            .iter()
            .filter(|r| r.is_valid())
            .cloned()
            .collect()
    }

    /// Runs the account through `[from, to]` and leaves the resulting ledger
    /// in place. Ticks outside the window still drive settlement (orders may
    /// execute past `to` only via the settlement delay scan, which execution
    /// bounds itself), but no signals are evaluated for them.
    pub fn execute(&mut self, account: &mut Account, from: NaiveDate, to: NaiveDate) -> RunReport {
        let ticks = self.merged_ticks();

        let mut entries = 0usize;
        let mut exits = 0usize;
        let mut filled = 0usize;
        let mut in_range = 0usize;
        let mut current_date: Option<NaiveDate> = None;

        for tick in &ticks {
            if current_date.map_or(false, |d| d != tick.date) {
                // Day boundary: size yesterday's intent, then execute.
                let settled = current_date.unwrap_or(tick.date);
                self.policy.on_end_of_date(account, settled);
                filled += self.engine.run(account);
            }
            current_date = Some(tick.date);

            if tick.date < from || tick.date > to || !account.is_within(tick.date) {
                continue;
            }
            in_range += 1;

            let strategy = self.strategies[tick.strategy].as_ref();
            if strategy.is_unstable_at(tick.index) {
                continue;
            }
            let record = &self.series[tick.strategy][tick.index];
            let held = account.quantity_of(strategy.instrument());

            if self.discontinued.contains(strategy.instrument()) {
                if self.liquidate_discontinued && held != 0.0 {
                    debug!("{} discontinued; forcing exit", strategy.instrument());
                    let quantity = self.policy.on_sell(account, record, strategy);
                    if quantity > 0.0 {
                        account.add_transaction(
                            Transaction::market(
                                tick.date,
                                strategy.instrument().clone(),
                                -quantity,
                            )
                            .with_comment(format!("liquidate discontinued {}", strategy.key())),
                        );
                    }
                    exits += 1;
                }
                continue;
            }

            // Exits take priority so a same-tick enter+exit nets to flat
            // rather than to a doubled position.
            if strategy.should_exit(tick.index) && held != 0.0 {
                let quantity = self.policy.on_sell(account, record, strategy);
                if quantity > 0.0 {
                    account.add_transaction(
                        Transaction::market(tick.date, strategy.instrument().clone(), -quantity)
                            .with_comment(format!("exit {}", strategy.key())),
                    );
                }
                exits += 1;
            } else if strategy.should_enter(tick.index) && held == 0.0 {
                let quantity = self.policy.on_buy(account, record, strategy);
                if quantity > 0.0 {
                    account.add_transaction(
                        Transaction::market(tick.date, strategy.instrument().clone(), quantity)
                            .with_comment(format!("enter {}", strategy.key())),
                    );
                }
                entries += 1;
            }
        }

        // Final settlement covers the last day's intent and any still-open
        // orders in range.
        if let Some(last) = current_date {
            self.policy.on_end_of_date(account, last);
            filled += self.engine.run(account);
        }

        if in_range == 0 {
            // Warning condition, not a failure: almost always a misconfigured
            // date range.
            warn!("no ticks fell inside {from}..{to}");
        }

        let as_of = current_date.unwrap_or(to).min(to);
        let report = self.report(account, from, to, as_of, ticks.len(), entries, exits, filled);
        info!(
            "run complete: {} ticks, {} entry signals, {} exit signals, {} fills, total profit {:.2}",
            report.ticks,
            report.entry_signals,
            report.exit_signals,
            report.orders_filled,
            report.total_profit
        );
        report
    }

    /// All (date, strategy, index) ticks, ordered by date then instrument.
    /// The sort is stable, so two strategies on the same instrument keep
    /// their registration order within a date.
    fn merged_ticks(&self) -> Vec<Tick> {
        let mut ticks: Vec<Tick> = Vec::new();
        for (s, series) in self.series.iter().enumerate() {
            for (index, record) in series.iter().enumerate() {
                ticks.push(Tick {
                    date: record.date,
                    strategy: s,
                    index,
                });
            }
        }
        ticks.sort_by(|a, b| {
            a.date.cmp(&b.date).then_with(|| {
                self.strategies[a.strategy]
                    .instrument()
                    .cmp(self.strategies[b.strategy].instrument())
            })
        });
        ticks
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        account: &Account,
        from: NaiveDate,
        to: NaiveDate,
        as_of: NaiveDate,
        ticks: usize,
        entries: usize,
        exits: usize,
        orders_filled: usize,
    ) -> RunReport {
        let portfolio = project(account, as_of, self.ctx.prices.as_ref());
        let final_cash = account.cash_at(as_of);
        RunReport {
            from,
            to,
            ticks,
            entry_signals: entries,
            exit_signals: exits,
            orders_filled,
            final_cash,
            realized_gains: portfolio.realized_gains(),
            unrealized_gains: portfolio.unrealized_gains(),
            total_fees: portfolio.total_fees(),
            total_profit: portfolio.total_profit(),
            final_value: portfolio.total_value(final_cash),
        }
    }
}
