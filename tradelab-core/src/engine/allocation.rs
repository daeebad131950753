//! Capital allocation — turns qualitative enter/exit signals into share
//! quantities.
//!
//! Two cooperating modes behind one capability interface: an immediate policy
//! that sizes synchronously from available cash, and a deferred policy that
//! records intent per strategy and sizes everything at end-of-day, so a
//! signal fired first in tick order cannot unfairly claim capital over one
//! fired later the same day.

use super::context::SimContext;
use super::projector::project;
use crate::data::DateMatch;
use crate::domain::{Account, InstrumentId, PriceRecord, Transaction};
use crate::fees::FeeSchedule;
use crate::strategy::{StrategyKey, TradingStrategy};
use chrono::NaiveDate;
use log::{debug, warn};
use std::collections::BTreeMap;

/// Allocation capability. `on_buy`/`on_sell` return a non-negative share
/// count; the simulation loop appends a transaction whenever the returned
/// quantity is non-zero. Deferred policies always return zero and append
/// their own transactions in `on_end_of_date`.
pub trait AllocationPolicy {
    fn on_buy(&mut self, account: &Account, record: &PriceRecord, strategy: &dyn TradingStrategy)
        -> f64;

    fn on_sell(
        &mut self,
        account: &Account,
        record: &PriceRecord,
        strategy: &dyn TradingStrategy,
    ) -> f64;

    /// Day-boundary settlement hook. Must be idempotent for an
    /// already-settled date: planned intent is cleared after each call.
    fn on_end_of_date(&mut self, account: &mut Account, date: NaiveDate);
}

/// Immediate mode: sizes a buy synchronously from available cash at the
/// signal record's price, fee-adjusted and floor-rounded; sells return the
/// full current quantity. `on_end_of_date` is a no-op.
pub struct ImmediateAllocation {
    ctx: SimContext,
}

impl ImmediateAllocation {
    pub fn new(ctx: SimContext) -> Self {
        Self { ctx }
    }
}

impl AllocationPolicy for ImmediateAllocation {
    fn on_buy(
        &mut self,
        account: &Account,
        record: &PriceRecord,
        _strategy: &dyn TradingStrategy,
    ) -> f64 {
        let price = self.ctx.price_logic.price(record, true);
        if price <= 0.0 {
            return 0.0;
        }
        let cash = account.cash_at(record.date);
        let gross = (cash / price).floor();
        if gross <= 0.0 {
            return 0.0;
        }
        let fees = account.fees.fees_per_trade(gross, gross * price);
        ((cash - fees) / price).floor().max(0.0)
    }

    fn on_sell(
        &mut self,
        account: &Account,
        _record: &PriceRecord,
        strategy: &dyn TradingStrategy,
    ) -> f64 {
        account.quantity_of(strategy.instrument()).max(0.0)
    }

    fn on_end_of_date(&mut self, _account: &mut Account, _date: NaiveDate) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlannedSide {
    Buy,
    Sell,
}

/// Deferred/rebalancing mode.
///
/// Signals only record intent; sizing happens in `on_end_of_date`:
/// 1. planned sells deactivate their strategy, planned buys (re-)activate
///    theirs with the retained (or default) weight;
/// 2. every planned sell liquidates the entire current quantity;
/// 3. every active strategy is rebalanced toward
///    `total account value × its weight factor`;
/// 4. when exactly one planned action exists and it is a buy, rebalance buys
///    for that same instrument from *other* strategies are suppressed (no
///    duplicate same-day order). The interaction of multiple simultaneous
///    buys plus a sell with rebalancing is deliberately left as-is: every
///    active strategy simply rebalances, pending product clarification;
/// 5. all resulting transactions are batch-appended at the end of the day.
pub struct DistributedAllocation {
    ctx: SimContext,
    default_weight: f64,
    /// Weight table of the currently active strategies.
    active: BTreeMap<StrategyKey, f64>,
    /// Weights remembered across deactivation, for re-activation.
    retained: BTreeMap<StrategyKey, f64>,
    /// Per-run pending intent, cleared after every settlement.
    planned: BTreeMap<StrategyKey, (PlannedSide, InstrumentId)>,
}

impl DistributedAllocation {
    pub fn new(ctx: SimContext) -> Self {
        Self {
            ctx,
            default_weight: 1.0,
            active: BTreeMap::new(),
            retained: BTreeMap::new(),
            planned: BTreeMap::new(),
        }
    }

    pub fn with_default_weight(mut self, weight: f64) -> Self {
        self.default_weight = weight;
        self
    }

    /// Pre-assign a strategy's weight for when it activates.
    pub fn set_weight(&mut self, key: StrategyKey, weight: f64) {
        self.retained.insert(key.clone(), weight);
        if self.active.contains_key(&key) {
            self.active.insert(key, weight);
        }
    }

    /// The allocation factor: this strategy's weight over the sum of all
    /// active weights, so factors across active strategies sum to 1.
    pub fn factor(&self, key: &StrategyKey) -> f64 {
        let total: f64 = self.active.values().sum();
        if total <= 0.0 {
            return 0.0;
        }
        self.active.get(key).copied().unwrap_or(0.0) / total
    }

    pub fn is_active(&self, key: &StrategyKey) -> bool {
        self.active.contains_key(key)
    }

    /// The delay-adjusted price a rebalancing order is expected to execute
    /// at: the first record on or after `date + settlement delay`, falling
    /// back to the latest record at or before `date` at series end.
    fn expected_price(&self, instrument: &InstrumentId, date: NaiveDate, is_buy: bool) -> Option<f64> {
        let scan_date = date + self.ctx.settlement_delay();
        let record = self
            .ctx
            .prices
            .value_at(instrument, scan_date, DateMatch::Next)
            .or_else(|| self.ctx.prices.value_at(instrument, date, DateMatch::Prior))?;
        if !record.is_valid() {
            return None;
        }
        let price = self.ctx.price_logic.price(&record, is_buy);
        (price > 0.0).then_some(price)
    }

    /// Convert a value delta into a signed share quantity. Buys are
    /// fee-adjusted and floored toward zero; sells round away from zero by
    /// one extra unit to absorb fee uncertainty, clamped to the held
    /// quantity.
    fn delta_to_quantity(&self, account: &Account, delta: f64, price: f64, held: f64) -> f64 {
        if delta == 0.0 {
            0.0
        } else if delta > 0.0 {
            let gross = (delta / price).floor();
            if gross <= 0.0 {
                return 0.0;
            }
            let fees = account.fees.fees_per_trade(gross, gross * price);
            ((delta - fees) / price).floor().max(0.0)
        } else {
            let quantity = (delta.abs() / price).floor() + 1.0;
            -quantity.min(held.max(0.0))
        }
    }
}

impl AllocationPolicy for DistributedAllocation {
    /// A buy signal is recorded only when the instrument has no position yet
    /// (no pyramiding); the returned quantity is always zero.
    fn on_buy(
        &mut self,
        account: &Account,
        _record: &PriceRecord,
        strategy: &dyn TradingStrategy,
    ) -> f64 {
        let instrument = strategy.instrument().clone();
        if account.quantity_of(&instrument) == 0.0 {
            self.planned
                .insert(strategy.key(), (PlannedSide::Buy, instrument));
        }
        0.0
    }

    /// A sell signal is recorded only when a position exists.
    fn on_sell(
        &mut self,
        account: &Account,
        _record: &PriceRecord,
        strategy: &dyn TradingStrategy,
    ) -> f64 {
        let instrument = strategy.instrument().clone();
        if account.quantity_of(&instrument) != 0.0 {
            self.planned
                .insert(strategy.key(), (PlannedSide::Sell, instrument));
        }
        0.0
    }

    fn on_end_of_date(&mut self, account: &mut Account, date: NaiveDate) {
        // Step 1: update the weight table from today's planned actions.
        for (key, (side, _)) in &self.planned {
            match side {
                PlannedSide::Sell => {
                    self.active.remove(key);
                }
                PlannedSide::Buy => {
                    let weight = self
                        .retained
                        .get(key)
                        .copied()
                        .unwrap_or(self.default_weight);
                    self.active.insert(key.clone(), weight);
                    self.retained.insert(key.clone(), weight);
                }
            }
        }

        let mut batch: Vec<Transaction> = Vec::new();

        // Step 2: planned sells liquidate the entire current quantity.
        for (key, (side, instrument)) in &self.planned {
            if *side != PlannedSide::Sell {
                continue;
            }
            let held = account.quantity_of(instrument);
            if held != 0.0 {
                batch.push(
                    Transaction::market(date, instrument.clone(), -held)
                        .with_comment(format!("liquidate {key}")),
                );
            }
        }

        // Step 4 precondition: the single-planned-buy special case.
        let sole_buy: Option<StrategyKey> = if self.planned.len() == 1 {
            self.planned
                .iter()
                .find(|(_, (side, _))| *side == PlannedSide::Buy)
                .map(|(key, _)| key.clone())
        } else {
            None
        };

        // Step 3: rebalance every active strategy toward its target value.
        if !self.active.is_empty() {
            let portfolio = project(account, date, self.ctx.prices.as_ref());
            let total_value = portfolio.total_value(account.cash_at(date));

            for key in self.active.keys().cloned().collect::<Vec<_>>() {
                let factor = self.factor(&key);
                if factor <= 0.0 || !factor.is_finite() {
                    warn!("skipping {key}: invalid distribution factor {factor}");
                    continue;
                }
                let instrument = &key.instrument;
                let target = total_value * factor;
                let current = portfolio.market_value_of(instrument);
                let delta = target - current;

                if delta > 0.0 {
                    if let Some(sole) = &sole_buy {
                        if *sole != key && sole.instrument == key.instrument {
                            debug!("suppressing duplicate rebalance buy for {key}");
                            continue;
                        }
                    }
                }

                let Some(price) = self.expected_price(instrument, date, delta > 0.0) else {
                    warn!("no price for {instrument} around {date}; rebalance skipped");
                    continue;
                };
                let held = account.quantity_of(instrument);
                let quantity = self.delta_to_quantity(account, delta, price, held);
                if quantity == 0.0 {
                    continue;
                }
                batch.push(
                    Transaction::market(date, instrument.clone(), quantity)
                        .with_comment(format!("rebalance {key}")),
                );
            }
        }

        // Step 5: batch-append after all per-tick decisions for the day.
        for transaction in batch {
            account.add_transaction(transaction);
        }

        // Clearing intent makes re-settlement of the same date a no-op
        // (weights are stable under re-application).
        self.planned.clear();
    }
}
