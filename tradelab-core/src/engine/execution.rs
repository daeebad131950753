//! Order execution — resolves planned transactions against price history.
//!
//! State machine per transaction: `Planned → Filled` or `Planned → Cancelled`,
//! no other transitions. Cash transfers bypass this machine entirely (they are
//! born Filled).

use super::context::SimContext;
use crate::data::history_from;
use crate::domain::{Account, InstrumentId, OrderKind, TransactionError, TxId};
use crate::fees::FeeSchedule;
use chrono::NaiveDate;
use log::{debug, warn};
use thiserror::Error;

/// Internal faults while resolving one order. Each is caught by `run`, logged,
/// and leaves that order unresolved for the pass — it never aborts the others.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("transaction {0} disappeared from the ledger")]
    MissingTransaction(TxId),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

enum Resolution {
    Filled,
    Cancelled,
    /// No record satisfied the order yet; it stays Planned (open order).
    Open,
}

/// Consumes Planned, non-cash transactions and resolves each against the
/// instrument's price history, honoring order type, settlement delay, and
/// cash sufficiency.
pub struct OrderExecutionEngine {
    ctx: SimContext,
}

impl OrderExecutionEngine {
    pub fn new(ctx: SimContext) -> Self {
        Self { ctx }
    }

    /// One execution pass over the ledger. Returns the number of orders that
    /// reached a terminal state.
    ///
    /// Orders are visited in the ledger's natural order (date, then
    /// instrument, then id), and each fill's cash impact is visible to the
    /// orders resolved after it — settlement is re-entrant within a pass.
    pub fn run(&self, account: &mut Account) -> usize {
        let mut pending: Vec<(NaiveDate, InstrumentId, TxId)> = account
            .transactions()
            .iter()
            .filter(|t| {
                t.status == crate::domain::TransactionStatus::Planned && !t.is_cash_transfer()
            })
            .map(|t| (t.date, t.instrument.clone(), t.id))
            .collect();
        pending.sort();

        let mut resolved = 0;
        for (_, _, id) in pending {
            match self.resolve_order(account, id) {
                Ok(Resolution::Filled) | Ok(Resolution::Cancelled) => resolved += 1,
                Ok(Resolution::Open) => {}
                Err(e) => warn!("order {id} left unresolved for this pass: {e}"),
            }
        }
        resolved
    }

    fn resolve_order(&self, account: &mut Account, id: TxId) -> Result<Resolution, ExecutionError> {
        let (date, instrument, kind, quantity, requested) = {
            let t = account
                .transaction(id)
                .ok_or(ExecutionError::MissingTransaction(id))?;
            (
                t.date,
                t.instrument.clone(),
                t.kind,
                t.quantity,
                t.requested_price,
            )
        };

        let scan_start = date + self.ctx.settlement_delay();
        let history = self.ctx.prices.history(&instrument);
        for record in history_from(history, scan_start) {
            if !account.is_within(record.date) {
                break;
            }
            if !record.is_valid() {
                continue;
            }
            if !condition_met(kind, quantity > 0.0, record.close, requested) {
                continue;
            }
            let price = self.ctx.price_logic.price(record, quantity > 0.0);
            return self.apply_fill(account, id, record.date, price);
        }
        // Absence of a satisfying record is not an error: the order stays
        // Planned indefinitely.
        Ok(Resolution::Open)
    }

    fn apply_fill(
        &self,
        account: &mut Account,
        id: TxId,
        fill_date: NaiveDate,
        price: f64,
    ) -> Result<Resolution, ExecutionError> {
        let mut quantity = account
            .transaction(id)
            .ok_or(ExecutionError::MissingTransaction(id))?
            .quantity;

        // Without margin, clamp buys to available cash; sells are never
        // clamped.
        if quantity > 0.0 && !account.margin {
            let cash = account.cash_at(fill_date);
            let affordable = if price > 0.0 {
                (cash / price).floor().max(0.0)
            } else {
                0.0
            };
            quantity = quantity.min(affordable);
        }

        if quantity == 0.0 {
            let t = account
                .transaction_mut(id)
                .ok_or(ExecutionError::MissingTransaction(id))?;
            t.cancel("quantity was 0")?;
            debug!("order {id} cancelled: quantity was 0");
            return Ok(Resolution::Cancelled);
        }

        let fees = account
            .fees
            .fees_per_trade(quantity.abs(), quantity.abs() * price);
        let t = account
            .transaction_mut(id)
            .ok_or(ExecutionError::MissingTransaction(id))?;
        t.quantity = quantity;
        t.fill(price, fees)?;
        debug!(
            "order {id} filled: {} x {quantity} at {price} on {fill_date} (fees {fees})",
            t.instrument
        );
        Ok(Resolution::Filled)
    }
}

/// Fill condition per order type against a record's closing price.
fn condition_met(kind: OrderKind, is_buy: bool, close: f64, requested: f64) -> bool {
    match kind {
        OrderKind::Market => true,
        OrderKind::Limit => {
            if is_buy {
                close <= requested
            } else {
                close >= requested
            }
        }
        OrderKind::Stop => {
            if is_buy {
                close >= requested
            } else {
                close <= requested
            }
        }
        // Filtered out before scanning; a cash transfer never reaches here.
        OrderKind::CashTransfer => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryPriceSource;
    use crate::domain::{PriceRecord, Transaction, TransactionStatus};
    use crate::fees::FeeModel;
    use std::sync::Arc;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn record(d: u32, close: f64) -> PriceRecord {
        PriceRecord {
            date: date(d),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000,
            adjustment: 1.0,
        }
    }

    fn ctx_with(closes: &[(u32, f64)], delay: i64) -> SimContext {
        let mut source = MemoryPriceSource::new();
        source
            .insert(
                InstrumentId::new("SPY"),
                closes.iter().map(|&(d, c)| record(d, c)).collect(),
            )
            .unwrap();
        SimContext::new(Arc::new(source), delay)
    }

    fn status_of(account: &Account, id: TxId) -> TransactionStatus {
        account.transaction(id).unwrap().status
    }

    #[test]
    fn market_order_fills_at_first_record_after_delay() {
        let ctx = ctx_with(&[(2, 100.0), (3, 101.0), (4, 102.0)], 1);
        let engine = OrderExecutionEngine::new(ctx);
        let mut account = Account::new("test", date(2), 100_000.0);
        let id =
            account.add_transaction(Transaction::market(date(2), InstrumentId::new("SPY"), 10.0));

        assert_eq!(engine.run(&mut account), 1);
        let t = account.transaction(id).unwrap();
        assert_eq!(t.status, TransactionStatus::Filled);
        assert_eq!(t.filled_price, 101.0);
    }

    #[test]
    fn limit_buy_waits_for_price_at_or_below() {
        let ctx = ctx_with(&[(2, 121.0), (3, 120.5), (4, 120.135), (5, 119.0)], 0);
        let engine = OrderExecutionEngine::new(ctx);
        let mut account = Account::new("test", date(2), 100_000.0);
        let id = account.add_transaction(Transaction::limit(
            date(2),
            InstrumentId::new("SPY"),
            10.0,
            120.2,
        ));

        engine.run(&mut account);
        let t = account.transaction(id).unwrap();
        assert_eq!(t.status, TransactionStatus::Filled);
        // First record at or below 120.20 is the 120.135 close on the 4th
        assert_eq!(t.filled_price, 120.135);
    }

    #[test]
    fn stop_sell_triggers_on_drop() {
        let ctx = ctx_with(&[(2, 125.0), (3, 122.0), (4, 120.9), (5, 118.0)], 0);
        let engine = OrderExecutionEngine::new(ctx);
        let mut account = Account::new("test", date(2), 100_000.0);
        let id = account.add_transaction(Transaction::stop(
            date(2),
            InstrumentId::new("SPY"),
            -10.0,
            121.0,
        ));

        engine.run(&mut account);
        let t = account.transaction(id).unwrap();
        assert_eq!(t.status, TransactionStatus::Filled);
        assert_eq!(t.filled_price, 120.9);
    }

    #[test]
    fn unfilled_limit_stays_planned() {
        let ctx = ctx_with(&[(2, 130.0), (3, 131.0)], 0);
        let engine = OrderExecutionEngine::new(ctx);
        let mut account = Account::new("test", date(2), 100_000.0);
        let id = account.add_transaction(Transaction::limit(
            date(2),
            InstrumentId::new("SPY"),
            10.0,
            120.2,
        ));

        assert_eq!(engine.run(&mut account), 0);
        assert_eq!(status_of(&account, id), TransactionStatus::Planned);
    }

    #[test]
    fn missing_history_leaves_order_planned() {
        let ctx = ctx_with(&[(2, 100.0)], 0);
        let engine = OrderExecutionEngine::new(ctx);
        let mut account = Account::new("test", date(2), 100_000.0);
        let id = account.add_transaction(Transaction::market(
            date(2),
            InstrumentId::new("MSFT"),
            10.0,
        ));

        engine.run(&mut account);
        assert_eq!(status_of(&account, id), TransactionStatus::Planned);
    }

    #[test]
    fn buy_clamped_to_available_cash() {
        let ctx = ctx_with(&[(2, 100.0)], 0);
        let engine = OrderExecutionEngine::new(ctx);
        let mut account = Account::new("test", date(2), 550.0);
        let id =
            account.add_transaction(Transaction::market(date(2), InstrumentId::new("SPY"), 100.0));

        engine.run(&mut account);
        let t = account.transaction(id).unwrap();
        assert_eq!(t.status, TransactionStatus::Filled);
        assert_eq!(t.quantity, 5.0);
    }

    #[test]
    fn margin_account_is_never_clamped() {
        let ctx = ctx_with(&[(2, 100.0)], 0);
        let engine = OrderExecutionEngine::new(ctx);
        let mut account = Account::new("test", date(2), 550.0).with_margin(true);
        let id =
            account.add_transaction(Transaction::market(date(2), InstrumentId::new("SPY"), 100.0));

        engine.run(&mut account);
        assert_eq!(account.transaction(id).unwrap().quantity, 100.0);
    }

    #[test]
    fn zero_clamped_quantity_cancels() {
        let ctx = ctx_with(&[(2, 100.0)], 0);
        let engine = OrderExecutionEngine::new(ctx);
        let mut account = Account::new("test", date(2), 50.0);
        let id =
            account.add_transaction(Transaction::market(date(2), InstrumentId::new("SPY"), 10.0));

        engine.run(&mut account);
        let t = account.transaction(id).unwrap();
        assert_eq!(t.status, TransactionStatus::Cancelled);
        assert_eq!(t.comment, "quantity was 0");
        assert_eq!(t.fees, 0.0);
        assert_eq!(t.filled_price, 0.0);
    }

    #[test]
    fn sells_are_never_clamped() {
        let ctx = ctx_with(&[(2, 100.0)], 0);
        let engine = OrderExecutionEngine::new(ctx);
        let mut account = Account::new("test", date(2), 0.0);
        let id = account.add_transaction(Transaction::market(
            date(2),
            InstrumentId::new("SPY"),
            -10.0,
        ));

        engine.run(&mut account);
        let t = account.transaction(id).unwrap();
        assert_eq!(t.status, TransactionStatus::Filled);
        assert_eq!(t.quantity, -10.0);
    }

    #[test]
    fn earlier_fill_reduces_cash_for_later_order() {
        let ctx = ctx_with(&[(2, 100.0)], 0);
        let engine = OrderExecutionEngine::new(ctx);
        let mut account = Account::new("test", date(2), 1_000.0);
        let first =
            account.add_transaction(Transaction::market(date(2), InstrumentId::new("SPY"), 8.0));
        let second =
            account.add_transaction(Transaction::market(date(2), InstrumentId::new("SPY"), 8.0));

        engine.run(&mut account);
        assert_eq!(account.transaction(first).unwrap().quantity, 8.0);
        // 200 left after the first fill: only 2 shares affordable
        assert_eq!(account.transaction(second).unwrap().quantity, 2.0);
    }

    #[test]
    fn fees_computed_from_clamped_quantity() {
        let ctx = ctx_with(&[(2, 100.0)], 0);
        let engine = OrderExecutionEngine::new(ctx);
        let mut account = Account::new("test", date(2), 550.0).with_fees(FeeModel::BasisPoints {
            bps: 100.0,
            minimum: 0.0,
        });
        let id =
            account.add_transaction(Transaction::market(date(2), InstrumentId::new("SPY"), 100.0));

        engine.run(&mut account);
        let t = account.transaction(id).unwrap();
        assert_eq!(t.quantity, 5.0);
        // 1% of the clamped 500 notional
        assert!((t.fees - 5.0).abs() < 1e-9);
    }

    #[test]
    fn scan_stops_at_close_date() {
        let ctx = ctx_with(&[(2, 130.0), (9, 119.0)], 0);
        let engine = OrderExecutionEngine::new(ctx);
        let mut account =
            Account::new("test", date(2), 100_000.0).with_close_date(date(5));
        let id = account.add_transaction(Transaction::limit(
            date(2),
            InstrumentId::new("SPY"),
            10.0,
            120.0,
        ));

        engine.run(&mut account);
        // The satisfying record falls after the close date
        assert_eq!(status_of(&account, id), TransactionStatus::Planned);
    }

    #[test]
    fn repeated_runs_are_idempotent() {
        let ctx = ctx_with(&[(2, 100.0), (3, 101.0)], 0);
        let engine = OrderExecutionEngine::new(ctx);
        let mut account = Account::new("test", date(2), 100_000.0);
        account.add_transaction(Transaction::market(date(2), InstrumentId::new("SPY"), 10.0));

        assert_eq!(engine.run(&mut account), 1);
        assert_eq!(engine.run(&mut account), 0);
        assert_eq!(account.transactions().len(), 2);
    }
}
