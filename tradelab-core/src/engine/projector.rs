//! Portfolio projection — deterministic ledger replay up to an as-of date.

use crate::data::{DateMatch, PriceSource};
use crate::domain::{Account, Portfolio, Transaction, TransactionStatus};
use chrono::NaiveDate;
use log::warn;

/// Replays every filled, non-cash transaction dated on or before `as_of`
/// into a fresh portfolio snapshot, then marks open lines to market.
///
/// Projection is referentially transparent: the same ledger contents and the
/// same date always produce an identical snapshot.
pub fn project(account: &Account, as_of: NaiveDate, prices: &dyn PriceSource) -> Portfolio {
    let mut portfolio = Portfolio::new(as_of);
    fold_range(&mut portfolio, account, None, as_of);
    mark_to_market(&mut portfolio, prices);
    portfolio
}

/// Copy-and-advance: folds only the transactions dated after `base.as_of`
/// and up to `as_of` into a clone of the prior snapshot, then re-marks.
/// Equivalent to `project(account, as_of, prices)` when `base` was itself a
/// projection of the same ledger.
pub fn advance(
    base: &Portfolio,
    account: &Account,
    as_of: NaiveDate,
    prices: &dyn PriceSource,
) -> Portfolio {
    let mut portfolio = base.clone();
    let after = portfolio.as_of;
    portfolio.as_of = as_of;
    fold_range(&mut portfolio, account, Some(after), as_of);
    mark_to_market(&mut portfolio, prices);
    portfolio
}

/// Folds transactions with `after < date <= as_of` in (date, id) order.
fn fold_range(
    portfolio: &mut Portfolio,
    account: &Account,
    after: Option<NaiveDate>,
    as_of: NaiveDate,
) {
    let mut eligible: Vec<&Transaction> = account
        .transactions()
        .iter()
        .filter(|t| {
            t.status == TransactionStatus::Filled
                && !t.is_cash_transfer()
                && t.date <= as_of
                && after.map_or(true, |a| t.date > a)
        })
        .collect();
    // The ledger is appended in simulation order already; sorting by
    // (date, id) keeps replay deterministic for hand-built ledgers too.
    eligible.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));

    for transaction in eligible {
        portfolio.line_mut(&transaction.instrument).record(transaction);
    }
}

fn mark_to_market(portfolio: &mut Portfolio, prices: &dyn PriceSource) {
    let as_of = portfolio.as_of;
    for line in portfolio.lines.values_mut() {
        if !line.is_open() {
            line.market_value = 0.0;
            continue;
        }
        match prices.value_at(&line.instrument, as_of, DateMatch::Prior) {
            Some(record) if record.is_valid() => line.mark(record.close),
            _ => {
                // Data gap: leave the provisional mark in place.
                warn!(
                    "no price for {} at {}; line left unmarked",
                    line.instrument, as_of
                );
            }
        }
    }
}
