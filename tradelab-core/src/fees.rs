//! Fee schedule capability and its serializable concrete models.

use serde::{Deserialize, Serialize};

/// Pluggable fee schedule: cost of one trade given quantity and notional.
/// Returned amounts are always >= 0.
pub trait FeeSchedule: Send + Sync {
    fn fees_per_trade(&self, quantity: f64, notional: f64) -> f64;
}

/// Serializable fee schedule variants, so an account's fee model survives the
/// persisted interop shape. External collaborators can still supply their own
/// `FeeSchedule` implementation where the trait is accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeModel {
    #[default]
    NoFees,
    /// Flat amount per trade, regardless of size.
    PerTrade { amount: f64 },
    /// Notional-proportional fee in basis points, with a minimum per trade.
    BasisPoints { bps: f64, minimum: f64 },
}

impl FeeSchedule for FeeModel {
    fn fees_per_trade(&self, _quantity: f64, notional: f64) -> f64 {
        match *self {
            FeeModel::NoFees => 0.0,
            FeeModel::PerTrade { amount } => amount.max(0.0),
            FeeModel::BasisPoints { bps, minimum } => {
                (notional.abs() * bps / 10_000.0).max(minimum).max(0.0)
            }
        }
    }
}
