//! Strategy capability: entry/exit decisions bound to one instrument's series.
//!
//! Concrete strategies are data-driven (name + parameter map) so optimizer
//! collaborators can clone and mutate parameters without subclassing. The
//! engine only ever sees the `TradingStrategy` trait.

use crate::domain::{InstrumentId, PriceRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Entry/exit capability, evaluated by index into the instrument's valid
/// record series. `is_unstable_at` reports indices where the underlying
/// indicator pipeline has not warmed up yet; the loop skips those ticks.
pub trait TradingStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn instrument(&self) -> &InstrumentId;
    fn should_enter(&self, index: usize) -> bool;
    fn should_exit(&self, index: usize) -> bool;
    fn is_unstable_at(&self, index: usize) -> bool;

    /// Identity used by the weight table and planned-intent bookkeeping.
    fn key(&self) -> StrategyKey {
        StrategyKey {
            name: self.name().to_string(),
            instrument: self.instrument().clone(),
        }
    }
}

/// Identity of a strategy instance: name plus the instrument it trades.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StrategyKey {
    pub name: String,
    pub instrument: InstrumentId,
}

impl std::fmt::Display for StrategyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.name, self.instrument)
    }
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),

    #[error("strategy '{name}' requires parameter '{param}'")]
    MissingParameter { name: String, param: String },

    #[error("strategy '{name}' parameter '{param}' is out of range: {value}")]
    InvalidParameter {
        name: String,
        param: String,
        value: f64,
    },
}

/// Serializable strategy description: a name and a flat parameter map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    pub name: String,
    pub params: BTreeMap<String, f64>,
}

impl StrategySpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: f64) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    fn require(&self, param: &str) -> Result<f64, StrategyError> {
        self.params
            .get(param)
            .copied()
            .ok_or_else(|| StrategyError::MissingParameter {
                name: self.name.clone(),
                param: param.to_string(),
            })
    }

    /// Build the concrete strategy for one instrument's valid record series.
    ///
    /// Known names: `buy_and_hold`, `sma_cross` (param `period`).
    pub fn build(
        &self,
        instrument: InstrumentId,
        records: &[PriceRecord],
    ) -> Result<Box<dyn TradingStrategy>, StrategyError> {
        match self.name.as_str() {
            "buy_and_hold" => Ok(Box::new(BuyAndHold::new(instrument))),
            "sma_cross" => {
                let period = self.require("period")?;
                if period < 1.0 || period.fract() != 0.0 {
                    return Err(StrategyError::InvalidParameter {
                        name: self.name.clone(),
                        param: "period".to_string(),
                        value: period,
                    });
                }
                Ok(Box::new(SmaCross::new(instrument, records, period as usize)))
            }
            other => Err(StrategyError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Enters on the first record and never exits.
pub struct BuyAndHold {
    instrument: InstrumentId,
}

impl BuyAndHold {
    pub fn new(instrument: InstrumentId) -> Self {
        Self { instrument }
    }
}

impl TradingStrategy for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn instrument(&self) -> &InstrumentId {
        &self.instrument
    }

    fn should_enter(&self, index: usize) -> bool {
        index == 0
    }

    fn should_exit(&self, _index: usize) -> bool {
        false
    }

    fn is_unstable_at(&self, _index: usize) -> bool {
        false
    }
}

/// Simple moving-average cross: enter when the close is above the SMA of the
/// last `period` closes, exit when it drops below. Unstable until a full
/// window is available.
pub struct SmaCross {
    instrument: InstrumentId,
    closes: Vec<f64>,
    sma: Vec<f64>,
    period: usize,
}

impl SmaCross {
    pub fn new(instrument: InstrumentId, records: &[PriceRecord], period: usize) -> Self {
        let closes: Vec<f64> = records.iter().map(|r| r.close).collect();
        let mut sma = vec![f64::NAN; closes.len()];
        let mut window_sum = 0.0;
        for i in 0..closes.len() {
            window_sum += closes[i];
            if i >= period {
                window_sum -= closes[i - period];
            }
            if i + 1 >= period {
                sma[i] = window_sum / period as f64;
            }
        }
        Self {
            instrument,
            closes,
            sma,
            period,
        }
    }
}

impl TradingStrategy for SmaCross {
    fn name(&self) -> &str {
        "sma_cross"
    }

    fn instrument(&self) -> &InstrumentId {
        &self.instrument
    }

    fn should_enter(&self, index: usize) -> bool {
        match (self.closes.get(index), self.sma.get(index)) {
            (Some(close), Some(sma)) => sma.is_finite() && close > sma,
            _ => false,
        }
    }

    fn should_exit(&self, index: usize) -> bool {
        match (self.closes.get(index), self.sma.get(index)) {
            (Some(close), Some(sma)) => sma.is_finite() && close < sma,
            _ => false,
        }
    }

    fn is_unstable_at(&self, index: usize) -> bool {
        index + 1 < self.period
    }
}
