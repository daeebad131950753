//! TradeLab Core — deterministic backtesting and paper-trading engine.
//!
//! This crate contains the heart of the simulator:
//! - Domain types (instruments, price records, transactions, accounts,
//!   portfolio snapshots)
//! - Append-only transaction ledger with pure-fold balance queries
//! - Portfolio projector replaying the ledger to any as-of date
//! - Order execution engine (market/limit/stop, settlement delay, cash
//!   clamping)
//! - Allocation policies: immediate sizing and deferred rebalancing
//! - Single-threaded simulation loop over a merged global tick stream
//!
//! Everything is deterministic: the same inputs always produce the same
//! ledger, byte for byte.

pub mod data;
pub mod domain;
pub mod engine;
pub mod fees;
pub mod pricing;
pub mod strategy;
