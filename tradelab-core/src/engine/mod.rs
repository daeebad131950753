//! The engine triad plus its driver:
//! - Projector: deterministic ledger replay into a valued portfolio
//! - Execution engine: Planned-order state machine against price history
//! - Allocation policies: immediate and deferred/rebalancing sizing
//! - Simulation loop: global tick merge with day-boundary settlement

pub mod allocation;
pub mod context;
pub mod execution;
pub mod projector;
pub mod simulation;

pub use allocation::{AllocationPolicy, DistributedAllocation, ImmediateAllocation};
pub use context::SimContext;
pub use execution::{ExecutionError, OrderExecutionEngine};
pub use projector::{advance, project};
pub use simulation::{RunReport, Simulation};
