//! Adaptive degradation: circuit breaking driven by the health signal the callee reports
//! in its responses, in addition to locally observed call statistics.

pub mod breaker;
pub mod collector;
pub mod error;
pub mod metric;
pub mod probe;
pub mod rule;
pub mod rule_manager;

pub use breaker::*;
pub use collector::*;
pub use error::*;
pub use metric::*;
pub use probe::*;
pub use rule::*;
pub use rule_manager::*;

/// The per-resource adaptive degradation rule.
pub type DegradeRule = Rule;
