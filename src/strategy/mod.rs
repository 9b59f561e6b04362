// =============================================================================
// Strategy subsystem — configuration and per-strategy runtime
// =============================================================================

pub mod config;
pub mod runtime;

pub use config::{StakeMode, StrategyConfig};
pub use runtime::{StrategyRuntime, StrategyStatus};
