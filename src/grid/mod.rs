//! Fixed-width grid quoting.
//!
//! [`GridStrategy`] turns the latest quote and the open-order snapshot into a
//! [`GridDecision`]; [`GridEngine`] runs it on the host timer and routes the
//! resulting cancels and placements. [`CleanOrderEngine`] is the companion
//! utility that flattens resting orders.

pub mod cleaner;
pub mod config;
pub mod engine;
pub mod strategy;
pub mod types;

pub use cleaner::{CleanOrderEngine, CleanerConfig};
pub use config::GridConfig;
pub use engine::GridEngine;
pub use strategy::GridStrategy;
pub use types::{GridDecision, LadderOrder, QuoteBand};
