//! Cost estimation and budget enforcement for streamloop.
//!
//! A static per-model price table turns token usage into USD, and a
//! per-invocation tracker decides when token, cost or iteration limits halt
//! the loop.

pub mod budget;
pub mod pricing;

pub use budget::{BudgetBreach, BudgetTracker};
pub use pricing::{ModelPricing, PricingTable};
