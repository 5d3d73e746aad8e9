//! Classification and dispatch.
//!
//! Inbound messages flow through:
//! 1. `RuleSet::categorize()` — pure predicate-table evaluation
//! 2. `Dispatcher::dispatch()` — routes each match to its handler,
//!    honoring per-rule stop-after-match

pub mod dispatch;
pub mod rules;

pub use dispatch::{Dispatcher, Handler};
pub use rules::{Category, MatchResult, Rule, RuleSet};
