//! Reputation Ledger
//!
//! Per-delivery ratings and per-participant aggregates.
//!
//! # Invariants
//!
//! - At most one rating per delivery id, whoever submits it
//! - Nobody rates themselves
//! - A participant's average is in [1, 5] once they have been rated
//!
//! The stored plaintext score is a configured placeholder; the encrypted score
//! is kept sealed and never evaluated.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod ledger;
pub mod types;

pub use ledger::ReputationLedger;
pub use types::{Rating, ReputationRecord, MAX_SCORE, MIN_SCORE};
