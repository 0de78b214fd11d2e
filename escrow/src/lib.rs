//! Escrow Payment Ledger
//!
//! Holds a payer's attached funds until the payer releases them to the payee
//! (minus the platform fee) or takes them back.
//!
//! # Invariants
//!
//! - `fee = amount * fee_rate / 100`, computed at creation, never recomputed
//! - `complete` pays exactly `amount - fee` to the payee and credits exactly
//!   `fee` to the platform balance
//! - A rejected transfer leaves the payment in its previous status

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod ledger;
pub mod transfer;
pub mod types;

pub use ledger::EscrowPaymentLedger;
pub use transfer::{FundsTransfer, LedgerBalances, MockTransfer, TransferError};
pub use types::{compute_fee, credit, debit, Payment, PaymentStatus};
