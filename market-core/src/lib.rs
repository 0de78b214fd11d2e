//! Parcel Market Core
//!
//! Shared foundation for the delivery, escrow and reputation ledgers.
//!
//! # Architecture
//!
//! - **Opaque payloads**: ciphertext is stored and disclosed through a
//!   [`ConfidentialStore`](confidential::ConfidentialStore), never parsed
//! - **Single Writer**: one writer task per ledger serializes mutations
//! - **Atomic Batches**: each operation commits one RocksDB write batch or nothing
//! - **Event Log**: committed events are persisted per ledger and broadcast
//!
//! # Invariants
//!
//! - A failed operation leaves no writes and emits no events
//! - Identifiers are unique per domain across restarts
//! - Authorization is checked before any write is staged

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod access;
pub mod actor;
pub mod config;
pub mod confidential;
pub mod context;
pub mod error;
pub mod events;
pub mod ids;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use context::LedgerContext;
pub use error::{Error, Result};
pub use events::{EventRecord, MarketEvent};
pub use storage::Storage;
pub use types::{Address, Amount, EncryptedInput, RecordId, SealedHandle};
