//! Delivery Coordinator
//!
//! Owns the delivery-request lifecycle. Addressing data (recipient, pickup
//! and drop-off locations, courier location) is opaque ciphertext kept in the
//! shared [`ConfidentialStore`](market_core::confidential::ConfidentialStore);
//! only the parties of a request can have it disclosed.
//!
//! # Example
//!
//! ```no_run
//! use delivery::DeliveryCoordinator;
//! use market_core::{Address, Config, EncryptedInput, LedgerContext};
//!
//! #[tokio::main]
//! async fn main() -> market_core::Result<()> {
//!     let ctx = LedgerContext::open(Config::default())?;
//!     let coordinator = DeliveryCoordinator::open(ctx).await?;
//!
//!     let requester = Address::from_bytes([1u8; 20]);
//!     let blob = || EncryptedInput::new(b"ct".to_vec(), b"proof".to_vec());
//!     let id = coordinator
//!         .create_request(requester, blob(), blob(), blob())
//!         .await?;
//!     println!("created {}", id);
//!
//!     coordinator.shutdown().await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod coordinator;
pub mod types;

pub use coordinator::DeliveryCoordinator;
pub use types::{DeliveryRequest, DeliveryStatus, DeliverySummary};
