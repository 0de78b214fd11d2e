//! Parcel Marketplace
//!
//! Opens the delivery, escrow and reputation ledgers over one storage
//! instance.
//!
//! The ledgers never call each other. A payment or rating names a delivery
//! by id only, and nothing checks that the delivery exists or that the
//! parties match; callers composing a flow keep the ids consistent.
//!
//! # Example
//!
//! ```no_run
//! use market_core::Config;
//! use marketplace::Marketplace;
//!
//! #[tokio::main]
//! async fn main() -> market_core::Result<()> {
//!     let market = Marketplace::open(Config::default()).await?;
//!     println!("{} deliveries", market.delivery().total_requests()?);
//!     market.shutdown().await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

use delivery::DeliveryCoordinator;
use escrow::{EscrowPaymentLedger, FundsTransfer};
use market_core::{storage::StorageStats, Config, EventRecord, LedgerContext, Result};
use prometheus::{Encoder, TextEncoder};
use reputation::ReputationLedger;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};

pub use delivery;
pub use escrow;
pub use market_core;
pub use reputation;

/// Live stream of committed events from all three ledgers
pub type EventStream = Pin<Box<dyn Stream<Item = EventRecord> + Send>>;

/// The three ledgers of one node
#[derive(Debug, Clone)]
pub struct Marketplace {
    ctx: LedgerContext,
    delivery: DeliveryCoordinator,
    escrow: EscrowPaymentLedger,
    reputation: ReputationLedger,
}

impl Marketplace {
    /// Open storage and all ledgers
    pub async fn open(config: Config) -> Result<Self> {
        Self::with_context(LedgerContext::open(config)?).await
    }

    /// Open the ledgers on an existing context
    pub async fn with_context(ctx: LedgerContext) -> Result<Self> {
        let escrow = EscrowPaymentLedger::open(ctx.clone()).await?;
        Self::assemble(ctx, escrow).await
    }

    /// Open the ledgers with a custom transfer rail for escrow payouts
    pub async fn with_transfer(ctx: LedgerContext, transfer: Arc<dyn FundsTransfer>) -> Result<Self> {
        let escrow = EscrowPaymentLedger::open_with_transfer(ctx.clone(), transfer).await?;
        Self::assemble(ctx, escrow).await
    }

    async fn assemble(ctx: LedgerContext, escrow: EscrowPaymentLedger) -> Result<Self> {
        let delivery = DeliveryCoordinator::open(ctx.clone()).await?;
        let reputation = ReputationLedger::open(ctx.clone()).await?;

        tracing::info!(
            service = %ctx.config.service_name,
            data_dir = ?ctx.config.data_dir,
            "Marketplace opened"
        );

        Ok(Self {
            ctx,
            delivery,
            escrow,
            reputation,
        })
    }

    /// Delivery ledger
    pub fn delivery(&self) -> &DeliveryCoordinator {
        &self.delivery
    }

    /// Escrow ledger
    pub fn escrow(&self) -> &EscrowPaymentLedger {
        &self.escrow
    }

    /// Reputation ledger
    pub fn reputation(&self) -> &ReputationLedger {
        &self.reputation
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    /// Approximate record counts
    pub fn storage_stats(&self) -> Result<StorageStats> {
        self.ctx.storage.get_stats()
    }

    /// Every committed event, ordered by emission time
    pub fn history(&self) -> Result<Vec<EventRecord>> {
        let mut events = self.delivery.events_since(0)?;
        events.extend(self.escrow.events_since(0)?);
        events.extend(self.reputation.events_since(0)?);
        events.sort_by(|a, b| {
            (a.emitted_at, &a.stream, a.sequence).cmp(&(b.emitted_at, &b.stream, b.sequence))
        });
        Ok(events)
    }

    /// Events committed from now on, across all ledgers
    ///
    /// A subscriber that falls behind skips the events it lagged on.
    pub fn events(&self) -> EventStream {
        let delivery = BroadcastStream::new(self.delivery.subscribe());
        let escrow = BroadcastStream::new(self.escrow.subscribe());
        let reputation = BroadcastStream::new(self.reputation.subscribe());

        Box::pin(
            delivery
                .merge(escrow)
                .merge(reputation)
                .filter_map(|received| received.ok()),
        )
    }

    /// Prometheus text exposition of all ledger metrics
    pub fn render_metrics(&self) -> anyhow::Result<String> {
        let mut families = self.delivery.metrics().registry().gather();
        families.extend(self.escrow.metrics().registry().gather());
        families.extend(self.reputation.metrics().registry().gather());

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Stop all writers
    pub async fn shutdown(&self) -> Result<()> {
        self.delivery.shutdown().await?;
        self.escrow.shutdown().await?;
        self.reputation.shutdown().await?;
        tracing::info!("Marketplace stopped");
        Ok(())
    }
}
