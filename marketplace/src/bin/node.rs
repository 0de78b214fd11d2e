//! Marketplace node binary
//!
//! Opens the ledgers, runs one delivery from request to ratings, and prints
//! the committed event history and metrics.
//!
//! Usage: `marketplace-node [config.toml]` (falls back to `MARKET_*` env vars)

use anyhow::Context;
use market_core::{Address, Config, EncryptedInput};
use marketplace::Marketplace;
use rust_decimal::Decimal;

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn sealed(label: &str) -> EncryptedInput {
    // Stand-in ciphertext; real payloads come from the client's encryption library
    EncryptedInput::new(format!("ciphertext:{label}").into_bytes(), b"input-proof".to_vec())
}

async fn run_demo(market: &Marketplace) -> anyhow::Result<()> {
    let requester = Address::from_bytes([0x11; 20]);
    let courier = Address::from_bytes([0x22; 20]);
    let owner = market.config().escrow.platform_owner;

    let delivery_id = market
        .delivery()
        .create_request(requester, sealed("recipient"), sealed("pickup"), sealed("dropoff"))
        .await?;
    market
        .delivery()
        .accept_request(courier, delivery_id, sealed("courier-location"))
        .await?;

    let amount = Decimal::new(10, 0).min(market.config().escrow.max_payment);
    let payment_id = market
        .escrow()
        .create_payment(requester, delivery_id, sealed("amount"), courier, amount)
        .await?;
    market.escrow().escrow(requester, payment_id).await?;

    market.delivery().complete_request(courier, delivery_id).await?;
    market.escrow().complete(requester, payment_id).await?;

    market
        .reputation()
        .submit_rating(requester, delivery_id, courier, sealed("score"), sealed("comment"))
        .await?;

    let fees = market.escrow().platform_balance()?;
    if fees > Decimal::ZERO {
        market.escrow().withdraw_platform_fees(owner, fees).await?;
    }

    tracing::info!(
        delivery_id = %delivery_id,
        payment_id = %payment_id,
        courier_balance = %market.escrow().balance_of(&courier)?,
        owner_balance = %market.escrow().balance_of(&owner)?,
        courier_rating = market.reputation().get_average_rating(&courier)?,
        "Demo delivery settled"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        None => Config::from_env().context("loading configuration from environment")?,
    };
    init_tracing(config.log_json);

    tracing::info!(service = %config.service_name, "Starting marketplace node");

    let market = Marketplace::open(config).await?;
    run_demo(&market).await?;

    let stats = market.storage_stats()?;
    tracing::info!(
        deliveries = stats.deliveries,
        payments = stats.payments,
        ratings = stats.ratings,
        events = stats.events,
        "Storage totals (approximate)"
    );

    for record in market.history()? {
        println!("{}", serde_json::to_string(&record)?);
    }
    print!("{}", market.render_metrics()?);

    market.shutdown().await?;
    Ok(())
}
