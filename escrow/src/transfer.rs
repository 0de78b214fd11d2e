//! Outbound value movement
//!
//! The escrow ledger pays out through a [`FundsTransfer`]. A transfer is
//! staged in the operation's write batch; rejecting it aborts the whole
//! operation before anything commits.

use crate::types::credit;
use market_core::{
    storage::{WriteSet, CF_BALANCES},
    Address, Amount, Storage,
};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Transfer failure
#[derive(Error, Debug)]
pub enum TransferError {
    /// The rail refused the transfer
    #[error("{0}")]
    Rejected(String),

    /// Ledger storage failed while staging the transfer
    #[error(transparent)]
    Ledger(#[from] market_core::Error),
}

/// Capability to move value out of the escrow ledger
pub trait FundsTransfer: Send + Sync + fmt::Debug {
    /// Stage a transfer of `amount` to `to`
    ///
    /// Called at most once per recipient per operation.
    fn transfer(
        &self,
        writes: &mut WriteSet<'_>,
        to: &Address,
        amount: Amount,
    ) -> Result<(), TransferError>;

    /// Value received by `who` so far
    fn balance_of(&self, who: &Address) -> market_core::Result<Amount>;
}

/// Transfers credited to per-address balances in the `balances` column family
#[derive(Debug, Clone)]
pub struct LedgerBalances {
    storage: Arc<Storage>,
}

impl LedgerBalances {
    /// Balances on shared storage
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl FundsTransfer for LedgerBalances {
    fn transfer(
        &self,
        writes: &mut WriteSet<'_>,
        to: &Address,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let balance = credit(self.balance_of(to)?, amount)?;
        writes.put(CF_BALANCES, to.as_bytes(), &balance)?;
        tracing::debug!(to = %to, amount = %amount, balance = %balance, "Transfer staged");
        Ok(())
    }

    fn balance_of(&self, who: &Address) -> market_core::Result<Amount> {
        Ok(self
            .storage
            .get::<Decimal>(CF_BALANCES, who.as_bytes())?
            .unwrap_or(Decimal::ZERO))
    }
}

/// Transfer rail that can be switched off, for exercising rollbacks
#[derive(Debug)]
pub struct MockTransfer {
    balances: LedgerBalances,
    available: AtomicBool,
    attempts: AtomicU64,
}

impl MockTransfer {
    /// Rail backed by `balances`, initially available
    pub fn new(balances: LedgerBalances) -> Self {
        Self {
            balances,
            available: AtomicBool::new(true),
            attempts: AtomicU64::new(0),
        }
    }

    /// Accept or reject every following transfer
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Transfers attempted, accepted or not
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl FundsTransfer for MockTransfer {
    fn transfer(
        &self,
        writes: &mut WriteSet<'_>,
        to: &Address,
        amount: Amount,
    ) -> Result<(), TransferError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(TransferError::Rejected(format!(
                "rail unavailable for {} to {}",
                amount, to
            )));
        }
        self.balances.transfer(writes, to, amount)
    }

    fn balance_of(&self, who: &Address) -> market_core::Result<Amount> {
        self.balances.balance_of(who)
    }
}
