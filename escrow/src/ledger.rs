//! Escrow payment ledger
//!
//! Payments move PENDING → ESCROW → COMPLETED, or to REFUNDED from either
//! non-terminal state. Only the payer moves a payment.
//!
//! `complete`, `refund` and `withdraw_platform_fees` stage the new state
//! first, then stage the outbound transfer, and commit only if the transfer
//! was accepted. A rejected transfer drops the batch, so the payment keeps its
//! previous status. The ledger's single writer means no other operation can
//! observe or re-enter a payment between the two steps.

use crate::transfer::{FundsTransfer, LedgerBalances, TransferError};
use crate::types::{compute_fee, credit, debit, Payment, PaymentStatus};
use market_core::{
    access::{self, Role},
    actor::{spawn_writer, WriterHandle},
    events::EventLog,
    ids::IdGenerator,
    metrics::Metrics,
    storage::{CF_META, CF_PAYMENTS},
    Address, Amount, EncryptedInput, Error, EventRecord, LedgerContext, MarketEvent, RecordId,
    Result, Storage,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast;

const LEDGER: &str = "payment";
const ID_COUNTER: &str = "ids:payment";
const PLATFORM_BALANCE: &[u8] = b"escrow:platform_fees";
const HELD_VALUE: &[u8] = b"escrow:held";
const PAYER_INDEX: &str = "payer";
const PAYEE_INDEX: &str = "payee";

struct Inner {
    ctx: LedgerContext,
    ids: IdGenerator,
    events: EventLog,
    metrics: Metrics,
    transfer: Arc<dyn FundsTransfer>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("ids", &self.ids)
            .field("transfer", &self.transfer)
            .finish()
    }
}

/// Escrow ledger
#[derive(Debug, Clone)]
pub struct EscrowPaymentLedger {
    inner: Arc<Inner>,
    writer: WriterHandle,
}

impl EscrowPaymentLedger {
    /// Open with transfers credited to ledger balances
    pub async fn open(ctx: LedgerContext) -> Result<Self> {
        let transfer = Arc::new(LedgerBalances::new(ctx.storage.clone()));
        Self::open_with_transfer(ctx, transfer).await
    }

    /// Open with a custom transfer rail
    pub async fn open_with_transfer(
        ctx: LedgerContext,
        transfer: Arc<dyn FundsTransfer>,
    ) -> Result<Self> {
        let storage = ctx.storage.clone();
        let last_id = storage.counter(ID_COUNTER)?;
        let ids = IdGenerator::new(LEDGER, ctx.clock.clone(), last_id);
        let events = EventLog::open(storage.clone(), LEDGER, ctx.config.events.broadcast_capacity)?;
        let metrics = Metrics::new("escrow").map_err(|e| Error::Config(e.to_string()))?;
        let writer = spawn_writer(LEDGER, storage.clone(), ctx.config.actor.mailbox_capacity);

        let held = read_amount(&storage, HELD_VALUE)?;
        metrics.held_value.set(held.to_f64().unwrap_or(0.0));

        tracing::info!(
            payments = last_id,
            held = %held,
            fee_rate = %ctx.config.escrow.fee_rate_percent,
            "Escrow ledger opened"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                ctx,
                ids,
                events,
                metrics,
                transfer,
            }),
            writer,
        })
    }

    async fn run<T, F>(&self, operation: &'static str, job: F) -> Result<T>
    where
        F: FnOnce(&Inner, &Storage) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        let outcome = self.writer.execute(move |storage| job(&*inner, storage)).await;
        self.inner.metrics.record(operation, &outcome);
        outcome
    }

    // Mutations

    /// Open a payment from `caller` to `payee` with `attached_funds`
    ///
    /// `delivery_id` is recorded as given; keeping it consistent with the
    /// delivery ledger is the caller's responsibility.
    pub async fn create_payment(
        &self,
        caller: Address,
        delivery_id: RecordId,
        encrypted_amount: EncryptedInput,
        payee: Address,
        attached_funds: Amount,
    ) -> Result<RecordId> {
        self.run("create_payment", move |inner, storage| {
            inner.create_payment(
                storage,
                caller,
                delivery_id,
                encrypted_amount,
                payee,
                attached_funds,
            )
        })
        .await
    }

    /// Commit a PENDING payment to escrow
    pub async fn escrow(&self, caller: Address, id: RecordId) -> Result<bool> {
        self.run("escrow", move |inner, storage| inner.escrow(storage, caller, id))
            .await
    }

    /// Release an escrowed payment: `amount - fee` to the payee, `fee` to the platform
    pub async fn complete(&self, caller: Address, id: RecordId) -> Result<bool> {
        self.run("complete", move |inner, storage| {
            inner.complete(storage, caller, id)
        })
        .await
    }

    /// Return the full amount of a PENDING or ESCROW payment to the payer
    pub async fn refund(
        &self,
        caller: Address,
        id: RecordId,
        encrypted_amount: EncryptedInput,
    ) -> Result<bool> {
        self.run("refund", move |inner, storage| {
            inner.refund(storage, caller, id, encrypted_amount)
        })
        .await
    }

    /// Move accrued fees to the platform owner
    pub async fn withdraw_platform_fees(&self, caller: Address, amount: Amount) -> Result<bool> {
        self.run("withdraw_platform_fees", move |inner, storage| {
            inner.withdraw_platform_fees(storage, caller, amount)
        })
        .await
    }

    // Reads

    /// Payment record (the encrypted amount stays sealed)
    pub fn get_payment(&self, id: &RecordId) -> Result<Payment> {
        self.inner.load(&self.inner.ctx.storage, id)
    }

    /// Payments created by `payer`, oldest first
    pub fn payments_by_payer(&self, payer: &Address) -> Result<Vec<RecordId>> {
        self.inner.ctx.storage.scan_index(PAYER_INDEX, payer)
    }

    /// Payments addressed to `payee`, oldest first
    pub fn payments_by_payee(&self, payee: &Address) -> Result<Vec<RecordId>> {
        self.inner.ctx.storage.scan_index(PAYEE_INDEX, payee)
    }

    /// Fees accrued and not yet withdrawn
    pub fn platform_balance(&self) -> Result<Amount> {
        read_amount(&self.inner.ctx.storage, PLATFORM_BALANCE)
    }

    /// Value in open payments plus unwithdrawn fees
    pub fn held_value(&self) -> Result<Amount> {
        read_amount(&self.inner.ctx.storage, HELD_VALUE)
    }

    /// Value paid out to `who` by this ledger
    pub fn balance_of(&self, who: &Address) -> Result<Amount> {
        self.inner.transfer.balance_of(who)
    }

    /// Payments created so far
    pub fn total_payments(&self) -> Result<u64> {
        self.inner.ctx.storage.counter(ID_COUNTER)
    }

    /// Encrypted amount (payer only)
    pub fn encrypted_amount_for(&self, caller: &Address, id: &RecordId) -> Result<EncryptedInput> {
        let payment = self.inner.load(&self.inner.ctx.storage, id)?;
        access::require_party(caller, &payment.payer, Role::Payer)?;
        self.inner
            .ctx
            .confidential
            .disclose(&payment.encrypted_amount, caller)
    }

    // Events

    /// Committed payment events from `sequence` onwards
    pub fn events_since(&self, sequence: u64) -> Result<Vec<EventRecord>> {
        self.inner.events.since(sequence)
    }

    /// Receive payment events as they commit
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.inner.events.subscribe()
    }

    /// Operation metrics
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Stop the writer (queued operations still run)
    pub async fn shutdown(&self) -> Result<()> {
        self.writer.shutdown().await
    }
}

fn read_amount(storage: &Storage, key: &[u8]) -> Result<Amount> {
    Ok(storage.get::<Decimal>(CF_META, key)?.unwrap_or(Decimal::ZERO))
}

fn invalid_status(operation: &'static str, current: PaymentStatus) -> Error {
    Error::InvalidStatus {
        entity: LEDGER,
        operation,
        current: current.as_str(),
    }
}

fn rejected(err: TransferError, on_reject: fn(String) -> Error) -> Error {
    match err {
        TransferError::Rejected(reason) => {
            tracing::warn!(reason = %reason, "Outbound transfer rejected");
            on_reject(reason)
        }
        TransferError::Ledger(e) => e,
    }
}

impl Inner {
    fn load(&self, storage: &Storage, id: &RecordId) -> Result<Payment> {
        storage.get(CF_PAYMENTS, id.as_bytes())?.ok_or(Error::NotFound {
            entity: LEDGER,
            id: *id,
        })
    }

    fn validate_amount(&self, amount: Amount) -> Result<()> {
        let limits = &self.ctx.config.escrow;
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount("attached funds must be positive".into()));
        }
        if amount < limits.min_payment {
            return Err(Error::InvalidAmount(format!(
                "{} is below the minimum of {}",
                amount, limits.min_payment
            )));
        }
        if amount > limits.max_payment {
            return Err(Error::InvalidAmount(format!(
                "{} exceeds the maximum of {}",
                amount, limits.max_payment
            )));
        }
        Ok(())
    }

    fn set_held(&self, held: Amount) {
        self.metrics.held_value.set(held.to_f64().unwrap_or(0.0));
    }

    fn create_payment(
        &self,
        storage: &Storage,
        caller: Address,
        delivery_id: RecordId,
        encrypted_amount: EncryptedInput,
        payee: Address,
        attached_funds: Amount,
    ) -> Result<RecordId> {
        if payee.is_zero() || payee == caller {
            return Err(Error::ZeroAddress("payee"));
        }
        encrypted_amount.ensure_present("amount")?;
        self.validate_amount(attached_funds)?;

        let vault = &self.ctx.confidential;
        let sealed = vault.store(&encrypted_amount)?;
        vault.grant(&sealed, &caller)?;

        let now = self.ctx.clock.now();
        let (id, ordinal) = self.ids.next(&caller);
        let payment = Payment {
            id,
            delivery_id,
            payer: caller,
            payee,
            amount: attached_funds,
            fee: compute_fee(attached_funds, self.ctx.config.escrow.fee_rate_percent)?,
            status: PaymentStatus::Pending,
            created_at: now,
            completed_at: None,
            encrypted_amount: sealed,
            ordinal,
        };
        let held = credit(read_amount(storage, HELD_VALUE)?, attached_funds)?;

        let mut writes = storage.write_set();
        let mut pending = Vec::new();
        writes.put(CF_PAYMENTS, id.as_bytes(), &payment)?;
        writes.put_counter(ID_COUNTER, ordinal)?;
        writes.put(CF_META, HELD_VALUE, &held)?;
        writes.index(PAYER_INDEX, &caller, ordinal, &id)?;
        writes.index(PAYEE_INDEX, &payee, ordinal, &id)?;
        self.events.stage(
            &mut writes,
            &mut pending,
            MarketEvent::PaymentCreated {
                payment_id: id,
                delivery_id,
                payer: caller,
                payee,
            },
            now,
        )?;
        writes.commit()?;
        self.events.publish(pending);
        self.set_held(held);

        tracing::info!(
            payment_id = %id,
            delivery_id = %delivery_id,
            caller = %caller,
            amount = %payment.amount,
            fee = %payment.fee,
            "Payment created"
        );
        Ok(id)
    }

    fn escrow(&self, storage: &Storage, caller: Address, id: RecordId) -> Result<bool> {
        let mut payment = self.load(storage, &id)?;
        access::require_party(&caller, &payment.payer, Role::Payer)?;
        if payment.status != PaymentStatus::Pending {
            return Err(invalid_status("escrow", payment.status));
        }

        let now = self.ctx.clock.now();
        payment.status = PaymentStatus::Escrow;

        let mut writes = storage.write_set();
        let mut pending = Vec::new();
        writes.put(CF_PAYMENTS, id.as_bytes(), &payment)?;
        self.events.stage(
            &mut writes,
            &mut pending,
            MarketEvent::PaymentEscrowed { payment_id: id },
            now,
        )?;
        writes.commit()?;
        self.events.publish(pending);

        tracing::info!(payment_id = %id, caller = %caller, "Payment escrowed");
        Ok(true)
    }

    fn complete(&self, storage: &Storage, caller: Address, id: RecordId) -> Result<bool> {
        let mut payment = self.load(storage, &id)?;
        access::require_party(&caller, &payment.payer, Role::Payer)?;
        if payment.status != PaymentStatus::Escrow {
            return Err(invalid_status("complete", payment.status));
        }

        let now = self.ctx.clock.now();
        let payee_amount = payment.payee_amount();
        payment.status = PaymentStatus::Completed;
        payment.completed_at = Some(now);

        let platform = credit(read_amount(storage, PLATFORM_BALANCE)?, payment.fee)?;
        let held = debit(read_amount(storage, HELD_VALUE)?, payee_amount)?;

        let mut writes = storage.write_set();
        let mut pending = Vec::new();
        writes.put(CF_PAYMENTS, id.as_bytes(), &payment)?;
        self.transfer
            .transfer(&mut writes, &payment.payee, payee_amount)
            .map_err(|e| rejected(e, Error::TransferFailed))?;
        writes.put(CF_META, PLATFORM_BALANCE, &platform)?;
        writes.put(CF_META, HELD_VALUE, &held)?;
        self.events.stage(
            &mut writes,
            &mut pending,
            MarketEvent::PaymentCompleted {
                payment_id: id,
                payee: payment.payee,
                net_amount: payee_amount,
            },
            now,
        )?;
        writes.commit()?;
        self.events.publish(pending);
        self.set_held(held);

        tracing::info!(
            payment_id = %id,
            caller = %caller,
            payee_amount = %payee_amount,
            fee = %payment.fee,
            "Payment completed"
        );
        Ok(true)
    }

    fn refund(
        &self,
        storage: &Storage,
        caller: Address,
        id: RecordId,
        encrypted_amount: EncryptedInput,
    ) -> Result<bool> {
        let mut payment = self.load(storage, &id)?;
        access::require_party(&caller, &payment.payer, Role::Payer)?;
        if !payment.status.is_held() {
            return Err(invalid_status("refund", payment.status));
        }
        encrypted_amount.ensure_present("amount")?;

        let now = self.ctx.clock.now();
        payment.status = PaymentStatus::Refunded;
        payment.completed_at = Some(now);
        let held = debit(read_amount(storage, HELD_VALUE)?, payment.amount)?;

        let mut writes = storage.write_set();
        let mut pending = Vec::new();
        writes.put(CF_PAYMENTS, id.as_bytes(), &payment)?;
        self.transfer
            .transfer(&mut writes, &payment.payer, payment.amount)
            .map_err(|e| rejected(e, Error::RefundFailed))?;
        writes.put(CF_META, HELD_VALUE, &held)?;
        self.events.stage(
            &mut writes,
            &mut pending,
            MarketEvent::PaymentRefunded {
                payment_id: id,
                payer: payment.payer,
                amount: payment.amount,
            },
            now,
        )?;
        writes.commit()?;
        self.events.publish(pending);
        self.set_held(held);

        tracing::info!(payment_id = %id, caller = %caller, amount = %payment.amount, "Payment refunded");
        Ok(true)
    }

    fn withdraw_platform_fees(
        &self,
        storage: &Storage,
        caller: Address,
        amount: Amount,
    ) -> Result<bool> {
        let owner = self.ctx.config.escrow.platform_owner;
        access::require_party(&caller, &owner, Role::PlatformOwner)?;
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount("withdrawal must be positive".into()));
        }
        let available = read_amount(storage, PLATFORM_BALANCE)?;
        if amount > available {
            return Err(Error::InsufficientFunds {
                requested: amount,
                available,
            });
        }

        let now = self.ctx.clock.now();
        let held = debit(read_amount(storage, HELD_VALUE)?, amount)?;

        let mut writes = storage.write_set();
        let mut pending = Vec::new();
        writes.put(CF_META, PLATFORM_BALANCE, &debit(available, amount)?)?;
        writes.put(CF_META, HELD_VALUE, &held)?;
        self.transfer
            .transfer(&mut writes, &owner, amount)
            .map_err(|e| rejected(e, Error::TransferFailed))?;
        self.events.stage(
            &mut writes,
            &mut pending,
            MarketEvent::PlatformFeesWithdrawn { owner, amount },
            now,
        )?;
        writes.commit()?;
        self.events.publish(pending);
        self.set_held(held);

        tracing::info!(caller = %caller, amount = %amount, "Platform fees withdrawn");
        Ok(true)
    }
}
