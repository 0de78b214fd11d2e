//! Delivery request lifecycle
//!
//! Mutations run on the coordinator's writer task in the order
//! load → authorize/validate → seal payloads → stage → commit → publish.
//! Any failure before commit drops the staged batch.

use crate::types::{DeliveryRequest, DeliveryStatus, DeliverySummary};
use market_core::{
    access::{self, Role},
    actor::{spawn_writer, WriterHandle},
    events::EventLog,
    ids::IdGenerator,
    metrics::Metrics,
    storage::CF_DELIVERIES,
    Address, EncryptedInput, Error, EventRecord, LedgerContext, MarketEvent, RecordId, Result,
    Storage,
};
use std::sync::Arc;
use tokio::sync::broadcast;

const LEDGER: &str = "delivery";
const ID_COUNTER: &str = "ids:delivery";
const REQUESTER_INDEX: &str = "requester";
const COURIER_INDEX: &str = "courier";

struct Inner {
    ctx: LedgerContext,
    ids: IdGenerator,
    events: EventLog,
    metrics: Metrics,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("ids", &self.ids)
            .field("events", &self.events.len())
            .finish()
    }
}

/// Delivery ledger
#[derive(Debug, Clone)]
pub struct DeliveryCoordinator {
    inner: Arc<Inner>,
    writer: WriterHandle,
}

impl DeliveryCoordinator {
    /// Open the coordinator on shared storage and spawn its writer
    pub async fn open(ctx: LedgerContext) -> Result<Self> {
        let storage = ctx.storage.clone();
        let last_id = storage.counter(ID_COUNTER)?;
        let ids = IdGenerator::new(LEDGER, ctx.clock.clone(), last_id);
        let events = EventLog::open(storage.clone(), LEDGER, ctx.config.events.broadcast_capacity)?;
        let metrics = Metrics::new(LEDGER).map_err(|e| Error::Config(e.to_string()))?;
        let writer = spawn_writer(LEDGER, storage, ctx.config.actor.mailbox_capacity);

        tracing::info!(requests = last_id, events = events.len(), "Delivery coordinator opened");

        Ok(Self {
            inner: Arc::new(Inner {
                ctx,
                ids,
                events,
                metrics,
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

    /// Create a PENDING request owned by `caller`
    pub async fn create_request(
        &self,
        caller: Address,
        recipient: EncryptedInput,
        pickup: EncryptedInput,
        dropoff: EncryptedInput,
    ) -> Result<RecordId> {
        self.run("create_request", move |inner, storage| {
            inner.create_request(storage, caller, recipient, pickup, dropoff)
        })
        .await
    }

    /// Assign `caller` as courier of a PENDING request
    ///
    /// The courier location is stored but not matched against the pickup or
    /// drop-off ciphertext; any non-empty payload is accepted.
    pub async fn accept_request(
        &self,
        caller: Address,
        id: RecordId,
        courier_location: EncryptedInput,
    ) -> Result<bool> {
        self.run("accept_request", move |inner, storage| {
            inner.accept_request(storage, caller, id, courier_location)
        })
        .await
    }

    /// Mark an accepted request delivered (assigned courier only)
    pub async fn complete_request(&self, caller: Address, id: RecordId) -> Result<bool> {
        self.run("complete_request", move |inner, storage| {
            inner.complete_request(storage, caller, id)
        })
        .await
    }

    /// Withdraw a PENDING request (requester only)
    pub async fn cancel_request(&self, caller: Address, id: RecordId) -> Result<bool> {
        self.run("cancel_request", move |inner, storage| {
            inner.cancel_request(storage, caller, id)
        })
        .await
    }

    // Reads

    /// Non-confidential view of a request
    pub fn get_request(&self, id: &RecordId) -> Result<DeliverySummary> {
        Ok(self.inner.load(&self.inner.ctx.storage, id)?.summary())
    }

    /// Requests created by `requester`, oldest first
    pub fn requests_by_requester(&self, requester: &Address) -> Result<Vec<RecordId>> {
        self.inner.ctx.storage.scan_index(REQUESTER_INDEX, requester)
    }

    /// Requests accepted by `courier`, oldest first
    pub fn requests_by_courier(&self, courier: &Address) -> Result<Vec<RecordId>> {
        self.inner.ctx.storage.scan_index(COURIER_INDEX, courier)
    }

    /// Requests created so far
    pub fn total_requests(&self) -> Result<u64> {
        self.inner.ctx.storage.counter(ID_COUNTER)
    }

    // Gated payloads

    /// Encrypted recipient (requester or assigned courier)
    pub fn recipient_for(&self, caller: &Address, id: &RecordId) -> Result<EncryptedInput> {
        let request = self.inner.load(&self.inner.ctx.storage, id)?;
        require_delivery_party(caller, &request)?;
        self.inner.ctx.confidential.disclose(&request.recipient, caller)
    }

    /// Encrypted pickup location (assigned courier only)
    pub fn pickup_for(&self, caller: &Address, id: &RecordId) -> Result<EncryptedInput> {
        let request = self.inner.load(&self.inner.ctx.storage, id)?;
        access::require_assigned(caller, request.assigned_courier.as_ref(), Role::AssignedCourier)?;
        self.inner.ctx.confidential.disclose(&request.pickup, caller)
    }

    /// Encrypted drop-off location (assigned courier only)
    pub fn dropoff_for(&self, caller: &Address, id: &RecordId) -> Result<EncryptedInput> {
        let request = self.inner.load(&self.inner.ctx.storage, id)?;
        access::require_assigned(caller, request.assigned_courier.as_ref(), Role::AssignedCourier)?;
        self.inner.ctx.confidential.disclose(&request.dropoff, caller)
    }

    /// Encrypted courier location, once a courier has accepted
    pub fn courier_location_for(
        &self,
        caller: &Address,
        id: &RecordId,
    ) -> Result<Option<EncryptedInput>> {
        let request = self.inner.load(&self.inner.ctx.storage, id)?;
        require_delivery_party(caller, &request)?;
        request
            .courier_location
            .map(|handle| self.inner.ctx.confidential.disclose(&handle, caller))
            .transpose()
    }

    // Events

    /// Committed delivery events from `sequence` onwards
    pub fn events_since(&self, sequence: u64) -> Result<Vec<EventRecord>> {
        self.inner.events.since(sequence)
    }

    /// Receive delivery events as they commit
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

fn require_delivery_party(caller: &Address, request: &DeliveryRequest) -> Result<()> {
    access::require(
        access::is_any_of(
            caller,
            &[Some(&request.requester), request.assigned_courier.as_ref()],
        ),
        caller,
        Role::DeliveryParty,
    )
}

fn invalid_status(operation: &'static str, current: DeliveryStatus) -> Error {
    Error::InvalidStatus {
        entity: LEDGER,
        operation,
        current: current.as_str(),
    }
}

impl Inner {
    fn load(&self, storage: &Storage, id: &RecordId) -> Result<DeliveryRequest> {
        storage
            .get(CF_DELIVERIES, id.as_bytes())?
            .ok_or(Error::NotFound {
                entity: LEDGER,
                id: *id,
            })
    }

    fn create_request(
        &self,
        storage: &Storage,
        caller: Address,
        recipient: EncryptedInput,
        pickup: EncryptedInput,
        dropoff: EncryptedInput,
    ) -> Result<RecordId> {
        recipient.ensure_present("recipient")?;
        pickup.ensure_present("pickup location")?;
        dropoff.ensure_present("delivery location")?;

        let vault = &self.ctx.confidential;
        let recipient = vault.store(&recipient)?;
        let pickup = vault.store(&pickup)?;
        let dropoff = vault.store(&dropoff)?;
        vault.grant(&recipient, &caller)?;

        let now = self.ctx.clock.now();
        let (id, ordinal) = self.ids.next(&caller);
        let request = DeliveryRequest {
            id,
            requester: caller,
            assigned_courier: None,
            created_at: now,
            accepted_at: None,
            completed_at: None,
            status: DeliveryStatus::Pending,
            recipient,
            pickup,
            dropoff,
            courier_location: None,
            ordinal,
        };

        let mut writes = storage.write_set();
        let mut pending = Vec::new();
        writes.put(CF_DELIVERIES, id.as_bytes(), &request)?;
        writes.put_counter(ID_COUNTER, ordinal)?;
        writes.index(REQUESTER_INDEX, &caller, ordinal, &id)?;
        self.events.stage(
            &mut writes,
            &mut pending,
            MarketEvent::DeliveryRequested {
                delivery_id: id,
                requester: caller,
            },
            now,
        )?;
        writes.commit()?;
        self.events.publish(pending);

        tracing::info!(delivery_id = %id, caller = %caller, "Delivery requested");
        Ok(id)
    }

    fn accept_request(
        &self,
        storage: &Storage,
        caller: Address,
        id: RecordId,
        courier_location: EncryptedInput,
    ) -> Result<bool> {
        let mut request = self.load(storage, &id)?;
        if request.status != DeliveryStatus::Pending {
            return Err(invalid_status("accept", request.status));
        }
        courier_location.ensure_present("courier location")?;
        access::require_not_party(&caller, &request.requester, Role::IndependentCourier)?;

        let vault = &self.ctx.confidential;
        let location = vault.store(&courier_location)?;
        for handle in [&request.recipient, &request.pickup, &request.dropoff, &location] {
            vault.grant(handle, &caller)?;
        }
        vault.grant(&location, &request.requester)?;

        let now = self.ctx.clock.now();
        request.assigned_courier = Some(caller);
        request.accepted_at = Some(now);
        request.courier_location = Some(location);
        request.status = DeliveryStatus::Accepted;

        let mut writes = storage.write_set();
        let mut pending = Vec::new();
        writes.put(CF_DELIVERIES, id.as_bytes(), &request)?;
        let sequence = self.events.stage(
            &mut writes,
            &mut pending,
            MarketEvent::DeliveryAccepted {
                delivery_id: id,
                courier: caller,
            },
            now,
        )?;
        writes.index(COURIER_INDEX, &caller, sequence, &id)?;
        writes.commit()?;
        self.events.publish(pending);

        tracing::info!(delivery_id = %id, caller = %caller, "Delivery accepted");
        Ok(true)
    }

    fn complete_request(&self, storage: &Storage, caller: Address, id: RecordId) -> Result<bool> {
        let mut request = self.load(storage, &id)?;
        access::require_assigned(&caller, request.assigned_courier.as_ref(), Role::AssignedCourier)?;
        if !matches!(
            request.status,
            DeliveryStatus::Accepted | DeliveryStatus::InTransit
        ) {
            return Err(invalid_status("complete", request.status));
        }

        let now = self.ctx.clock.now();
        request.status = DeliveryStatus::Completed;
        request.completed_at = Some(now);

        let mut writes = storage.write_set();
        let mut pending = Vec::new();
        writes.put(CF_DELIVERIES, id.as_bytes(), &request)?;
        self.events.stage(
            &mut writes,
            &mut pending,
            MarketEvent::DeliveryCompleted {
                delivery_id: id,
                courier: caller,
            },
            now,
        )?;
        writes.commit()?;
        self.events.publish(pending);

        tracing::info!(delivery_id = %id, caller = %caller, "Delivery completed");
        Ok(true)
    }

    fn cancel_request(&self, storage: &Storage, caller: Address, id: RecordId) -> Result<bool> {
        let mut request = self.load(storage, &id)?;
        access::require_party(&caller, &request.requester, Role::Requester)?;
        if request.status != DeliveryStatus::Pending {
            return Err(invalid_status("cancel", request.status));
        }

        let now = self.ctx.clock.now();
        request.status = DeliveryStatus::Cancelled;

        let mut writes = storage.write_set();
        let mut pending = Vec::new();
        writes.put(CF_DELIVERIES, id.as_bytes(), &request)?;
        self.events.stage(
            &mut writes,
            &mut pending,
            MarketEvent::DeliveryCancelled { delivery_id: id },
            now,
        )?;
        writes.commit()?;
        self.events.publish(pending);

        tracing::info!(delivery_id = %id, caller = %caller, "Delivery cancelled");
        Ok(true)
    }
}
