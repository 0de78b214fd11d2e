//! Committed event log
//!
//! Each ledger owns one stream. Events are staged into the operation's
//! [`WriteSet`] and only broadcast after the batch commits, so subscribers
//! never observe an event for a rolled-back operation.

use crate::{
    storage::{Storage, WriteSet, CF_EVENTS},
    types::{Address, Amount, RecordId},
    Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Marketplace event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketEvent {
    /// Delivery request created
    DeliveryRequested {
        /// Delivery id
        delivery_id: RecordId,
        /// Requester
        requester: Address,
    },
    /// Courier accepted a delivery
    DeliveryAccepted {
        /// Delivery id
        delivery_id: RecordId,
        /// Assigned courier
        courier: Address,
    },
    /// Courier completed a delivery
    DeliveryCompleted {
        /// Delivery id
        delivery_id: RecordId,
        /// Assigned courier
        courier: Address,
    },
    /// Requester cancelled a pending delivery
    DeliveryCancelled {
        /// Delivery id
        delivery_id: RecordId,
    },
    /// Payment opened with funds attached
    PaymentCreated {
        /// Payment id
        payment_id: RecordId,
        /// Correlated delivery id (not validated)
        delivery_id: RecordId,
        /// Payer
        payer: Address,
        /// Payee
        payee: Address,
    },
    /// Payment moved into escrow
    PaymentEscrowed {
        /// Payment id
        payment_id: RecordId,
    },
    /// Escrow released to the payee
    PaymentCompleted {
        /// Payment id
        payment_id: RecordId,
        /// Payee
        payee: Address,
        /// Amount sent to the payee (amount - fee)
        net_amount: Amount,
    },
    /// Full amount returned to the payer
    PaymentRefunded {
        /// Payment id
        payment_id: RecordId,
        /// Payer
        payer: Address,
        /// Refunded amount
        amount: Amount,
    },
    /// Platform owner withdrew accrued fees
    PlatformFeesWithdrawn {
        /// Owner
        owner: Address,
        /// Withdrawn amount
        amount: Amount,
    },
    /// Rating recorded for a delivery
    RatingSubmitted {
        /// Delivery id
        delivery_id: RecordId,
        /// Rated participant
        rated: Address,
        /// Rater
        rater: Address,
    },
}

/// Event with its position in a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Stream name (one per ledger)
    pub stream: String,
    /// Position in the stream, starting at 0
    pub sequence: u64,
    /// Time the emitting operation ran
    pub emitted_at: DateTime<Utc>,
    /// The event
    pub event: MarketEvent,
}

/// Append-only event stream for one ledger
#[derive(Debug)]
pub struct EventLog {
    stream: &'static str,
    storage: Arc<Storage>,
    next_sequence: AtomicU64,
    sender: broadcast::Sender<EventRecord>,
}

impl EventLog {
    /// Open `stream`, resuming after the last committed event
    pub fn open(storage: Arc<Storage>, stream: &'static str, capacity: usize) -> Result<Self> {
        let next_sequence = storage.counter(&Self::counter_key(stream))?;
        let (sender, _) = broadcast::channel(capacity);

        Ok(Self {
            stream,
            storage,
            next_sequence: AtomicU64::new(next_sequence),
            sender,
        })
    }

    fn counter_key(stream: &str) -> String {
        format!("events:{}", stream)
    }

    fn key(stream: &str, sequence: u64) -> Vec<u8> {
        let mut key = Self::prefix(stream);
        key.extend_from_slice(&sequence.to_be_bytes());
        key
    }

    fn prefix(stream: &str) -> Vec<u8> {
        let mut key = stream.as_bytes().to_vec();
        key.push(b'|');
        key
    }

    /// Stream name
    pub fn stream(&self) -> &'static str {
        self.stream
    }

    /// Stage `event` behind anything already in `pending`, returning its sequence
    ///
    /// Must only be called from the ledger's writer.
    pub fn stage(
        &self,
        writes: &mut WriteSet<'_>,
        pending: &mut Vec<EventRecord>,
        event: MarketEvent,
        emitted_at: DateTime<Utc>,
    ) -> Result<u64> {
        let sequence = self.next_sequence.load(Ordering::SeqCst) + pending.len() as u64;
        let record = EventRecord {
            stream: self.stream.to_string(),
            sequence,
            emitted_at,
            event,
        };

        writes.put(CF_EVENTS, &Self::key(self.stream, sequence), &record)?;
        writes.put_counter(&Self::counter_key(self.stream), sequence + 1)?;
        pending.push(record);
        Ok(sequence)
    }

    /// Advance the stream and broadcast events whose batch committed
    pub fn publish(&self, committed: Vec<EventRecord>) {
        self.next_sequence
            .fetch_add(committed.len() as u64, Ordering::SeqCst);

        for record in committed {
            tracing::debug!(
                stream = self.stream,
                sequence = record.sequence,
                event = ?record.event,
                "Event published"
            );
            // No subscribers is fine
            let _ = self.sender.send(record);
        }
    }

    /// Committed events from `sequence` onwards
    pub fn since(&self, sequence: u64) -> Result<Vec<EventRecord>> {
        let prefix = Self::prefix(self.stream);
        let start = Self::key(self.stream, sequence);

        self.storage
            .scan_prefix(CF_EVENTS, &prefix, &start)?
            .into_iter()
            .map(|(_, value)| bincode::deserialize(&value).map_err(Into::into))
            .collect()
    }

    /// Number of committed events
    pub fn len(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst)
    }

    /// No events committed yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive events committed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn open_log(stream: &'static str) -> (EventLog, Arc<Storage>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        let storage = Arc::new(Storage::open(&config).unwrap());
        let log = EventLog::open(storage.clone(), stream, 16).unwrap();
        (log, storage, temp_dir)
    }

    fn cancelled(b: u8) -> MarketEvent {
        MarketEvent::DeliveryCancelled {
            delivery_id: RecordId::from_bytes([b; 32]),
        }
    }

    #[test]
    fn test_stage_commit_publish() {
        let (log, storage, _temp) = open_log("delivery");
        let mut receiver = log.subscribe();

        let mut writes = storage.write_set();
        let mut pending = Vec::new();
        assert_eq!(log.stage(&mut writes, &mut pending, cancelled(1), Utc::now()).unwrap(), 0);
        assert_eq!(log.stage(&mut writes, &mut pending, cancelled(2), Utc::now()).unwrap(), 1);
        writes.commit().unwrap();
        log.publish(pending);

        assert_eq!(log.len(), 2);
        let events = log.since(0).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].sequence, 1);
        assert_eq!(log.since(1).unwrap().len(), 1);

        assert_eq!(receiver.try_recv().unwrap().event, cancelled(1));
        assert_eq!(receiver.try_recv().unwrap().event, cancelled(2));
    }

    #[test]
    fn test_discarded_batch_leaves_no_events() {
        let (log, storage, _temp) = open_log("payment");
        let mut receiver = log.subscribe();

        {
            let mut writes = storage.write_set();
            let mut pending = Vec::new();
            log.stage(&mut writes, &mut pending, cancelled(1), Utc::now()).unwrap();
        }

        assert!(log.is_empty());
        assert!(log.since(0).unwrap().is_empty());
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_streams_are_isolated_and_resume() {
        let (log, storage, _temp) = open_log("delivery");
        let other = EventLog::open(storage.clone(), "deliveryx", 16).unwrap();

        let mut writes = storage.write_set();
        let mut pending = Vec::new();
        log.stage(&mut writes, &mut pending, cancelled(1), Utc::now()).unwrap();
        writes.commit().unwrap();
        log.publish(pending);

        assert!(other.since(0).unwrap().is_empty());

        let reopened = EventLog::open(storage, "delivery", 16).unwrap();
        assert_eq!(reopened.len(), 1);
    }
}
