//! Reputation ledger
//!
//! Ratings are write-once per delivery id. Each rating adds the configured
//! placeholder score to the rated participant's aggregate; the submitted
//! encrypted score is sealed and kept for disclosure to the two parties.

use crate::types::{Rating, ReputationRecord};
use market_core::{
    access::{self, Role},
    actor::{spawn_writer, WriterHandle},
    events::EventLog,
    metrics::Metrics,
    storage::{CF_RATINGS, CF_REPUTATION},
    Address, EncryptedInput, Error, EventRecord, LedgerContext, MarketEvent, RecordId, Result,
    Storage,
};
use std::sync::Arc;
use tokio::sync::broadcast;

const LEDGER: &str = "reputation";
const RATED_INDEX: &str = "rated";

struct Inner {
    ctx: LedgerContext,
    events: EventLog,
    metrics: Metrics,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("events", &self.events.len())
            .finish()
    }
}

/// Reputation ledger
#[derive(Debug, Clone)]
pub struct ReputationLedger {
    inner: Arc<Inner>,
    writer: WriterHandle,
}

impl ReputationLedger {
    /// Open the ledger on shared storage and spawn its writer
    pub async fn open(ctx: LedgerContext) -> Result<Self> {
        let storage = ctx.storage.clone();
        let events = EventLog::open(storage.clone(), LEDGER, ctx.config.events.broadcast_capacity)?;
        let metrics = Metrics::new(LEDGER).map_err(|e| Error::Config(e.to_string()))?;
        let writer = spawn_writer(LEDGER, storage, ctx.config.actor.mailbox_capacity);

        tracing::info!(
            ratings = events.len(),
            placeholder_score = ctx.config.reputation.placeholder_score,
            "Reputation ledger opened"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                ctx,
                events,
                metrics,
            }),
            writer,
        })
    }

    /// Rate `rated` for `delivery_id` as `caller`
    ///
    /// Whether `caller` and `rated` actually took part in the delivery is not
    /// checked; the delivery id only has to be non-zero and unrated.
    pub async fn submit_rating(
        &self,
        caller: Address,
        delivery_id: RecordId,
        rated: Address,
        encrypted_score: EncryptedInput,
        encrypted_comment: EncryptedInput,
    ) -> Result<bool> {
        let inner = self.inner.clone();
        let outcome = self
            .writer
            .execute(move |storage| {
                inner.submit_rating(
                    storage,
                    caller,
                    delivery_id,
                    rated,
                    encrypted_score,
                    encrypted_comment,
                )
            })
            .await;
        self.inner.metrics.record("submit_rating", &outcome);
        outcome
    }

    // Queries

    /// Average score of `participant`, in [1, 5]
    pub fn get_average_rating(&self, participant: &Address) -> Result<u8> {
        Ok(self.inner.reputation(participant)?.average())
    }

    /// Whether `participant` has accumulated the configured minimum total
    ///
    /// The encrypted minimum must be well-formed but does not parameterize
    /// the comparison.
    pub fn meets_minimum_reputation(
        &self,
        participant: &Address,
        encrypted_minimum: &EncryptedInput,
    ) -> Result<bool> {
        if participant.is_zero() {
            return Err(Error::ZeroAddress("participant"));
        }
        encrypted_minimum.ensure_present("minimum reputation")?;
        let record = self.inner.reputation(participant)?;
        Ok(record.total_rating >= self.inner.ctx.config.reputation.minimum_total_rating)
    }

    /// Whether two participants' averages are within the similarity window
    pub fn have_similar_reputation(&self, first: &Address, second: &Address) -> Result<bool> {
        let first = self.inner.reputation(first)?.average();
        let second = self.inner.reputation(second)?.average();
        Ok(first.abs_diff(second) <= self.inner.ctx.config.reputation.similarity_window)
    }

    /// Rating recorded for `delivery_id`
    pub fn get_rating(&self, delivery_id: &RecordId) -> Result<Rating> {
        self.inner.rating(delivery_id)
    }

    /// Aggregate for `participant`
    pub fn get_reputation(&self, participant: &Address) -> Result<ReputationRecord> {
        self.inner.reputation(participant)
    }

    /// Delivery ids for which `participant` was rated, oldest first
    pub fn ratings_received(&self, participant: &Address) -> Result<Vec<RecordId>> {
        self.inner.ctx.storage.scan_index(RATED_INDEX, participant)
    }

    /// Encrypted score (rater or rated participant)
    pub fn encrypted_score_for(
        &self,
        caller: &Address,
        delivery_id: &RecordId,
    ) -> Result<EncryptedInput> {
        let rating = self.inner.rating(delivery_id)?;
        require_rating_party(caller, &rating)?;
        self.inner
            .ctx
            .confidential
            .disclose(&rating.encrypted_score, caller)
    }

    /// Encrypted comment (rater or rated participant), if one was given
    pub fn encrypted_comment_for(
        &self,
        caller: &Address,
        delivery_id: &RecordId,
    ) -> Result<Option<EncryptedInput>> {
        let rating = self.inner.rating(delivery_id)?;
        require_rating_party(caller, &rating)?;
        rating
            .encrypted_comment
            .map(|handle| self.inner.ctx.confidential.disclose(&handle, caller))
            .transpose()
    }

    /// Committed rating events from `sequence` onwards
    pub fn events_since(&self, sequence: u64) -> Result<Vec<EventRecord>> {
        self.inner.events.since(sequence)
    }

    /// Receive rating events as they commit
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

fn require_rating_party(caller: &Address, rating: &Rating) -> Result<()> {
    access::require(
        access::is_any_of(caller, &[Some(&rating.rater), Some(&rating.rated)]),
        caller,
        Role::RatingParty,
    )
}

impl Inner {
    fn rating(&self, delivery_id: &RecordId) -> Result<Rating> {
        self.ctx
            .storage
            .get(CF_RATINGS, delivery_id.as_bytes())?
            .ok_or(Error::NotFound {
                entity: "rating",
                id: *delivery_id,
            })
    }

    fn reputation(&self, participant: &Address) -> Result<ReputationRecord> {
        self.ctx
            .storage
            .get(CF_REPUTATION, participant.as_bytes())?
            .ok_or(Error::ParticipantNotFound(*participant))
    }

    fn submit_rating(
        &self,
        storage: &Storage,
        caller: Address,
        delivery_id: RecordId,
        rated: Address,
        encrypted_score: EncryptedInput,
        encrypted_comment: EncryptedInput,
    ) -> Result<bool> {
        if rated.is_zero() {
            return Err(Error::ZeroAddress("rated participant"));
        }
        if rated == caller {
            return Err(Error::SelfRating);
        }
        encrypted_score.ensure_present("score")?;
        // An absent comment is both blobs empty; half a comment is malformed
        if !encrypted_comment.is_empty() {
            encrypted_comment.ensure_present("comment")?;
        }
        if delivery_id.is_zero() {
            return Err(Error::InvalidDeliveryId);
        }
        if storage.contains(CF_RATINGS, delivery_id.as_bytes())? {
            return Err(Error::DuplicateRating(delivery_id));
        }

        let vault = &self.ctx.confidential;
        let score_handle = vault.store(&encrypted_score)?;
        let comment_handle = if encrypted_comment.is_empty() {
            None
        } else {
            Some(vault.store(&encrypted_comment)?)
        };
        for handle in std::iter::once(&score_handle).chain(comment_handle.as_ref()) {
            vault.grant(handle, &caller)?;
            vault.grant(handle, &rated)?;
        }

        let now = self.ctx.clock.now();
        let score = self.ctx.config.reputation.placeholder_score;
        let rating = Rating {
            delivery_id,
            rater: caller,
            rated,
            score,
            timestamp: now,
            encrypted_score: score_handle,
            encrypted_comment: comment_handle,
        };
        let mut record = storage
            .get::<ReputationRecord>(CF_REPUTATION, rated.as_bytes())?
            .unwrap_or_else(|| ReputationRecord::new(rated, now));
        record.record(score, now);

        let mut writes = storage.write_set();
        let mut pending = Vec::new();
        writes.put(CF_RATINGS, delivery_id.as_bytes(), &rating)?;
        writes.put(CF_REPUTATION, rated.as_bytes(), &record)?;
        let sequence = self.events.stage(
            &mut writes,
            &mut pending,
            MarketEvent::RatingSubmitted {
                delivery_id,
                rated,
                rater: caller,
            },
            now,
        )?;
        writes.index(RATED_INDEX, &rated, sequence, &delivery_id)?;
        writes.commit()?;
        self.events.publish(pending);

        tracing::info!(
            delivery_id = %delivery_id,
            caller = %caller,
            rated = %rated,
            ratings = record.rating_count,
            "Rating submitted"
        );
        Ok(true)
    }
}
