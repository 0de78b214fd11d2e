//! Rating and reputation records

use chrono::{DateTime, Utc};
use market_core::{Address, RecordId, SealedHandle};
use serde::{Deserialize, Serialize};

/// Lowest average a rated participant can have
pub const MIN_SCORE: u8 = 1;
/// Highest average a rated participant can have
pub const MAX_SCORE: u8 = 5;

/// One rating, keyed by delivery id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    /// Rated delivery (not checked against the delivery ledger)
    pub delivery_id: RecordId,
    /// Submitter
    pub rater: Address,
    /// Participant receiving the score
    pub rated: Address,
    /// Plaintext score in [1, 5]
    ///
    /// Always the configured placeholder: the encrypted score is retained
    /// but never decrypted into this field.
    pub score: u8,
    /// Submission time
    pub timestamp: DateTime<Utc>,
    /// Encrypted score
    pub encrypted_score: SealedHandle,
    /// Encrypted comment, when one was supplied
    pub encrypted_comment: Option<SealedHandle>,
}

/// Aggregate reputation of one participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationRecord {
    /// Participant
    pub participant: Address,
    /// Sum of received scores
    pub total_rating: u64,
    /// Number of received ratings
    pub rating_count: u64,
    /// Time of the latest rating
    pub last_updated: DateTime<Utc>,
}

impl ReputationRecord {
    /// Empty record, created on the first rating received
    pub fn new(participant: Address, now: DateTime<Utc>) -> Self {
        Self {
            participant,
            total_rating: 0,
            rating_count: 0,
            last_updated: now,
        }
    }

    /// Add one score
    pub fn record(&mut self, score: u8, now: DateTime<Utc>) {
        self.total_rating = self.total_rating.saturating_add(u64::from(score));
        self.rating_count += 1;
        self.last_updated = now;
    }

    /// Integer average clamped to [1, 5]; 0 with no ratings
    pub fn average(&self) -> u8 {
        if self.rating_count == 0 {
            return 0;
        }
        let average = self.total_rating / self.rating_count;
        average.clamp(u64::from(MIN_SCORE), u64::from(MAX_SCORE)) as u8
    }
}
