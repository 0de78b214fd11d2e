//! Error types for the marketplace ledgers

use crate::access::Role;
use crate::types::{Address, Amount, RecordId};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown delivery or payment identifier
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Record kind ("delivery", "payment", "rating")
        entity: &'static str,
        /// Identifier that was looked up
        id: RecordId,
    },

    /// Caller lacks the role this operation requires on the record
    #[error("Unauthorized: {caller} is not the {role}")]
    Unauthorized {
        /// Calling address
        caller: Address,
        /// Role the caller needed
        role: Role,
    },

    /// Operation not legal from the record's current state
    #[error("Invalid status: cannot {operation} a {entity} in status {current}")]
    InvalidStatus {
        /// Record kind
        entity: &'static str,
        /// Attempted operation
        operation: &'static str,
        /// Current status name
        current: &'static str,
    },

    /// Empty ciphertext or proof argument
    #[error("Invalid encrypted payload: {0}")]
    InvalidEncryptedPayload(&'static str),

    /// Zero (or otherwise degenerate) party argument
    #[error("Invalid address for {0}")]
    ZeroAddress(&'static str),

    /// Attached value outside configured bounds
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Zero delivery identifier supplied for a rating
    #[error("Invalid delivery id")]
    InvalidDeliveryId,

    /// Participant tried to rate themselves
    #[error("Participants cannot rate themselves")]
    SelfRating,

    /// A rating already exists for this delivery
    #[error("Delivery {0} already rated")]
    DuplicateRating(RecordId),

    /// No reputation record for this participant
    #[error("Participant not found: {0}")]
    ParticipantNotFound(Address),

    /// Outbound transfer to the payee (or fee owner) was rejected
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Refund transfer to the payer was rejected
    #[error("Refund failed: {0}")]
    RefundFailed(String),

    /// Platform withdrawal exceeds accrued balance
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        /// Requested amount
        requested: Amount,
        /// Accrued balance
        available: Amount,
    },

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (writer mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short stable label, used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Unauthorized { .. } => "unauthorized",
            Error::InvalidStatus { .. } => "invalid_status",
            Error::InvalidEncryptedPayload(_) => "invalid_encrypted_payload",
            Error::ZeroAddress(_) => "zero_address",
            Error::InvalidAmount(_) => "invalid_amount",
            Error::InvalidDeliveryId => "invalid_delivery_id",
            Error::SelfRating => "self_rating",
            Error::DuplicateRating(_) => "duplicate_rating",
            Error::ParticipantNotFound(_) => "participant_not_found",
            Error::TransferFailed(_) => "transfer_failed",
            Error::RefundFailed(_) => "refund_failed",
            Error::InsufficientFunds { .. } => "insufficient_funds",
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::Concurrency(_) => "concurrency",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }

    /// Whether the same call may succeed later without changing its arguments
    ///
    /// True for state-dependent failures (another party may still move the
    /// record, a transfer rail may recover) and infrastructure failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::InvalidStatus { .. }
                | Error::ParticipantNotFound(_)
                | Error::TransferFailed(_)
                | Error::RefundFailed(_)
                | Error::InsufficientFunds { .. }
                | Error::Storage(_)
                | Error::Concurrency(_)
                | Error::Io(_)
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
