//! Delivery request records

use chrono::{DateTime, Utc};
use market_core::{Address, RecordId, SealedHandle};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery status
///
/// ```text
/// PENDING ──accept──▶ ACCEPTED ──complete──▶ COMPLETED
///    │                   ┆
///    │                IN_TRANSIT ──complete──▶ COMPLETED
///  cancel
///    ▼
/// CANCELLED
/// ```
///
/// No operation moves a request into `InTransit`; completion still accepts it
/// as a source state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeliveryStatus {
    /// Waiting for a courier
    Pending = 0,
    /// Courier assigned
    Accepted = 1,
    /// Parcel picked up (unreachable)
    InTransit = 2,
    /// Delivered (terminal)
    Completed = 3,
    /// Withdrawn by the requester (terminal)
    Cancelled = 4,
}

impl DeliveryStatus {
    /// Upper-case status name
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Accepted => "ACCEPTED",
            DeliveryStatus::InTransit => "IN_TRANSIT",
            DeliveryStatus::Completed => "COMPLETED",
            DeliveryStatus::Cancelled => "CANCELLED",
        }
    }

    /// No transition leaves this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Completed | DeliveryStatus::Cancelled)
    }

    /// Statuses in which a courier must be assigned
    pub fn requires_courier(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Accepted | DeliveryStatus::InTransit | DeliveryStatus::Completed
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored delivery request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    /// Request id
    pub id: RecordId,
    /// Creator and owner
    pub requester: Address,
    /// Set on acceptance
    pub assigned_courier: Option<Address>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Acceptance time
    pub accepted_at: Option<DateTime<Utc>>,
    /// Completion time
    pub completed_at: Option<DateTime<Utc>>,
    /// Current status
    pub status: DeliveryStatus,
    /// Encrypted recipient
    pub recipient: SealedHandle,
    /// Encrypted pickup location
    pub pickup: SealedHandle,
    /// Encrypted delivery location
    pub dropoff: SealedHandle,
    /// Encrypted courier location submitted on acceptance
    pub courier_location: Option<SealedHandle>,
    /// Creation ordinal (id counter), orders the requester index
    pub ordinal: u64,
}

impl DeliveryRequest {
    /// Non-confidential view
    pub fn summary(&self) -> DeliverySummary {
        DeliverySummary {
            id: self.id,
            requester: self.requester,
            assigned_courier: self.assigned_courier,
            created_at: self.created_at,
            accepted_at: self.accepted_at,
            completed_at: self.completed_at,
            status: self.status,
        }
    }
}

/// Public fields of a delivery request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySummary {
    /// Request id
    pub id: RecordId,
    /// Requester
    pub requester: Address,
    /// Assigned courier
    pub assigned_courier: Option<Address>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Acceptance time
    pub accepted_at: Option<DateTime<Utc>>,
    /// Completion time
    pub completed_at: Option<DateTime<Utc>>,
    /// Current status
    pub status: DeliveryStatus,
}

impl DeliverySummary {
    /// `assigned_courier` is set iff the status requires one
    pub fn courier_invariant_holds(&self) -> bool {
        self.assigned_courier.is_some() == self.status.requires_courier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(DeliveryStatus::Completed.is_terminal());
        assert!(DeliveryStatus::Cancelled.is_terminal());
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(!DeliveryStatus::Accepted.is_terminal());
        assert!(!DeliveryStatus::InTransit.is_terminal());
    }

    #[test]
    fn test_courier_required() {
        assert!(!DeliveryStatus::Pending.requires_courier());
        assert!(!DeliveryStatus::Cancelled.requires_courier());
        assert!(DeliveryStatus::Accepted.requires_courier());
        assert!(DeliveryStatus::Completed.requires_courier());
        assert_eq!(DeliveryStatus::InTransit.to_string(), "IN_TRANSIT");
    }

    #[test]
    fn test_courier_invariant() {
        let mut summary = DeliverySummary {
            id: RecordId::from_bytes([1; 32]),
            requester: Address::from_bytes([1; 20]),
            assigned_courier: None,
            created_at: Utc::now(),
            accepted_at: None,
            completed_at: None,
            status: DeliveryStatus::Pending,
        };
        assert!(summary.courier_invariant_holds());

        summary.status = DeliveryStatus::Accepted;
        assert!(!summary.courier_invariant_holds());

        summary.assigned_courier = Some(Address::from_bytes([2; 20]));
        assert!(summary.courier_invariant_holds());

        summary.status = DeliveryStatus::Cancelled;
        assert!(!summary.courier_invariant_holds());
    }
}
