//! Payment records and fee arithmetic

use chrono::{DateTime, Utc};
use market_core::{Address, Amount, Error, RecordId, Result, SealedHandle};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimal places kept on computed fees
pub const FEE_SCALE: u32 = 18;

/// Payment status
///
/// ```text
/// PENDING ──escrow──▶ ESCROW ──complete──▶ COMPLETED
///    │                  │
///    └──refund──┐  ┌──refund
///               ▼  ▼
///             REFUNDED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PaymentStatus {
    /// Funds attached, not yet committed
    Pending = 0,
    /// Funds held by the ledger
    Escrow = 1,
    /// Released to the payee (terminal)
    Completed = 2,
    /// Returned to the payer (terminal)
    Refunded = 3,
    /// Reserved, no transition leads here
    Disputed = 4,
}

impl PaymentStatus {
    /// Upper-case status name
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Escrow => "ESCROW",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Disputed => "DISPUTED",
        }
    }

    /// No transition leaves this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Refunded)
    }

    /// Funds still belong to neither party
    pub fn is_held(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Escrow)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `amount * rate_percent / 100`, truncated to [`FEE_SCALE`] places
///
/// Truncation keeps `amount - fee` from ever exceeding what was attached.
/// Fails with `InvalidAmount` when the product overflows.
pub fn compute_fee(amount: Amount, rate_percent: Decimal) -> Result<Amount> {
    amount
        .checked_mul(rate_percent)
        .and_then(|scaled| scaled.checked_div(Decimal::ONE_HUNDRED))
        .map(|fee| fee.round_dp_with_strategy(FEE_SCALE, RoundingStrategy::ToZero))
        .ok_or_else(|| Error::InvalidAmount(format!("fee on {} overflows", amount)))
}

/// `total + amount`, or `InvalidAmount` on overflow
pub fn credit(total: Amount, amount: Amount) -> Result<Amount> {
    total
        .checked_add(amount)
        .ok_or_else(|| Error::InvalidAmount(format!("{} + {} overflows", total, amount)))
}

/// `total - amount`, or `InvalidAmount` on overflow
pub fn debit(total: Amount, amount: Amount) -> Result<Amount> {
    total
        .checked_sub(amount)
        .ok_or_else(|| Error::InvalidAmount(format!("{} - {} overflows", total, amount)))
}

/// Stored payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment id
    pub id: RecordId,
    /// Correlated delivery (never checked against the delivery ledger)
    pub delivery_id: RecordId,
    /// Creator, the only party allowed to move the payment
    pub payer: Address,
    /// Recipient of the released funds
    pub payee: Address,
    /// Attached value
    pub amount: Amount,
    /// Platform fee, fixed at creation
    pub fee: Amount,
    /// Current status
    pub status: PaymentStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Release or refund time
    pub completed_at: Option<DateTime<Utc>>,
    /// Encrypted amount (payer only)
    pub encrypted_amount: SealedHandle,
    /// Creation ordinal (id counter)
    pub ordinal: u64,
}

impl Payment {
    /// Value the payee receives on release
    pub fn payee_amount(&self) -> Amount {
        self.amount - self.fee
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fee_examples() {
        assert_eq!(compute_fee(dec!(100), dec!(2)).unwrap(), dec!(2));
        assert_eq!(compute_fee(dec!(0.001), dec!(2)).unwrap(), dec!(0.00002));
        assert_eq!(compute_fee(dec!(33.33), dec!(2.5)).unwrap(), dec!(0.83325));
    }

    #[test]
    fn test_fee_truncates() {
        let amount = Decimal::new(1, FEE_SCALE);
        assert_eq!(compute_fee(amount, dec!(2)).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_overflow_is_an_invalid_amount() {
        let huge = Decimal::MAX / dec!(2) + Decimal::ONE;
        assert!(matches!(compute_fee(huge, dec!(2)), Err(Error::InvalidAmount(_))));
        assert!(matches!(credit(Decimal::MAX, dec!(1)), Err(Error::InvalidAmount(_))));
        assert!(matches!(debit(Decimal::MIN, dec!(1)), Err(Error::InvalidAmount(_))));
        assert_eq!(credit(dec!(1.5), dec!(2)).unwrap(), dec!(3.5));
        assert_eq!(debit(dec!(3.5), dec!(2)).unwrap(), dec!(1.5));
    }

    #[test]
    fn test_status_classes() {
        assert!(PaymentStatus::Pending.is_held());
        assert!(PaymentStatus::Escrow.is_held());
        assert!(!PaymentStatus::Completed.is_held());
        assert!(PaymentStatus::Refunded.is_terminal());
        assert!(!PaymentStatus::Disputed.is_terminal());
        assert_eq!(PaymentStatus::Escrow.to_string(), "ESCROW");
    }
}
