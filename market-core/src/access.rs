//! Access gate: stateless authorization predicates
//!
//! Each rule is a pure predicate plus a `require_*` wrapper that turns a
//! failed predicate into [`Error::Unauthorized`] naming the missing role.
//! Ledger operations call the wrappers explicitly at the top of each
//! mutation, before any state is read for writing.

use crate::{types::Address, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a caller must hold on a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Creator of a delivery request
    Requester,
    /// Courier assigned to a delivery
    AssignedCourier,
    /// Any courier other than the requester
    IndependentCourier,
    /// Requester or assigned courier of a delivery
    DeliveryParty,
    /// Payer of a payment
    Payer,
    /// Rater or rated participant of a rating
    RatingParty,
    /// Platform owner (fee withdrawals)
    PlatformOwner,
    /// Holder of a disclosure grant on a sealed payload
    Grantee,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Requester => "requester",
            Role::AssignedCourier => "assigned courier",
            Role::IndependentCourier => "courier independent of the requester",
            Role::DeliveryParty => "requester or assigned courier",
            Role::Payer => "payer",
            Role::RatingParty => "rater or rated participant",
            Role::PlatformOwner => "platform owner",
            Role::Grantee => "holder of a disclosure grant",
        };
        f.write_str(name)
    }
}

/// Caller is the given party (owner, requester, payer)
pub fn is_party(caller: &Address, party: &Address) -> bool {
    caller == party
}

/// Caller is the assigned party; nobody is assigned yet means no match
pub fn is_assigned(caller: &Address, assigned: Option<&Address>) -> bool {
    assigned.map_or(false, |a| a == caller)
}

/// Caller is any one of the listed parties
pub fn is_any_of(caller: &Address, parties: &[Option<&Address>]) -> bool {
    parties.iter().any(|p| is_assigned(caller, *p))
}

/// Turn a predicate outcome into a typed failure
pub fn require(allowed: bool, caller: &Address, role: Role) -> Result<()> {
    if allowed {
        Ok(())
    } else {
        tracing::debug!(caller = %caller, role = %role, "Access denied");
        Err(Error::Unauthorized {
            caller: *caller,
            role,
        })
    }
}

/// Caller must be `party`
pub fn require_party(caller: &Address, party: &Address, role: Role) -> Result<()> {
    require(is_party(caller, party), caller, role)
}

/// Caller must be the assigned party
pub fn require_assigned(caller: &Address, assigned: Option<&Address>, role: Role) -> Result<()> {
    require(is_assigned(caller, assigned), caller, role)
}

/// Caller must NOT be `party` (self-dealing forbidden)
pub fn require_not_party(caller: &Address, party: &Address, role: Role) -> Result<()> {
    require(!is_party(caller, party), caller, role)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    #[test]
    fn test_party_predicates() {
        assert!(is_party(&addr(1), &addr(1)));
        assert!(!is_party(&addr(1), &addr(2)));

        assert!(is_assigned(&addr(2), Some(&addr(2))));
        assert!(!is_assigned(&addr(2), None));
        assert!(is_any_of(&addr(3), &[Some(&addr(1)), None, Some(&addr(3))]));
        assert!(!is_any_of(&addr(4), &[Some(&addr(1)), None]));
    }

    #[test]
    fn test_require_yields_typed_failure() {
        let err = require_party(&addr(9), &addr(1), Role::Payer).unwrap_err();
        match err {
            Error::Unauthorized { caller, role } => {
                assert_eq!(caller, addr(9));
                assert_eq!(role, Role::Payer);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(require_not_party(&addr(1), &addr(1), Role::IndependentCourier).is_err());
        assert!(require_not_party(&addr(2), &addr(1), Role::IndependentCourier).is_ok());
        assert!(require_assigned(&addr(2), None, Role::AssignedCourier).is_err());
    }
}
