//! Condition Engine: the closed set of transfer conditions.
//!
//! A conditional transfer locks value until a resolver satisfies the condition
//! committed to in its initial state. Every kind is a pair of pure functions
//! (`validate`, `resolve`) plus its byte encoding, looked up in [REGISTRY] by
//! [ConditionType]. Nothing here touches channel state, so both participants
//! can evaluate a resolution independently and get the same answer.
//!
//! The set is versioned through the [ConditionType] discriminants, which are
//! part of every transfer id and of the wire format. New kinds get a new
//! discriminant and a new registry entry; existing entries never change.

mod linked;
mod signed;

pub use linked::{linked_hash, LinkedResolver, LinkedState};
pub use signed::{resolution_digest, SignedResolver, SignedState};

use crate::{error::InvalidUpdate, types::U256};
use serde::Serialize;

/// Wire-stable identifier of a condition kind.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConditionType {
    /// Hash-lock: resolves with the SHA-256 pre-image of a committed hash.
    LinkedTransfer,
    /// Resolves with a signature of a committed signer.
    SignedTransfer,
}

impl ConditionType {
    pub fn code(&self) -> u32 {
        match self {
            ConditionType::LinkedTransfer => 1,
            ConditionType::SignedTransfer => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        REGISTRY
            .iter()
            .find(|def| def.kind.code() == code)
            .map(|def| def.kind)
    }

    pub fn name(&self) -> &'static str {
        self.def().name
    }

    fn def(&self) -> &'static ConditionDef {
        // The registry has exactly one entry per variant, in variant order.
        &REGISTRY[(self.code() - 1) as usize]
    }
}

/// Condition-specific initial state committed to when the transfer is created.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    Linked(LinkedState),
    Signed(SignedState),
}

impl TransferState {
    pub fn condition_type(&self) -> ConditionType {
        match self {
            TransferState::Linked(_) => ConditionType::LinkedTransfer,
            TransferState::Signed(_) => ConditionType::SignedTransfer,
        }
    }
}

/// Value presented by the payee to unlock a transfer.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub enum TransferResolver {
    Linked(LinkedResolver),
    Signed(SignedResolver),
}

impl TransferResolver {
    pub fn condition_type(&self) -> ConditionType {
        match self {
            TransferResolver::Linked(_) => ConditionType::LinkedTransfer,
            TransferResolver::Signed(_) => ConditionType::SignedTransfer,
        }
    }
}

/// How the locked amount is split once a transfer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceDelta {
    pub to_payee: U256,
    pub to_payer: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(BalanceDelta),
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

/// Errors when decoding a state or resolver from bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    UnknownCondition(u32),
    ByteLengthMissmatch,
}

/// The functions making up one condition kind.
pub struct ConditionDef {
    pub kind: ConditionType,
    pub name: &'static str,
    pub validate: fn(&TransferState) -> bool,
    pub resolve: fn(&TransferState, &TransferResolver, U256) -> Outcome,
    pub encode_state: fn(&TransferState) -> Vec<u8>,
    pub decode_state: fn(&[u8]) -> Result<TransferState, ConversionError>,
    pub encode_resolver: fn(&TransferResolver) -> Vec<u8>,
    pub decode_resolver: fn(&[u8]) -> Result<TransferResolver, ConversionError>,
}

pub static REGISTRY: [ConditionDef; 2] = [linked::DEF, signed::DEF];

/// Check that `state` is a well formed initial state for `kind`.
pub fn validate_initial_state(kind: ConditionType, state: &TransferState) -> Result<(), InvalidUpdate> {
    let def = kind.def();
    if state.condition_type() == kind && (def.validate)(state) {
        Ok(())
    } else {
        Err(InvalidUpdate::InvalidInitialState(def.name))
    }
}

/// Evaluate `resolver` against the committed `state` of a transfer locking
/// `amount`.
pub fn resolve(
    kind: ConditionType,
    state: &TransferState,
    resolver: &TransferResolver,
    amount: U256,
) -> Outcome {
    let def = kind.def();
    if state.condition_type() != kind || resolver.condition_type() != kind {
        return Outcome::Failure(format!("resolver is not a {} resolver", def.name));
    }
    (def.resolve)(state, resolver, amount)
}

pub fn encode_state(state: &TransferState) -> Vec<u8> {
    (state.condition_type().def().encode_state)(state)
}

pub fn decode_state(kind: ConditionType, bytes: &[u8]) -> Result<TransferState, ConversionError> {
    (kind.def().decode_state)(bytes)
}

pub fn encode_resolver(resolver: &TransferResolver) -> Vec<u8> {
    (resolver.condition_type().def().encode_resolver)(resolver)
}

pub fn decode_resolver(
    kind: ConditionType,
    bytes: &[u8],
) -> Result<TransferResolver, ConversionError> {
    (kind.def().decode_resolver)(bytes)
}

/// Full amount to the payee.
fn pay_payee(amount: U256) -> Outcome {
    Outcome::Success(BalanceDelta {
        to_payee: amount,
        to_payer: U256::zero(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bytes32, Hash};

    #[test]
    fn registry_is_in_variant_order() {
        for (i, def) in REGISTRY.iter().enumerate() {
            assert_eq!(def.kind.code() as usize, i + 1);
            assert_eq!(ConditionType::from_code(def.kind.code()), Some(def.kind));
        }
        assert_eq!(ConditionType::from_code(0), None);
        assert_eq!(ConditionType::from_code(99), None);
    }

    #[test]
    fn mismatched_kinds_fail() {
        let state = TransferState::Linked(LinkedState {
            linked_hash: Hash([1; 32]),
        });
        assert!(validate_initial_state(ConditionType::SignedTransfer, &state).is_err());

        let resolver = TransferResolver::Linked(LinkedResolver {
            pre_image: Bytes32([0; 32]),
        });
        let out = resolve(ConditionType::SignedTransfer, &state, &resolver, U256::from(1));
        assert!(!out.is_success());
    }
}
