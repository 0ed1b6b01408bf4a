//! Hash-lock ("linked") transfers.
//!
//! The sender commits to `linked_hash = sha256(pre_image)`; whoever learns the
//! 32-byte pre-image can unlock the transfer. Every hop of a routed payment
//! commits to the same hash, which is what links them.

use super::{
    pay_payee, ConditionDef, ConditionType, ConversionError, Outcome, TransferResolver,
    TransferState,
};
use crate::types::{Bytes32, Hash, U256};
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkedState {
    pub linked_hash: Hash,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkedResolver {
    pub pre_image: Bytes32,
}

/// SHA-256 of a 32-byte pre-image.
pub fn linked_hash(pre_image: &Bytes32) -> Hash {
    Hash(Sha256::digest(pre_image.0).into())
}

pub(super) const DEF: ConditionDef = ConditionDef {
    kind: ConditionType::LinkedTransfer,
    name: "LinkedTransfer",
    validate,
    resolve,
    encode_state,
    decode_state,
    encode_resolver,
    decode_resolver,
};

fn validate(state: &TransferState) -> bool {
    match state {
        TransferState::Linked(s) => !s.linked_hash.is_zero(),
        _ => false,
    }
}

fn resolve(state: &TransferState, resolver: &TransferResolver, amount: U256) -> Outcome {
    let (TransferState::Linked(state), TransferResolver::Linked(resolver)) = (state, resolver)
    else {
        return Outcome::Failure("not a linked transfer".into());
    };

    if linked_hash(&resolver.pre_image) == state.linked_hash {
        pay_payee(amount)
    } else {
        Outcome::Failure("pre-image does not hash to the linked hash".into())
    }
}

fn encode_state(state: &TransferState) -> Vec<u8> {
    match state {
        TransferState::Linked(s) => s.linked_hash.0.to_vec(),
        _ => Vec::new(),
    }
}

fn decode_state(bytes: &[u8]) -> Result<TransferState, ConversionError> {
    let linked_hash = Hash::try_from(bytes).or(Err(ConversionError::ByteLengthMissmatch))?;
    Ok(TransferState::Linked(LinkedState { linked_hash }))
}

fn encode_resolver(resolver: &TransferResolver) -> Vec<u8> {
    match resolver {
        TransferResolver::Linked(r) => r.pre_image.0.to_vec(),
        _ => Vec::new(),
    }
}

fn decode_resolver(bytes: &[u8]) -> Result<TransferResolver, ConversionError> {
    let pre_image = Bytes32::try_from(bytes).or(Err(ConversionError::ByteLengthMissmatch))?;
    Ok(TransferResolver::Linked(LinkedResolver { pre_image }))
}
