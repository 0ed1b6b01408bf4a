//! Signature-locked transfers.
//!
//! Unlocks when a committed signer signs `(payment_id, data)`. Useful for
//! payments released by an oracle or a service acknowledging delivery.

use super::{
    pay_payee, ConditionDef, ConditionType, ConversionError, Outcome, TransferResolver,
    TransferState,
};
use crate::{
    encoding, sig,
    types::{Address, Bytes32, Hash, Signature, U256},
};
use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedState {
    pub signer: Address,
    pub payment_id: Bytes32,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedResolver {
    pub data: Bytes32,
    pub signature: Signature,
}

/// The digest the committed signer has to sign.
pub fn resolution_digest(payment_id: Bytes32, data: Bytes32) -> Result<Hash, encoding::Error> {
    encoding::to_hash(&(payment_id, data))
}

pub(super) const DEF: ConditionDef = ConditionDef {
    kind: ConditionType::SignedTransfer,
    name: "SignedTransfer",
    validate,
    resolve,
    encode_state,
    decode_state,
    encode_resolver,
    decode_resolver,
};

fn validate(state: &TransferState) -> bool {
    match state {
        TransferState::Signed(s) => s.signer != Address::ZERO,
        _ => false,
    }
}

fn resolve(state: &TransferState, resolver: &TransferResolver, amount: U256) -> Outcome {
    let (TransferState::Signed(state), TransferResolver::Signed(resolver)) = (state, resolver)
    else {
        return Outcome::Failure("not a signed transfer".into());
    };

    let digest = match resolution_digest(state.payment_id, resolver.data) {
        Ok(d) => d,
        Err(e) => return Outcome::Failure(e.to_string()),
    };
    if sig::verify(digest, resolver.signature, state.signer) {
        pay_payee(amount)
    } else {
        Outcome::Failure("signature is not from the committed signer".into())
    }
}

fn encode_state(state: &TransferState) -> Vec<u8> {
    match state {
        TransferState::Signed(s) => {
            let mut b = Vec::with_capacity(20 + 32);
            b.extend_from_slice(&s.signer.0);
            b.extend_from_slice(&s.payment_id.0);
            b
        }
        _ => Vec::new(),
    }
}

fn decode_state(bytes: &[u8]) -> Result<TransferState, ConversionError> {
    if bytes.len() != 20 + 32 {
        return Err(ConversionError::ByteLengthMissmatch);
    }
    let signer = Address::try_from(&bytes[..20]).or(Err(ConversionError::ByteLengthMissmatch))?;
    let payment_id =
        Bytes32::try_from(&bytes[20..]).or(Err(ConversionError::ByteLengthMissmatch))?;
    Ok(TransferState::Signed(SignedState { signer, payment_id }))
}

fn encode_resolver(resolver: &TransferResolver) -> Vec<u8> {
    match resolver {
        TransferResolver::Signed(r) => {
            let mut b = Vec::with_capacity(32 + 65);
            b.extend_from_slice(&r.data.0);
            b.extend_from_slice(&r.signature.0);
            b
        }
        _ => Vec::new(),
    }
}

fn decode_resolver(bytes: &[u8]) -> Result<TransferResolver, ConversionError> {
    if bytes.len() != 32 + 65 {
        return Err(ConversionError::ByteLengthMissmatch);
    }
    let data = Bytes32::try_from(&bytes[..32]).or(Err(ConversionError::ByteLengthMissmatch))?;
    let signature =
        Signature::try_from(&bytes[32..]).or(Err(ConversionError::ByteLengthMissmatch))?;
    Ok(TransferResolver::Signed(SignedResolver { data, signature }))
}
