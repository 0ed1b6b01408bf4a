//! Messages exchanged between the two participants of a channel.
//!
//! Every exchange is a request/reply pair: the proposer sends an
//! [ParticipantMessage::UpdateProposal] carrying its signature, the
//! counterparty answers with its own signature or a rejection.

mod update;

use crate::{
    channel::ChannelUpdate,
    condition,
    error::Error,
    types::{Address, Signature},
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("expected a value, got none")]
    ExpectedSome,
    #[error("field has the wrong length")]
    ByteLengthMissmatch,
    #[error("unknown condition type {0}")]
    UnknownCondition(u32),
    #[error("unknown reject code {0}")]
    UnknownRejectCode(i32),
    #[error("expected {0} signature slots")]
    SignatureCount(usize),
}

impl From<condition::ConversionError> for ConversionError {
    fn from(e: condition::ConversionError) -> Self {
        match e {
            condition::ConversionError::UnknownCondition(c) => Self::UnknownCondition(c),
            condition::ConversionError::ByteLengthMissmatch => Self::ByteLengthMissmatch,
        }
    }
}

impl From<ConversionError> for Error {
    fn from(e: ConversionError) -> Self {
        Error::Wire(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantMessage {
    /// An update signed by its proposer.
    UpdateProposal(ChannelUpdate),
    UpdateAccepted(UpdateAccepted),
    UpdateRejected(UpdateRejected),
}

/// Countersignature over the proposed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateAccepted {
    pub channel_address: Address,
    pub nonce: u64,
    pub signature: Signature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The update does not apply to the rejecter's canonical state.
    Invalid,
    /// The rejecter is at a different nonce.
    StaleNonce { expected: u64 },
    /// The rejecter is busy with another update on the same channel.
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRejected {
    pub channel_address: Address,
    pub nonce: u64,
    pub reason: RejectReason,
    pub message: String,
    /// Rejecter's latest double-signed update, so a proposer that fell
    /// behind can catch up.
    pub latest: Option<ChannelUpdate>,
}

impl UpdateRejected {
    /// Rejection of the update with `nonce` on `channel_address` because of
    /// `err`.
    pub fn from_error(channel_address: Address, nonce: u64, err: &Error) -> Self {
        let reason = match err {
            Error::StaleNonce { expected, .. } => RejectReason::StaleNonce {
                expected: *expected,
            },
            _ => RejectReason::Invalid,
        };
        UpdateRejected {
            channel_address,
            nonce,
            reason,
            message: err.to_string(),
            latest: None,
        }
    }

    /// The error reported to the proposer.
    pub fn to_error(&self) -> Error {
        match self.reason {
            RejectReason::StaleNonce { expected } => Error::StaleNonce {
                expected,
                got: self.nonce,
            },
            RejectReason::Invalid | RejectReason::Busy => Error::UpdateRejected {
                reason: self.message.clone(),
            },
        }
    }
}
