//! Error taxonomy shared by the channel state machine, the engine and the
//! router.

use crate::{
    encoding,
    types::{Address, Hash},
};
use thiserror::Error;

/// Reasons a proposed update is structurally invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidUpdate {
    #[error("update targets channel {got}, expected {expected}")]
    InvalidChannelAddress { expected: Address, got: Address },
    #[error("{0} is not a participant of the channel")]
    NotAParticipant(Address),
    #[error("proposer and counterparty must differ")]
    SameParticipant,
    #[error("channel address does not match participants and chain")]
    AddressDerivationMismatch,
    #[error("timeout must be non-zero")]
    ZeroTimeout,
    #[error("amount must be non-zero")]
    ZeroAmount,
    #[error("asset {0} is not held by the channel")]
    UnknownAsset(Address),
    #[error("transfer {0} already exists")]
    DuplicateTransfer(Hash),
    #[error("initial state is not valid for {0}")]
    InvalidInitialState(&'static str),
    #[error("resolver does not fit condition {0}")]
    InvalidResolver(&'static str),
    #[error("expiry {expiry} is not after {now}")]
    ExpiryInPast { expiry: u64, now: u64 },
    #[error("transfer must be paid by the proposer to the counterparty")]
    TransferParties,
    #[error("transfer id {got} does not match its content, expected {expected}")]
    TransferIdMismatch { expected: Hash, got: Hash },
    #[error("transfer expired at {expiry}, now is {now}")]
    TransferExpired { expiry: u64, now: u64 },
    #[error("only the payee may {0} a transfer")]
    NotPayee(&'static str),
    #[error("transfer expires at {expiry}, now is {now}")]
    NotExpired { expiry: u64, now: u64 },
    #[error("deposit observation is for {0}, who is not a participant")]
    ForeignDeposit(Address),
    #[error("observed deposit total exceeds the on-chain total")]
    DepositExceedsChain,
    #[error("balance arithmetic overflowed")]
    Overflow,
    #[error("update is missing a signature")]
    MissingSignature,
    #[error("participant {0} already signed this update")]
    AlreadySigned(Address),
    #[error("channel factory {0} is not ours")]
    UnknownChannelFactory(Address),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("stale nonce: expected {expected}, got {got}")]
    StaleNonce { expected: u64, got: u64 },
    #[error("invalid signature (recovered {0:?})")]
    InvalidSignature(Option<Address>),
    #[error("channel {0} already exists")]
    ChannelAlreadyExists(Address),
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance {
        have: crate::types::U256,
        need: crate::types::U256,
    },
    #[error("condition not satisfied: {0}")]
    ConditionNotSatisfied(String),
    #[error("transfer {0} not found")]
    TransferNotFound(Hash),
    #[error("deposit already reconciled")]
    StaleDeposit,
    #[error("routing failure: {0}")]
    RoutingFailure(String),
    #[error("countersignature not received in time")]
    Timeout,
    #[error("channel {0} not found")]
    ChannelNotFound(Address),
    #[error("invalid update: {0}")]
    InvalidUpdate(#[from] InvalidUpdate),
    #[error("update rejected by counterparty: {reason}")]
    UpdateRejected { reason: String },
    #[error("encoding failed: {0}")]
    Encoding(#[from] encoding::Error),
    #[error("wire error: {0}")]
    Wire(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether retrying against a freshly read canonical state can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::StaleNonce { .. } | Error::Timeout)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
