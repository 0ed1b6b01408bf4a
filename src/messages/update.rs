use super::{ConversionError, ParticipantMessage, RejectReason, UpdateAccepted, UpdateRejected};
use crate::{
    channel::{
        CancelReason, ChannelUpdate, CreateDetails, DepositObservation, NetworkContext,
        ResolveDetails, SetupDetails, Transfer, TransferStatus, UpdateDetails, PARTICIPANTS,
    },
    condition::{self, ConditionType},
    types::{Address, Bytes32, Hash, Signature, U256},
    wire::proto::{self, channel_update_msg::Details, envelope::Msg, RejectCode},
};

fn fixed<T: for<'a> TryFrom<&'a [u8]>>(bytes: &[u8]) -> Result<T, ConversionError> {
    T::try_from(bytes).or(Err(ConversionError::ByteLengthMissmatch))
}

fn amount(bytes: &[u8]) -> Result<U256, ConversionError> {
    if bytes.len() != 32 {
        return Err(ConversionError::ByteLengthMissmatch);
    }
    Ok(U256::from_big_endian(bytes))
}

fn condition_type(code: u32) -> Result<ConditionType, ConversionError> {
    ConditionType::from_code(code).ok_or(ConversionError::UnknownCondition(code))
}

impl From<&Transfer> for proto::TransferMsg {
    fn from(t: &Transfer) -> Self {
        Self {
            transfer_id: t.transfer_id.0.to_vec(),
            channel_address: t.channel_address.0.to_vec(),
            asset_id: t.asset_id.0.to_vec(),
            amount: t.amount.to_be_bytes32().to_vec(),
            condition_type: t.condition_type.code(),
            initial_state: condition::encode_state(&t.initial_state),
            initiator: t.initiator.0.to_vec(),
            responder: t.responder.0.to_vec(),
            recipient: t.recipient.0.to_vec(),
            routing_id: t.routing_id.0.to_vec(),
            expiry: t.expiry,
            meta: t.meta.clone(),
        }
    }
}

impl TryFrom<proto::TransferMsg> for Transfer {
    type Error = ConversionError;

    /// Only newly created transfers travel on the wire, so the result is
    /// always active.
    fn try_from(value: proto::TransferMsg) -> Result<Self, Self::Error> {
        let condition_type = condition_type(value.condition_type)?;
        Ok(Transfer {
            transfer_id: fixed::<Hash>(&value.transfer_id)?,
            channel_address: fixed::<Address>(&value.channel_address)?,
            asset_id: fixed::<Address>(&value.asset_id)?,
            amount: amount(&value.amount)?,
            condition_type,
            initial_state: condition::decode_state(condition_type, &value.initial_state)?,
            initiator: fixed::<Address>(&value.initiator)?,
            responder: fixed::<Address>(&value.responder)?,
            recipient: fixed::<Address>(&value.recipient)?,
            routing_id: fixed::<Bytes32>(&value.routing_id)?,
            expiry: value.expiry,
            meta: value.meta,
            status: TransferStatus::Active,
            resolver: None,
        })
    }
}

impl From<&ChannelUpdate> for proto::ChannelUpdateMsg {
    fn from(u: &ChannelUpdate) -> Self {
        let details = match &u.details {
            UpdateDetails::Setup(d) => Details::Setup(proto::SetupMsg {
                timeout: d.timeout,
                chain_id: d.network.chain_id,
                channel_factory: d.network.channel_factory.0.to_vec(),
            }),
            UpdateDetails::Deposit(o) => Details::Deposit(proto::DepositMsg {
                channel_address: o.channel_address.0.to_vec(),
                participant: o.participant.0.to_vec(),
                asset_id: o.asset_id.0.to_vec(),
                cumulative_total: o.cumulative_total.to_be_bytes32().to_vec(),
                tx_ref: o.tx_ref.0.to_vec(),
            }),
            UpdateDetails::Create(d) => Details::Create((&d.transfer).into()),
            UpdateDetails::Resolve(d) => Details::Resolve(proto::ResolveMsg {
                transfer_id: d.transfer_id.0.to_vec(),
                condition_type: d.resolver.condition_type().code(),
                resolver: condition::encode_resolver(&d.resolver),
            }),
            UpdateDetails::Cancel {
                transfer_id,
                reason,
            } => Details::Cancel(proto::CancelMsg {
                transfer_id: transfer_id.0.to_vec(),
                expired: *reason == CancelReason::Expired,
            }),
        };

        Self {
            channel_address: u.channel_address.0.to_vec(),
            from: u.from.0.to_vec(),
            to: u.to.0.to_vec(),
            nonce: u.nonce,
            signatures: u
                .signatures
                .iter()
                .map(|s| s.map(|s| s.0.to_vec()).unwrap_or_default())
                .collect(),
            details: Some(details),
        }
    }
}

impl TryFrom<proto::ChannelUpdateMsg> for ChannelUpdate {
    type Error = ConversionError;

    fn try_from(value: proto::ChannelUpdateMsg) -> Result<Self, Self::Error> {
        let details = match value.details.ok_or(ConversionError::ExpectedSome)? {
            Details::Setup(d) => UpdateDetails::Setup(SetupDetails {
                network: NetworkContext {
                    chain_id: d.chain_id,
                    channel_factory: fixed(&d.channel_factory)?,
                },
                timeout: d.timeout,
            }),
            Details::Deposit(d) => UpdateDetails::Deposit(DepositObservation {
                channel_address: fixed(&d.channel_address)?,
                participant: fixed(&d.participant)?,
                asset_id: fixed(&d.asset_id)?,
                cumulative_total: amount(&d.cumulative_total)?,
                tx_ref: fixed(&d.tx_ref)?,
            }),
            Details::Create(t) => UpdateDetails::Create(CreateDetails {
                transfer: t.try_into()?,
            }),
            Details::Resolve(d) => UpdateDetails::Resolve(ResolveDetails {
                transfer_id: fixed(&d.transfer_id)?,
                resolver: condition::decode_resolver(
                    condition_type(d.condition_type)?,
                    &d.resolver,
                )?,
            }),
            Details::Cancel(d) => UpdateDetails::Cancel {
                transfer_id: fixed(&d.transfer_id)?,
                reason: if d.expired {
                    CancelReason::Expired
                } else {
                    CancelReason::Cancelled
                },
            },
        };

        if value.signatures.len() != PARTICIPANTS {
            return Err(ConversionError::SignatureCount(PARTICIPANTS));
        }
        let mut signatures = [None; PARTICIPANTS];
        for (slot, bytes) in signatures.iter_mut().zip(&value.signatures) {
            if !bytes.is_empty() {
                *slot = Some(fixed::<Signature>(bytes)?);
            }
        }

        Ok(ChannelUpdate {
            channel_address: fixed(&value.channel_address)?,
            from: fixed(&value.from)?,
            to: fixed(&value.to)?,
            nonce: value.nonce,
            details,
            signatures,
        })
    }
}

impl From<&UpdateRejected> for proto::UpdateRejectedMsg {
    fn from(r: &UpdateRejected) -> Self {
        let (code, expected_nonce) = match r.reason {
            RejectReason::Invalid => (RejectCode::Invalid, 0),
            RejectReason::StaleNonce { expected } => (RejectCode::StaleNonce, expected),
            RejectReason::Busy => (RejectCode::Busy, 0),
        };
        Self {
            channel_address: r.channel_address.0.to_vec(),
            nonce: r.nonce,
            code: code as i32,
            reason: r.message.clone(),
            expected_nonce,
            latest: r.latest.as_ref().map(proto::ChannelUpdateMsg::from),
        }
    }
}

impl TryFrom<proto::UpdateRejectedMsg> for UpdateRejected {
    type Error = ConversionError;

    fn try_from(value: proto::UpdateRejectedMsg) -> Result<Self, Self::Error> {
        let reason = match RejectCode::from_i32(value.code) {
            Some(RejectCode::Invalid) => RejectReason::Invalid,
            Some(RejectCode::StaleNonce) => RejectReason::StaleNonce {
                expected: value.expected_nonce,
            },
            Some(RejectCode::Busy) => RejectReason::Busy,
            None => return Err(ConversionError::UnknownRejectCode(value.code)),
        };
        Ok(UpdateRejected {
            channel_address: fixed(&value.channel_address)?,
            nonce: value.nonce,
            reason,
            message: value.reason,
            latest: value.latest.map(ChannelUpdate::try_from).transpose()?,
        })
    }
}

impl From<&ParticipantMessage> for Msg {
    fn from(msg: &ParticipantMessage) -> Self {
        match msg {
            ParticipantMessage::UpdateProposal(u) => Msg::UpdateProposal(u.into()),
            ParticipantMessage::UpdateAccepted(a) => Msg::UpdateAccepted(proto::UpdateAcceptedMsg {
                channel_address: a.channel_address.0.to_vec(),
                nonce: a.nonce,
                signature: a.signature.0.to_vec(),
            }),
            ParticipantMessage::UpdateRejected(r) => Msg::UpdateRejected(r.into()),
        }
    }
}

impl TryFrom<Msg> for ParticipantMessage {
    type Error = ConversionError;

    fn try_from(value: Msg) -> Result<Self, Self::Error> {
        Ok(match value {
            Msg::UpdateProposal(u) => ParticipantMessage::UpdateProposal(u.try_into()?),
            Msg::UpdateAccepted(a) => ParticipantMessage::UpdateAccepted(UpdateAccepted {
                channel_address: fixed(&a.channel_address)?,
                nonce: a.nonce,
                signature: fixed(&a.signature)?,
            }),
            Msg::UpdateRejected(r) => ParticipantMessage::UpdateRejected(r.try_into()?),
        })
    }
}
