use prost::{bytes::BufMut, Message};

use super::{proto, BytesTransport, ParticipantMessage, Transport};
use crate::{
    error::{Error, Result},
    messages::ConversionError,
    types::Address,
};
use async_trait::async_trait;
use tracing::trace;

const LENGTH_PREFIX: usize = 2;

/// Encode `msg` as a protobuf [proto::Envelope] behind a big-endian `u16`
/// length.
pub fn encode_envelope(from: Address, to: Address, msg: &ParticipantMessage) -> Result<Vec<u8>> {
    let envelope = proto::Envelope {
        sender: from.0.to_vec(),
        recipient: to.0.to_vec(),
        msg: Some(msg.into()),
    };
    // A fixed two byte length, not the LEB128 varint of
    // `encode_length_delimited`.
    let len = envelope.encoded_len();
    let prefix = u16::try_from(len)
        .map_err(|_| Error::Wire(format!("message of {} bytes exceeds the frame limit", len)))?;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX + len);
    buf.put_slice(&prefix.to_be_bytes());
    envelope
        .encode(&mut buf)
        .map_err(|e| Error::Wire(e.to_string()))?;
    Ok(buf)
}

/// Inverse of [encode_envelope], returning sender, recipient and message.
pub fn decode_envelope(buf: &[u8]) -> Result<(Address, Address, ParticipantMessage)> {
    if buf.len() < LENGTH_PREFIX {
        return Err(Error::Wire("frame shorter than its length prefix".into()));
    }
    let (prefix, body) = buf.split_at(LENGTH_PREFIX);
    let len = u16::from_be_bytes([prefix[0], prefix[1]]) as usize;
    if body.len() != len {
        return Err(Error::Wire(format!(
            "frame announces {} bytes, carries {}",
            len,
            body.len()
        )));
    }

    let envelope = proto::Envelope::decode(body).map_err(|e| Error::Wire(e.to_string()))?;
    let sender = Address::try_from(envelope.sender.as_slice())
        .or(Err(ConversionError::ByteLengthMissmatch))?;
    let recipient = Address::try_from(envelope.recipient.as_slice())
        .or(Err(ConversionError::ByteLengthMissmatch))?;
    let msg: ParticipantMessage = envelope.msg.ok_or(ConversionError::ExpectedSome)?.try_into()?;
    Ok((sender, recipient, msg))
}

#[derive(Debug)]
pub struct ProtoBufEncodingLayer<B: BytesTransport> {
    pub bus: B,
}

impl<B: BytesTransport> ProtoBufEncodingLayer<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl<B: BytesTransport> Transport for ProtoBufEncodingLayer<B> {
    async fn request(
        &self,
        from: Address,
        to: Address,
        msg: ParticipantMessage,
    ) -> Result<ParticipantMessage> {
        let buf = encode_envelope(from, to, &msg)?;
        trace!(%to, len = buf.len(), "sending frame");

        let reply = self.bus.request(to, buf).await?;
        let (sender, recipient, msg) = decode_envelope(&reply)?;
        if sender != to || recipient != from {
            return Err(Error::Wire(format!(
                "reply from {} to {}, expected from {} to {}",
                sender, recipient, to, from
            )));
        }
        Ok(msg)
    }
}
