//! Transport between participants.
//!
//! The engine talks [ParticipantMessage]s through a [Transport]. The
//! [ProtoBufEncodingLayer] turns those into length-prefixed protobuf bytes for
//! any [BytesTransport], so a network implementation only has to move bytes.

mod encoding;
mod memory;
pub mod proto;

pub use encoding::{decode_envelope, encode_envelope, ProtoBufEncodingLayer};
pub use memory::MemoryNetwork;

use crate::{error::Result, messages::ParticipantMessage, types::Address};
use async_trait::async_trait;
use core::fmt::Debug;
use std::sync::Arc;

/// Byte-level request/reply channel to other nodes.
#[async_trait]
pub trait BytesTransport: Send + Sync + Debug {
    /// Deliver `msg` to `to` and wait for the reply bytes.
    async fn request(&self, to: Address, msg: Vec<u8>) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: BytesTransport + ?Sized> BytesTransport for Arc<T> {
    async fn request(&self, to: Address, msg: Vec<u8>) -> Result<Vec<u8>> {
        (**self).request(to, msg).await
    }
}

/// Message-level request/reply channel, what the engine uses.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn request(
        &self,
        from: Address,
        to: Address,
        msg: ParticipantMessage,
    ) -> Result<ParticipantMessage>;
}

/// Receiving side: answers a request from `from`.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, from: Address, msg: ParticipantMessage) -> ParticipantMessage;
}
