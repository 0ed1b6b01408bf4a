use super::{decode_envelope, encode_envelope, BytesTransport, InboundHandler};
use crate::{
    error::{Error, Result},
    types::Address,
};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::{Arc, Weak};
use tracing::debug;

/// In-process network connecting several nodes.
///
/// Requests are decoded on the receiving side and handled in a task of their
/// own, so a sender that gives up waiting does not abort the receiver
/// mid-update.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    peers: DashMap<Address, Weak<dyn InboundHandler>>,
    offline: DashSet<Address>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, addr: Address, handler: Weak<dyn InboundHandler>) {
        self.peers.insert(addr, handler);
    }

    /// While offline, requests to `addr` are never answered.
    pub fn set_offline(&self, addr: Address, offline: bool) {
        if offline {
            self.offline.insert(addr);
        } else {
            self.offline.remove(&addr);
        }
    }
}

#[async_trait]
impl BytesTransport for MemoryNetwork {
    async fn request(&self, to: Address, msg: Vec<u8>) -> Result<Vec<u8>> {
        if self.offline.contains(&to) {
            debug!(%to, "peer offline, dropping request");
            std::future::pending::<()>().await;
        }
        let handler = self
            .peers
            .get(&to)
            .and_then(|h| h.upgrade())
            .ok_or_else(|| Error::Wire(format!("no peer {}", to)))?;

        let (from, recipient, msg) = decode_envelope(&msg)?;
        if recipient != to {
            return Err(Error::Wire(format!("frame for {} sent to {}", recipient, to)));
        }
        let reply = tokio::spawn(async move { handler.handle(from, msg).await })
            .await
            .map_err(|e| Error::Wire(e.to_string()))?;
        encode_envelope(to, from, &reply)
    }
}
