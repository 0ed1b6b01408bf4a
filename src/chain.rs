//! Read access to on-chain deposits.

use crate::{
    channel::DepositObservation,
    error::Result,
    types::{Address, Hash, U256},
};
use async_trait::async_trait;
use dashmap::DashMap;
use sha3::{Digest, Keccak256};
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of deposit observations.
///
/// The proposer of a deposit update reads its own total from here, and the
/// counterparty checks the claimed total against its own view before
/// countersigning.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Latest cumulative deposit of `participant` into `channel` in
    /// `asset_id`, or `None` if there never was one.
    async fn latest_deposit(
        &self,
        channel: Address,
        participant: Address,
        asset_id: Address,
    ) -> Result<Option<DepositObservation>>;
}

/// In-memory chain shared by all nodes of a test network.
#[derive(Debug, Default)]
pub struct MemoryChain {
    deposits: DashMap<(Address, Address, Address), DepositObservation>,
    tx_counter: AtomicU64,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an on-chain deposit of `amount`, returning the new cumulative
    /// observation.
    pub fn deposit(
        &self,
        channel: Address,
        participant: Address,
        asset_id: Address,
        amount: U256,
    ) -> DepositObservation {
        let tx = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        let tx_ref = Hash(Keccak256::digest(tx.to_be_bytes()).into());

        let mut entry = self
            .deposits
            .entry((channel, participant, asset_id))
            .or_insert(DepositObservation {
                channel_address: channel,
                participant,
                asset_id,
                cumulative_total: U256::zero(),
                tx_ref: Hash::ZERO,
            });
        entry.cumulative_total = entry.cumulative_total.saturating_add(amount);
        entry.tx_ref = tx_ref;
        *entry
    }
}

#[async_trait]
impl ChainReader for MemoryChain {
    async fn latest_deposit(
        &self,
        channel: Address,
        participant: Address,
        asset_id: Address,
    ) -> Result<Option<DepositObservation>> {
        Ok(self
            .deposits
            .get(&(channel, participant, asset_id))
            .map(|o| *o))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deposits_accumulate() {
        let chain = MemoryChain::new();
        let (ch, p) = (Address([1; 20]), Address([2; 20]));
        assert!(chain.latest_deposit(ch, p, Address::ZERO).await.unwrap().is_none());

        let first = chain.deposit(ch, p, Address::ZERO, U256::from(10));
        let second = chain.deposit(ch, p, Address::ZERO, U256::from(5));
        assert_eq!(second.cumulative_total, U256::from(15));
        assert_ne!(first.tx_ref, second.tx_ref);

        let seen = chain.latest_deposit(ch, p, Address::ZERO).await.unwrap();
        assert_eq!(seen, Some(second));
    }
}
