//! Canonical channel storage and per-channel serialization.

use crate::{channel::StateChannel, types::Address};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Where a node keeps its canonical channels.
///
/// Values are immutable snapshots: `put` replaces the whole channel, so a
/// reader never sees a half-applied update.
pub trait ChannelStore: Send + Sync {
    fn get(&self, channel_address: &Address) -> Option<Arc<StateChannel>>;

    /// Channel between `a` and `b` (in either role) on `chain_id`.
    fn get_by_participants(
        &self,
        a: Address,
        b: Address,
        chain_id: u64,
    ) -> Option<Arc<StateChannel>>;

    fn put(&self, channel: StateChannel) -> Arc<StateChannel>;

    fn all(&self) -> Vec<Arc<StateChannel>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    channels: DashMap<Address, Arc<StateChannel>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChannelStore for MemoryStore {
    fn get(&self, channel_address: &Address) -> Option<Arc<StateChannel>> {
        self.channels.get(channel_address).map(|c| c.value().clone())
    }

    fn get_by_participants(
        &self,
        a: Address,
        b: Address,
        chain_id: u64,
    ) -> Option<Arc<StateChannel>> {
        self.channels
            .iter()
            .find(|c| {
                let core = &c.core;
                core.network.chain_id == chain_id
                    && ((core.alice == a && core.bob == b) || (core.alice == b && core.bob == a))
            })
            .map(|c| c.value().clone())
    }

    fn put(&self, channel: StateChannel) -> Arc<StateChannel> {
        let channel = Arc::new(channel);
        self.channels.insert(channel.channel_address(), channel.clone());
        channel
    }

    fn all(&self) -> Vec<Arc<StateChannel>> {
        self.channels.iter().map(|c| c.value().clone()).collect()
    }
}

/// One async mutex per channel address.
///
/// Holding a channel's lock is the only way to move it from one canonical
/// state to the next. Locks for different channels are independent; no code
/// path holds two of them at once.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<Address, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn lock_for(&self, channel_address: Address) -> Arc<Mutex<()>> {
        self.locks.entry(channel_address).or_default().clone()
    }

    /// Hand back a lock from [LockRegistry::lock_for]. The entry is dropped
    /// when nobody else holds or waits on it.
    pub fn release(&self, key: Address, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(&key, |_, l| Arc::strong_count(l) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{
        apply_update, ChannelParams, ChannelUpdate, NetworkContext, SetupDetails, UpdateDetails,
    };

    fn channel(alice: Address, bob: Address, chain_id: u64) -> StateChannel {
        let network = NetworkContext {
            chain_id,
            channel_factory: Address::ZERO,
        };
        let address = ChannelParams {
            alice,
            bob,
            network,
        }
        .channel_address()
        .unwrap();
        let update = ChannelUpdate::new(
            address,
            alice,
            bob,
            0,
            UpdateDetails::Setup(SetupDetails {
                network,
                timeout: 10,
            }),
        );
        apply_update(None, &update, 0).unwrap()
    }

    #[test]
    fn lookup_by_participants_ignores_role() {
        let store = MemoryStore::new();
        let (a, b, c) = (Address([1; 20]), Address([2; 20]), Address([3; 20]));
        let ab = store.put(channel(a, b, 5));
        store.put(channel(a, c, 5));

        let found = store.get_by_participants(b, a, 5).unwrap();
        assert_eq!(found.channel_address(), ab.channel_address());
        assert!(store.get_by_participants(a, b, 6).is_none());
        assert!(store.get_by_participants(b, c, 5).is_none());
        assert_eq!(store.all().len(), 2);
    }

    #[tokio::test]
    async fn same_address_shares_a_lock() {
        let locks = LockRegistry::default();
        let first = locks.lock_for(Address([1; 20]));
        let _held = first.lock().await;
        assert!(locks.lock_for(Address([1; 20])).try_lock().is_err());
        assert!(locks.lock_for(Address([2; 20])).try_lock().is_ok());
    }

    #[test]
    fn released_locks_are_forgotten_unless_shared() {
        let locks = LockRegistry::default();
        let key = Address([1; 20]);
        let mine = locks.lock_for(key);
        let theirs = locks.lock_for(key);

        locks.release(key, mine);
        assert_eq!(locks.len(), 1);
        locks.release(key, theirs);
        assert!(locks.is_empty());
    }
}
