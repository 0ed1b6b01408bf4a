use super::{
    deposit::DepositRecord, merkle::merkle_root, update::ChannelUpdate, PartIdx, PARTICIPANTS,
};
use crate::{
    condition::{self, ConditionType, TransferResolver, TransferState},
    encoding::{self, to_hash},
    sig,
    types::{Address, Bytes32, Hash, U256},
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Chain the channel settles on.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkContext {
    pub chain_id: u64,
    pub channel_factory: Address,
}

/// Everything the channel address is derived from.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelParams {
    pub alice: Address,
    pub bob: Address,
    pub network: NetworkContext,
}

impl ChannelParams {
    /// Deterministic channel address: the tail of the hash over both
    /// participants and the network.
    pub fn channel_address(&self) -> Result<Address, encoding::Error> {
        Ok(to_hash(self)?.into())
    }
}

/// Per-asset balance, indexed like the participants (initiator first).
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Balance {
    pub to: [Address; PARTICIPANTS],
    pub amount: [U256; PARTICIPANTS],
}

impl Balance {
    pub fn total(&self) -> Option<U256> {
        self.amount[0].checked_add(self.amount[1])
    }
}

/// The part of a channel both participants sign.
///
/// `asset_ids`, `balances` and `processed_deposits` are parallel vectors,
/// one entry per asset the channel has seen a deposit in.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CoreChannelState {
    pub channel_address: Address,
    pub network: NetworkContext,
    pub alice: Address,
    pub bob: Address,
    pub asset_ids: Vec<Address>,
    pub balances: Vec<Balance>,
    pub processed_deposits: Vec<[DepositRecord; PARTICIPANTS]>,
    pub nonce: u64,
    /// Commitment to the set of active transfers.
    pub merkle_root: Hash,
    pub timeout: u64,
}

impl CoreChannelState {
    pub fn state_hash(&self) -> Result<Hash, encoding::Error> {
        to_hash(self)
    }

    pub fn participants(&self) -> [Address; PARTICIPANTS] {
        [self.alice, self.bob]
    }

    pub fn part_idx(&self, addr: Address) -> Option<PartIdx> {
        self.participants().iter().position(|p| *p == addr)
    }

    pub fn asset_index(&self, asset_id: Address) -> Option<usize> {
        self.asset_ids.iter().position(|a| *a == asset_id)
    }

    /// Off-chain balance of participant `idx` in `asset_id`, zero for assets
    /// never deposited.
    pub fn balance_of(&self, asset_id: Address, idx: PartIdx) -> U256 {
        self.asset_index(asset_id)
            .map(|i| self.balances[i].amount[idx])
            .unwrap_or_default()
    }

    /// Sum of both participants' reconciled deposits in `asset_id`.
    pub fn total_deposited(&self, asset_id: Address) -> U256 {
        self.asset_index(asset_id)
            .map(|i| {
                let [a, b] = &self.processed_deposits[i];
                a.reconciled_total.saturating_add(b.reconciled_total)
            })
            .unwrap_or_default()
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    Active,
    Resolved,
    Cancelled,
    Expired,
}

/// A conditional payment locked inside one channel.
///
/// `initiator` pays and `responder` gets paid in this channel. `recipient`
/// is the final receiver, which differs from `responder` while the transfer
/// is on an intermediate hop.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub transfer_id: Hash,
    pub channel_address: Address,
    pub asset_id: Address,
    pub amount: U256,
    pub condition_type: ConditionType,
    pub initial_state: TransferState,
    pub initiator: Address,
    pub responder: Address,
    pub recipient: Address,
    pub routing_id: Bytes32,
    /// Absolute unix seconds.
    pub expiry: u64,
    pub meta: BTreeMap<String, String>,
    pub status: TransferStatus,
    pub resolver: Option<TransferResolver>,
}

#[derive(Serialize)]
struct TransferIdPreimage<'a> {
    channel_address: Address,
    asset_id: Address,
    condition_type: ConditionType,
    initial_state: &'a [u8],
    routing_id: Bytes32,
    initiator: Address,
    responder: Address,
}

impl Transfer {
    /// Id of a transfer with the given content. Both sides recompute it, so
    /// it can't be chosen freely by the proposer.
    pub fn compute_id(
        channel_address: Address,
        asset_id: Address,
        initial_state: &TransferState,
        routing_id: Bytes32,
        initiator: Address,
        responder: Address,
    ) -> Result<Hash, encoding::Error> {
        to_hash(&TransferIdPreimage {
            channel_address,
            asset_id,
            condition_type: initial_state.condition_type(),
            initial_state: &condition::encode_state(initial_state),
            routing_id,
            initiator,
            responder,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == TransferStatus::Active
    }

    /// Merkle leaf of this transfer.
    pub fn commitment(&self) -> Result<Hash, encoding::Error> {
        to_hash(&(
            self.transfer_id,
            self.asset_id,
            self.amount,
            self.initiator,
            self.responder,
            self.expiry,
        ))
    }
}

/// A channel as stored by one participant: the signed core state, the update
/// that produced it and the transfer book.
///
/// Stored values are never mutated; every transition builds a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChannel {
    pub core: CoreChannelState,
    /// Carries both participants' signatures over `core` once canonical.
    pub latest_update: ChannelUpdate,
    /// Every transfer the channel has seen, settled ones included.
    pub transfers: Vec<Transfer>,
}

impl StateChannel {
    pub fn channel_address(&self) -> Address {
        self.core.channel_address
    }

    pub fn nonce(&self) -> u64 {
        self.core.nonce
    }

    pub fn participants(&self) -> [Address; PARTICIPANTS] {
        self.core.participants()
    }

    pub fn counterparty_of(&self, addr: Address) -> Option<Address> {
        match self.core.part_idx(addr)? {
            0 => Some(self.core.bob),
            _ => Some(self.core.alice),
        }
    }

    pub fn transfer(&self, transfer_id: Hash) -> Option<&Transfer> {
        self.transfers.iter().find(|t| t.transfer_id == transfer_id)
    }

    pub fn active_transfer(&self, transfer_id: Hash) -> Option<&Transfer> {
        self.transfer(transfer_id).filter(|t| t.is_active())
    }

    pub fn active_transfers(&self) -> impl Iterator<Item = &Transfer> {
        self.transfers.iter().filter(|t| t.is_active())
    }

    /// Amount locked in active transfers of `asset_id`.
    pub fn locked(&self, asset_id: Address) -> U256 {
        self.active_transfers()
            .filter(|t| t.asset_id == asset_id)
            .fold(U256::zero(), |acc, t| acc.saturating_add(t.amount))
    }

    pub fn compute_merkle_root(&self) -> Result<Hash, encoding::Error> {
        let leaves = self
            .active_transfers()
            .map(Transfer::commitment)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(merkle_root(leaves))
    }

    /// Funds held off-chain equal reconciled deposits, per asset.
    pub fn is_conserved(&self) -> bool {
        self.core.asset_ids.iter().enumerate().all(|(i, asset)| {
            let held = self.core.balances[i]
                .total()
                .and_then(|b| b.checked_add(self.locked(*asset)));
            held == Some(self.core.total_deposited(*asset))
        })
    }

    /// Both participants signed the current core state.
    pub fn is_fully_signed(&self) -> bool {
        let Ok(hash) = self.core.state_hash() else {
            return false;
        };
        self.participants()
            .iter()
            .zip(self.latest_update.signatures.iter())
            .all(|(p, s)| matches!(s, Some(s) if sig::verify(hash, *s, *p)))
    }
}
