use super::{
    deposit::{reconcile, DepositObservation, DepositRecord},
    state::{
        Balance, ChannelParams, CoreChannelState, NetworkContext, StateChannel, Transfer,
        TransferStatus,
    },
    PartIdx, PARTICIPANTS,
};
use crate::{
    condition::{self, Outcome, TransferResolver},
    error::{Error, InvalidUpdate, Result},
    types::{Address, Hash, Signature, U256},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateType {
    Setup,
    Deposit,
    Create,
    Resolve,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupDetails {
    pub network: NetworkContext,
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateDetails {
    pub transfer: Transfer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveDetails {
    pub transfer_id: Hash,
    pub resolver: TransferResolver,
}

/// Why a transfer is closed without resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The payee gave up on it.
    Cancelled,
    /// Its expiry passed.
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDetails {
    Setup(SetupDetails),
    Deposit(DepositObservation),
    Create(CreateDetails),
    Resolve(ResolveDetails),
    Cancel {
        transfer_id: Hash,
        reason: CancelReason,
    },
}

/// An update from `from` to `to`, moving the channel to `nonce`.
///
/// `signatures` is indexed like the participants and covers the core state
/// the update produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub channel_address: Address,
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub details: UpdateDetails,
    pub signatures: [Option<Signature>; PARTICIPANTS],
}

impl ChannelUpdate {
    pub fn new(
        channel_address: Address,
        from: Address,
        to: Address,
        nonce: u64,
        details: UpdateDetails,
    ) -> Self {
        ChannelUpdate {
            channel_address,
            from,
            to,
            nonce,
            details,
            signatures: [None; PARTICIPANTS],
        }
    }

    pub fn update_type(&self) -> UpdateType {
        match self.details {
            UpdateDetails::Setup(_) => UpdateType::Setup,
            UpdateDetails::Deposit(_) => UpdateType::Deposit,
            UpdateDetails::Create(_) => UpdateType::Create,
            UpdateDetails::Resolve(_) => UpdateType::Resolve,
            UpdateDetails::Cancel { .. } => UpdateType::Cancel,
        }
    }

    /// Same update without any signatures.
    pub fn unsigned(&self) -> Self {
        ChannelUpdate {
            signatures: [None; PARTICIPANTS],
            ..self.clone()
        }
    }
}

/// The channel transition function.
///
/// Checks `update` against the canonical state `prev` (`None` before setup)
/// and returns the unsigned next state. Pure apart from `now`, which only
/// gates expiry checks and never ends up in the result, so both participants
/// compute identical states from the same update.
pub fn apply_update(
    prev: Option<&StateChannel>,
    update: &ChannelUpdate,
    now: u64,
) -> Result<StateChannel> {
    if let UpdateDetails::Setup(details) = &update.details {
        return apply_setup(prev, update, details);
    }

    let prev = prev.ok_or(Error::ChannelNotFound(update.channel_address))?;
    if update.channel_address != prev.channel_address() {
        return Err(InvalidUpdate::InvalidChannelAddress {
            expected: prev.channel_address(),
            got: update.channel_address,
        }
        .into());
    }
    let expected = prev.nonce() + 1;
    if update.nonce != expected {
        return Err(Error::StaleNonce {
            expected,
            got: update.nonce,
        });
    }
    let from_idx = part_idx(&prev.core, update.from)?;
    if part_idx(&prev.core, update.to)? == from_idx {
        return Err(InvalidUpdate::SameParticipant.into());
    }

    let mut next = prev.clone();
    match &update.details {
        UpdateDetails::Setup(_) => return Err(Error::ChannelAlreadyExists(update.channel_address)),
        UpdateDetails::Deposit(observation) => apply_deposit(&mut next.core, observation)?,
        UpdateDetails::Create(details) => {
            apply_create(&mut next, update, from_idx, details, now)?
        }
        UpdateDetails::Resolve(details) => apply_resolve(&mut next, update, details, now)?,
        UpdateDetails::Cancel {
            transfer_id,
            reason,
        } => apply_cancel(&mut next, update, *transfer_id, *reason, now)?,
    }

    next.core.nonce = update.nonce;
    next.core.merkle_root = next.compute_merkle_root()?;
    next.latest_update = update.unsigned();
    Ok(next)
}

fn part_idx(core: &CoreChannelState, addr: Address) -> Result<PartIdx> {
    Ok(core
        .part_idx(addr)
        .ok_or(InvalidUpdate::NotAParticipant(addr))?)
}

fn apply_setup(
    prev: Option<&StateChannel>,
    update: &ChannelUpdate,
    details: &SetupDetails,
) -> Result<StateChannel> {
    if prev.is_some() {
        return Err(Error::ChannelAlreadyExists(update.channel_address));
    }
    if update.nonce != 0 {
        return Err(Error::StaleNonce {
            expected: 0,
            got: update.nonce,
        });
    }
    if update.from == update.to {
        return Err(InvalidUpdate::SameParticipant.into());
    }
    if details.timeout == 0 {
        return Err(InvalidUpdate::ZeroTimeout.into());
    }
    let params = ChannelParams {
        alice: update.from,
        bob: update.to,
        network: details.network,
    };
    if params.channel_address()? != update.channel_address {
        return Err(InvalidUpdate::AddressDerivationMismatch.into());
    }

    Ok(StateChannel {
        core: CoreChannelState {
            channel_address: update.channel_address,
            network: details.network,
            alice: params.alice,
            bob: params.bob,
            asset_ids: Vec::new(),
            balances: Vec::new(),
            processed_deposits: Vec::new(),
            nonce: 0,
            merkle_root: Hash::ZERO,
            timeout: details.timeout,
        },
        latest_update: update.unsigned(),
        transfers: Vec::new(),
    })
}

fn apply_deposit(core: &mut CoreChannelState, observation: &DepositObservation) -> Result<()> {
    if observation.channel_address != core.channel_address {
        return Err(InvalidUpdate::InvalidChannelAddress {
            expected: core.channel_address,
            got: observation.channel_address,
        }
        .into());
    }
    let idx = core
        .part_idx(observation.participant)
        .ok_or(InvalidUpdate::ForeignDeposit(observation.participant))?;

    let asset = match core.asset_index(observation.asset_id) {
        Some(i) => i,
        None => {
            let to = core.participants();
            core.asset_ids.push(observation.asset_id);
            core.balances.push(Balance {
                to,
                amount: [U256::zero(); PARTICIPANTS],
            });
            core.processed_deposits.push([DepositRecord::default(); PARTICIPANTS]);
            core.asset_ids.len() - 1
        }
    };

    let (record, credit) = reconcile(&core.processed_deposits[asset][idx], observation)?;
    core.processed_deposits[asset][idx] = record;
    credit_balance(&mut core.balances[asset], idx, credit)
}

fn apply_create(
    next: &mut StateChannel,
    update: &ChannelUpdate,
    payer: PartIdx,
    details: &CreateDetails,
    now: u64,
) -> Result<()> {
    let t = &details.transfer;
    if t.channel_address != next.channel_address() {
        return Err(InvalidUpdate::InvalidChannelAddress {
            expected: next.channel_address(),
            got: t.channel_address,
        }
        .into());
    }
    if t.initiator != update.from || t.responder != update.to {
        return Err(InvalidUpdate::TransferParties.into());
    }
    if t.amount.is_zero() {
        return Err(InvalidUpdate::ZeroAmount.into());
    }
    if t.status != TransferStatus::Active || t.resolver.is_some() {
        return Err(InvalidUpdate::InvalidInitialState(t.condition_type.name()).into());
    }
    condition::validate_initial_state(t.condition_type, &t.initial_state)?;
    if t.expiry <= now {
        return Err(InvalidUpdate::ExpiryInPast {
            expiry: t.expiry,
            now,
        }
        .into());
    }

    let id = Transfer::compute_id(
        t.channel_address,
        t.asset_id,
        &t.initial_state,
        t.routing_id,
        t.initiator,
        t.responder,
    )?;
    if id != t.transfer_id {
        return Err(InvalidUpdate::TransferIdMismatch {
            expected: id,
            got: t.transfer_id,
        }
        .into());
    }
    if next.transfer(id).is_some() {
        return Err(InvalidUpdate::DuplicateTransfer(id).into());
    }

    let have = next.core.balance_of(t.asset_id, payer);
    if have < t.amount {
        return Err(Error::InsufficientBalance {
            have,
            need: t.amount,
        });
    }
    // `have` is non-zero, so the asset is known.
    let asset = next
        .core
        .asset_index(t.asset_id)
        .ok_or(InvalidUpdate::UnknownAsset(t.asset_id))?;
    next.core.balances[asset].amount[payer] = have - t.amount;
    next.transfers.push(t.clone());
    Ok(())
}

fn apply_resolve(
    next: &mut StateChannel,
    update: &ChannelUpdate,
    details: &ResolveDetails,
    now: u64,
) -> Result<()> {
    let pos = active_position(next, details.transfer_id)?;
    let t = &next.transfers[pos];
    if update.from != t.responder {
        return Err(InvalidUpdate::NotPayee("resolve").into());
    }
    if now >= t.expiry {
        return Err(InvalidUpdate::TransferExpired {
            expiry: t.expiry,
            now,
        }
        .into());
    }
    if details.resolver.condition_type() != t.condition_type {
        return Err(InvalidUpdate::InvalidResolver(t.condition_type.name()).into());
    }

    let delta = match condition::resolve(
        t.condition_type,
        &t.initial_state,
        &details.resolver,
        t.amount,
    ) {
        Outcome::Success(delta) => delta,
        Outcome::Failure(reason) => return Err(Error::ConditionNotSatisfied(reason)),
    };
    if delta.to_payee.checked_add(delta.to_payer) != Some(t.amount) {
        return Err(InvalidUpdate::Overflow.into());
    }

    let (asset, payer, payee) = settlement_indices(next, pos)?;
    credit_balance(&mut next.core.balances[asset], payee, delta.to_payee)?;
    credit_balance(&mut next.core.balances[asset], payer, delta.to_payer)?;

    let t = &mut next.transfers[pos];
    t.status = TransferStatus::Resolved;
    t.resolver = Some(details.resolver.clone());
    Ok(())
}

fn apply_cancel(
    next: &mut StateChannel,
    update: &ChannelUpdate,
    transfer_id: Hash,
    reason: CancelReason,
    now: u64,
) -> Result<()> {
    let pos = active_position(next, transfer_id)?;
    let t = &next.transfers[pos];
    let status = match reason {
        CancelReason::Cancelled if update.from != t.responder => {
            return Err(InvalidUpdate::NotPayee("cancel").into())
        }
        CancelReason::Cancelled => TransferStatus::Cancelled,
        CancelReason::Expired if now < t.expiry => {
            return Err(InvalidUpdate::NotExpired {
                expiry: t.expiry,
                now,
            }
            .into())
        }
        CancelReason::Expired => TransferStatus::Expired,
    };
    let amount = t.amount;

    let (asset, payer, _) = settlement_indices(next, pos)?;
    credit_balance(&mut next.core.balances[asset], payer, amount)?;
    next.transfers[pos].status = status;
    Ok(())
}

fn active_position(channel: &StateChannel, transfer_id: Hash) -> Result<usize> {
    channel
        .transfers
        .iter()
        .position(|t| t.transfer_id == transfer_id && t.is_active())
        .ok_or(Error::TransferNotFound(transfer_id))
}

/// Asset index, payer index and payee index of the transfer at `pos`.
fn settlement_indices(channel: &StateChannel, pos: usize) -> Result<(usize, PartIdx, PartIdx)> {
    let t = &channel.transfers[pos];
    let asset = channel
        .core
        .asset_index(t.asset_id)
        .ok_or(InvalidUpdate::UnknownAsset(t.asset_id))?;
    Ok((
        asset,
        part_idx(&channel.core, t.initiator)?,
        part_idx(&channel.core, t.responder)?,
    ))
}

fn credit_balance(balance: &mut Balance, idx: PartIdx, amount: U256) -> Result<()> {
    balance.amount[idx] = balance.amount[idx]
        .checked_add(amount)
        .ok_or(InvalidUpdate::Overflow)?;
    Ok(())
}
