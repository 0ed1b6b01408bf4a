//! Per-participant node core.
//!
//! A [ChannelEngine] owns one participant's channels. Local operations are
//! turned into [ChannelUpdate]s, applied provisionally, signed and sent to the
//! counterparty; inbound proposals are validated against the local canonical
//! state and countersigned. Either way a channel only moves once both
//! signatures are present, and only while its lock is held.

use crate::{
    chain::ChainReader,
    channel::{
        apply_update, CancelReason, ChannelParams, ChannelUpdate, CreateDetails,
        DepositObservation, NetworkContext, ProposedUpdate, ResolveDetails, SetupDetails,
        StateChannel, Transfer, TransferStatus, UpdateDetails, UpdateType,
    },
    clock::Clock,
    condition::{TransferResolver, TransferState},
    config::NodeConfig,
    error::{Error, InvalidUpdate, Result},
    messages::{ParticipantMessage, RejectReason, UpdateAccepted, UpdateRejected},
    sig::ChannelSigner,
    store::{ChannelStore, LockRegistry, MemoryStore},
    types::{Address, Bytes32, Hash, Signature, U256},
    wire::{InboundHandler, Transport},
};
use async_trait::async_trait;
use std::{collections::BTreeMap, fmt, sync::Arc};
use tokio::{sync::broadcast, time::timeout};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 1024;

/// What a caller can ask the engine to do with an existing channel.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Credit an on-chain deposit. Without an explicit observation the
    /// engine reads its own latest deposit from the chain.
    Deposit {
        asset_id: Address,
        observation: Option<DepositObservation>,
    },
    CreateTransfer(CreateTransferParams),
    ResolveTransfer {
        transfer_id: Hash,
        resolver: TransferResolver,
    },
    /// Give up a transfer we are the payee of.
    CancelTransfer { transfer_id: Hash },
    /// Close a transfer whose expiry has passed.
    ExpireTransfer { transfer_id: Hash },
}

/// A new conditional transfer paid by us to the counterparty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTransferParams {
    pub asset_id: Address,
    pub amount: U256,
    pub initial_state: TransferState,
    /// Final receiver; the counterparty itself or someone it forwards to.
    pub recipient: Address,
    pub routing_id: Bytes32,
    /// Absolute unix seconds.
    pub expiry: u64,
    pub meta: BTreeMap<String, String>,
}

/// Emitted after every commit, on both participants.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ChannelUpdated {
        channel: Arc<StateChannel>,
        update_type: UpdateType,
    },
    TransferCreated {
        channel_address: Address,
        transfer: Transfer,
    },
    /// `transfer.resolver` holds the value that resolved it.
    TransferResolved {
        channel_address: Address,
        transfer: Transfer,
    },
    /// `transfer.status` tells cancelled and expired apart.
    TransferCancelled {
        channel_address: Address,
        transfer: Transfer,
    },
}

pub struct ChannelEngine {
    config: NodeConfig,
    signer: Arc<dyn ChannelSigner>,
    store: Arc<dyn ChannelStore>,
    locks: LockRegistry,
    /// Keyed by participant pair, so crossing setups contend.
    setup_locks: LockRegistry,
    transport: Arc<dyn Transport>,
    chain: Arc<dyn ChainReader>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<EngineEvent>,
}

impl fmt::Debug for ChannelEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelEngine")
            .field("address", &self.address())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ChannelEngine {
    pub fn new(
        config: NodeConfig,
        signer: Arc<dyn ChannelSigner>,
        transport: Arc<dyn Transport>,
        chain: Arc<dyn ChainReader>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(ChannelEngine {
            config,
            signer,
            store: Arc::new(MemoryStore::new()),
            locks: LockRegistry::default(),
            setup_locks: LockRegistry::default(),
            transport,
            chain,
            clock,
            events,
        })
    }

    pub fn with_store(mut self, store: Arc<dyn ChannelStore>) -> Self {
        self.store = store;
        self
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn get_channel(&self, channel_address: &Address) -> Result<Arc<StateChannel>> {
        self.store
            .get(channel_address)
            .ok_or(Error::ChannelNotFound(*channel_address))
    }

    pub fn get_channel_by_participants(
        &self,
        a: Address,
        b: Address,
        chain_id: u64,
    ) -> Result<Arc<StateChannel>> {
        self.store
            .get_by_participants(a, b, chain_id)
            .ok_or_else(|| {
                let network = NetworkContext {
                    chain_id,
                    channel_factory: self.config.channel_factory,
                };
                let address = ChannelParams {
                    alice: a,
                    bob: b,
                    network,
                }
                .channel_address()
                .unwrap_or_default();
                Error::ChannelNotFound(address)
            })
    }

    pub fn channels(&self) -> Vec<Arc<StateChannel>> {
        self.store.all()
    }

    pub fn active_transfers(&self, channel_address: &Address) -> Result<Vec<Transfer>> {
        Ok(self
            .get_channel(channel_address)?
            .active_transfers()
            .cloned()
            .collect())
    }

    /// Open a channel with `counterparty`, who becomes the responder.
    pub async fn setup(
        &self,
        counterparty: Address,
        chain_id: u64,
        timeout: u64,
    ) -> Result<Arc<StateChannel>> {
        let me = self.address();
        let network = NetworkContext {
            chain_id,
            channel_factory: self.config.channel_factory,
        };
        let channel_address = ChannelParams {
            alice: me,
            bob: counterparty,
            network,
        }
        .channel_address()?;

        let key = pair_key(me, counterparty, network)?;
        let lock = self.setup_locks.lock_for(key);
        let guard = lock.lock().await;
        let result = match self.store.get_by_participants(me, counterparty, chain_id) {
            Some(existing) => Err(Error::ChannelAlreadyExists(existing.channel_address())),
            None => {
                let update = ChannelUpdate::new(
                    channel_address,
                    me,
                    counterparty,
                    0,
                    UpdateDetails::Setup(SetupDetails { network, timeout }),
                );
                self.propose(None, update).await
            }
        };
        drop(guard);
        self.setup_locks.release(key, lock);
        result
    }

    pub async fn deposit(
        &self,
        channel_address: Address,
        asset_id: Address,
    ) -> Result<Arc<StateChannel>> {
        self.submit_operation(
            channel_address,
            Operation::Deposit {
                asset_id,
                observation: None,
            },
        )
        .await
    }

    /// Lock `params.amount` in a new transfer to the counterparty and return
    /// it as committed.
    pub async fn create_transfer(
        &self,
        channel_address: Address,
        params: CreateTransferParams,
    ) -> Result<Transfer> {
        let channel = self
            .submit_operation(channel_address, Operation::CreateTransfer(params.clone()))
            .await?;
        let me = self.address();
        let counterparty = channel
            .counterparty_of(me)
            .ok_or(InvalidUpdate::NotAParticipant(me))?;
        let id = Transfer::compute_id(
            channel_address,
            params.asset_id,
            &params.initial_state,
            params.routing_id,
            me,
            counterparty,
        )?;
        channel
            .transfer(id)
            .cloned()
            .ok_or(Error::TransferNotFound(id))
    }

    pub async fn resolve_transfer(
        &self,
        channel_address: Address,
        transfer_id: Hash,
        resolver: TransferResolver,
    ) -> Result<Arc<StateChannel>> {
        self.submit_operation(
            channel_address,
            Operation::ResolveTransfer {
                transfer_id,
                resolver,
            },
        )
        .await
    }

    /// Resolve the active transfer paying us that carries `routing_id`.
    pub async fn resolve_by_routing_id(
        &self,
        channel_address: Address,
        routing_id: Bytes32,
        resolver: TransferResolver,
    ) -> Result<Arc<StateChannel>> {
        let me = self.address();
        let transfer_id = self
            .get_channel(&channel_address)?
            .active_transfers()
            .find(|t| t.routing_id == routing_id && t.responder == me)
            .map(|t| t.transfer_id)
            .ok_or(Error::TransferNotFound(Hash(routing_id.0)))?;
        self.resolve_transfer(channel_address, transfer_id, resolver)
            .await
    }

    pub async fn cancel_transfer(
        &self,
        channel_address: Address,
        transfer_id: Hash,
    ) -> Result<Arc<StateChannel>> {
        self.submit_operation(channel_address, Operation::CancelTransfer { transfer_id })
            .await
    }

    pub async fn expire_transfer(
        &self,
        channel_address: Address,
        transfer_id: Hash,
    ) -> Result<Arc<StateChannel>> {
        self.submit_operation(channel_address, Operation::ExpireTransfer { transfer_id })
            .await
    }

    /// Run `op` on a channel and return the new canonical state.
    ///
    /// Serialized per channel. If the counterparty is one update ahead and
    /// hands us that update, we catch up and retry once.
    pub async fn submit_operation(
        &self,
        channel_address: Address,
        op: Operation,
    ) -> Result<Arc<StateChannel>> {
        // No lock entries for channels we don't hold.
        self.get_channel(&channel_address)?;
        let lock = self.locks.lock_for(channel_address);
        let _guard = lock.lock().await;

        let current = self.get_channel(&channel_address)?;
        let update = self.build_update(&current, op.clone()).await?;
        match self.propose(Some(current.clone()), update).await {
            Err(Error::StaleNonce { .. })
                if self
                    .store
                    .get(&channel_address)
                    .map_or(false, |c| c.nonce() > current.nonce()) =>
            {
                debug!(channel = %channel_address, "caught up with counterparty, retrying");
                let current = self.get_channel(&channel_address)?;
                let update = self.build_update(&current, op).await?;
                self.propose(Some(current), update).await
            }
            other => other,
        }
    }

    async fn build_update(&self, current: &StateChannel, op: Operation) -> Result<ChannelUpdate> {
        let me = self.address();
        let channel_address = current.channel_address();
        let counterparty = current
            .counterparty_of(me)
            .ok_or(InvalidUpdate::NotAParticipant(me))?;

        let details = match op {
            Operation::Deposit {
                asset_id,
                observation,
            } => {
                let observation = match observation {
                    Some(o) => o,
                    None => self
                        .chain
                        .latest_deposit(channel_address, me, asset_id)
                        .await?
                        .ok_or(Error::StaleDeposit)?,
                };
                UpdateDetails::Deposit(observation)
            }
            Operation::CreateTransfer(p) => {
                let transfer_id = Transfer::compute_id(
                    channel_address,
                    p.asset_id,
                    &p.initial_state,
                    p.routing_id,
                    me,
                    counterparty,
                )?;
                UpdateDetails::Create(CreateDetails {
                    transfer: Transfer {
                        transfer_id,
                        channel_address,
                        asset_id: p.asset_id,
                        amount: p.amount,
                        condition_type: p.initial_state.condition_type(),
                        initial_state: p.initial_state,
                        initiator: me,
                        responder: counterparty,
                        recipient: p.recipient,
                        routing_id: p.routing_id,
                        expiry: p.expiry,
                        meta: p.meta,
                        status: TransferStatus::Active,
                        resolver: None,
                    },
                })
            }
            Operation::ResolveTransfer {
                transfer_id,
                resolver,
            } => UpdateDetails::Resolve(ResolveDetails {
                transfer_id,
                resolver,
            }),
            Operation::CancelTransfer { transfer_id } => UpdateDetails::Cancel {
                transfer_id,
                reason: CancelReason::Cancelled,
            },
            Operation::ExpireTransfer { transfer_id } => UpdateDetails::Cancel {
                transfer_id,
                reason: CancelReason::Expired,
            },
        };

        Ok(ChannelUpdate::new(
            channel_address,
            me,
            counterparty,
            current.nonce() + 1,
            details,
        ))
    }

    /// Apply, sign, send and wait for the countersignature. Caller holds the
    /// channel lock.
    async fn propose(
        &self,
        prev: Option<Arc<StateChannel>>,
        update: ChannelUpdate,
    ) -> Result<Arc<StateChannel>> {
        let me = self.address();
        let channel_address = update.channel_address;
        let next = apply_update(prev.as_deref(), &update, self.now())?;
        let mut proposal = ProposedUpdate::new(next)?;
        proposal.sign(self.signer.as_ref())?;

        debug!(
            channel = %channel_address,
            nonce = update.nonce,
            kind = ?update.update_type(),
            "proposing update"
        );
        let msg = ParticipantMessage::UpdateProposal(proposal.signed_update());
        let reply = match timeout(
            self.config.countersign_timeout(),
            self.transport.request(me, update.to, msg),
        )
        .await
        {
            Ok(reply) => reply?,
            Err(_) => {
                warn!(channel = %channel_address, nonce = update.nonce, "countersignature timed out");
                return Err(Error::Timeout);
            }
        };

        match reply {
            ParticipantMessage::UpdateAccepted(acc) => {
                if acc.channel_address != channel_address || acc.nonce != proposal.nonce() {
                    return Err(Error::Wire(format!(
                        "acceptance for {} at {} does not match proposal",
                        acc.channel_address, acc.nonce
                    )));
                }
                proposal.add_signature(update.to, acc.signature)?;
                Ok(self.commit(proposal.build()?))
            }
            ParticipantMessage::UpdateRejected(rejection) => {
                warn!(
                    channel = %channel_address,
                    nonce = update.nonce,
                    reason = %rejection.message,
                    "update rejected"
                );
                if let (RejectReason::StaleNonce { .. }, Some(latest), Some(prev)) =
                    (rejection.reason, &rejection.latest, &prev)
                {
                    if let Err(e) = self.sync(prev, latest) {
                        warn!(channel = %channel_address, error = %e, "could not catch up");
                    }
                }
                Err(rejection.to_error())
            }
            ParticipantMessage::UpdateProposal(_) => {
                Err(Error::Wire("counterparty replied with a proposal".into()))
            }
        }
    }

    /// Adopt the counterparty's double-signed update one nonce ahead of
    /// `prev`. Caller holds the channel lock.
    fn sync(&self, prev: &StateChannel, latest: &ChannelUpdate) -> Result<()> {
        let expected = prev.nonce() + 1;
        if latest.nonce != expected {
            return Err(Error::StaleNonce {
                expected,
                got: latest.nonce,
            });
        }
        let next = apply_update(Some(prev), latest, self.now())?;
        let participants = next.participants();
        let mut proposal = ProposedUpdate::new(next)?;
        for (participant, sig) in participants.iter().zip(latest.signatures.iter()) {
            let sig = sig.ok_or(InvalidUpdate::MissingSignature)?;
            proposal.add_signature(*participant, sig)?;
        }
        info!(channel = %latest.channel_address, nonce = latest.nonce, "synced from counterparty");
        self.commit(proposal.build()?);
        Ok(())
    }

    fn commit(&self, channel: StateChannel) -> Arc<StateChannel> {
        let channel = self.store.put(channel);
        let update = &channel.latest_update;
        info!(
            channel = %channel.channel_address(),
            nonce = channel.nonce(),
            kind = ?update.update_type(),
            "committed"
        );

        let channel_address = channel.channel_address();
        let transfer_event = match &update.details {
            UpdateDetails::Create(d) => Some(EngineEvent::TransferCreated {
                channel_address,
                transfer: d.transfer.clone(),
            }),
            UpdateDetails::Resolve(d) => {
                channel
                    .transfer(d.transfer_id)
                    .map(|t| EngineEvent::TransferResolved {
                        channel_address,
                        transfer: t.clone(),
                    })
            }
            UpdateDetails::Cancel { transfer_id, .. } => {
                channel
                    .transfer(*transfer_id)
                    .map(|t| EngineEvent::TransferCancelled {
                        channel_address,
                        transfer: t.clone(),
                    })
            }
            UpdateDetails::Setup(_) | UpdateDetails::Deposit(_) => None,
        };

        // Sending only fails without subscribers.
        let _ = self.events.send(EngineEvent::ChannelUpdated {
            channel: channel.clone(),
            update_type: update.update_type(),
        });
        if let Some(event) = transfer_event {
            let _ = self.events.send(event);
        }
        channel
    }

    async fn countersign(&self, from: Address, update: &ChannelUpdate) -> Result<Signature> {
        let me = self.address();
        if update.from != from {
            return Err(InvalidUpdate::NotAParticipant(from).into());
        }
        if update.to != me {
            return Err(InvalidUpdate::NotAParticipant(update.to).into());
        }
        match &update.details {
            UpdateDetails::Deposit(observation) => self.check_deposit(observation).await?,
            UpdateDetails::Setup(details) => self.check_setup(from, details)?,
            _ => {}
        }

        let prev = self.store.get(&update.channel_address);
        let next = apply_update(prev.as_deref(), update, self.now())?;
        let proposer_idx = next
            .core
            .part_idx(update.from)
            .ok_or(InvalidUpdate::NotAParticipant(update.from))?;
        let proposer_sig = update.signatures[proposer_idx].ok_or(InvalidUpdate::MissingSignature)?;

        let mut proposal = ProposedUpdate::new(next)?;
        proposal.add_signature(update.from, proposer_sig)?;
        let sig = proposal.sign(self.signer.as_ref())?;
        self.commit(proposal.build()?);
        Ok(sig)
    }

    /// One channel per pair and chain, on our own factory.
    fn check_setup(&self, from: Address, details: &SetupDetails) -> Result<()> {
        let factory = details.network.channel_factory;
        if factory != self.config.channel_factory {
            return Err(InvalidUpdate::UnknownChannelFactory(factory).into());
        }
        match self
            .store
            .get_by_participants(from, self.address(), details.network.chain_id)
        {
            Some(existing) => Err(Error::ChannelAlreadyExists(existing.channel_address())),
            None => Ok(()),
        }
    }

    /// The claimed cumulative total may not exceed what we see on chain.
    async fn check_deposit(&self, observation: &DepositObservation) -> Result<()> {
        let seen = self
            .chain
            .latest_deposit(
                observation.channel_address,
                observation.participant,
                observation.asset_id,
            )
            .await?;
        match seen {
            Some(seen) if observation.cumulative_total <= seen.cumulative_total => Ok(()),
            _ => Err(InvalidUpdate::DepositExceedsChain.into()),
        }
    }

    async fn handle_proposal(&self, from: Address, update: ChannelUpdate) -> ParticipantMessage {
        let channel_address = update.channel_address;
        let nonce = update.nonce;

        let is_setup = matches!(update.details, UpdateDetails::Setup(_));
        let (locks, key) = match &update.details {
            UpdateDetails::Setup(details) => match pair_key(update.from, update.to, details.network) {
                Ok(key) => (&self.setup_locks, key),
                Err(e) => return self.rejection(channel_address, nonce, e),
            },
            _ => (&self.locks, channel_address),
        };
        let lock = locks.lock_for(key);
        let reply = match timeout(self.config.inbound_lock_wait(), lock.lock()).await {
            Ok(_guard) => match self.countersign(from, &update).await {
                Ok(signature) => {
                    debug!(channel = %channel_address, nonce, %from, "countersigned");
                    ParticipantMessage::UpdateAccepted(UpdateAccepted {
                        channel_address,
                        nonce,
                        signature,
                    })
                }
                Err(e) => {
                    warn!(channel = %channel_address, nonce, error = %e, "rejecting proposal");
                    self.rejection(channel_address, nonce, e)
                }
            },
            Err(_) => {
                warn!(channel = %channel_address, nonce, "channel busy, rejecting proposal");
                ParticipantMessage::UpdateRejected(UpdateRejected {
                    channel_address,
                    nonce,
                    reason: RejectReason::Busy,
                    message: "channel busy with another update".into(),
                    latest: None,
                })
            }
        };
        // Entries for channels we don't hold would otherwise pile up.
        if is_setup || self.store.get(&channel_address).is_none() {
            locks.release(key, lock);
        }
        reply
    }

    /// A stale proposer also gets our latest update to catch up from.
    fn rejection(&self, channel_address: Address, nonce: u64, e: Error) -> ParticipantMessage {
        let mut rejection = UpdateRejected::from_error(channel_address, nonce, &e);
        if matches!(e, Error::StaleNonce { .. }) {
            rejection.latest = self
                .store
                .get(&channel_address)
                .map(|c| c.latest_update.clone());
        }
        ParticipantMessage::UpdateRejected(rejection)
    }
}

/// Lock key for setting up a channel between `a` and `b`, whichever of them
/// initiates.
fn pair_key(a: Address, b: Address, network: NetworkContext) -> Result<Address> {
    let (alice, bob) = if a <= b { (a, b) } else { (b, a) };
    Ok(ChannelParams {
        alice,
        bob,
        network,
    }
    .channel_address()?)
}

#[async_trait]
impl InboundHandler for ChannelEngine {
    async fn handle(&self, from: Address, msg: ParticipantMessage) -> ParticipantMessage {
        match msg {
            ParticipantMessage::UpdateProposal(update) => self.handle_proposal(from, update).await,
            other => {
                warn!(%from, ?other, "unsolicited message");
                ParticipantMessage::UpdateRejected(UpdateRejected {
                    channel_address: Address::ZERO,
                    nonce: 0,
                    reason: RejectReason::Invalid,
                    message: "expected a proposal".into(),
                    latest: None,
                })
            }
        }
    }
}
