//! Router/Forwarder.
//!
//! An intermediary that is paid by a transfer meant for someone else mirrors
//! it onto its channel with the next hop: same condition, same routing id,
//! the amount minus a fee and an earlier expiry. The two legs are then
//! settled together:
//!
//! * downstream resolved: resolve upstream with the same resolver
//! * downstream cancelled or expired: cancel upstream
//! * downstream still active past its expiry: expire it, which cancels
//!   upstream on the next step
//!
//! Every route is recorded before the downstream leg is created, so a failed
//! or interrupted forward can always be compensated by cancelling upstream.
//! The router reacts to committed [EngineEvent]s and drives the engine
//! through its public operations; it never touches channel locks itself.

use crate::{
    channel::{StateChannel, Transfer, TransferStatus},
    config::RouterConfig,
    engine::{ChannelEngine, CreateTransferParams, EngineEvent},
    error::{Error, Result},
    types::{Address, Bytes32, Hash, U256},
};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::{
    sync::{broadcast::error::RecvError, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteStatus {
    /// Recorded; the downstream leg may or may not exist yet.
    Forwarding,
    /// Downstream leg committed, waiting for it to settle.
    Forwarded,
    /// Downstream resolved and upstream claimed.
    Completed,
    /// Upstream cancelled, downstream never created or closed unpaid.
    Cancelled,
}

impl RouteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RouteStatus::Completed | RouteStatus::Cancelled)
    }
}

/// Saga log entry of one forwarded payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub routing_id: Bytes32,
    pub upstream_channel: Address,
    pub upstream_transfer: Hash,
    pub downstream_channel: Option<Address>,
    /// Id the downstream leg has (or will have once committed).
    pub downstream_transfer: Option<Hash>,
    pub downstream_expiry: u64,
    pub fee: U256,
    pub status: RouteStatus,
}

/// Durable home of the route log.
pub trait RouteStore: Send + Sync {
    fn put(&self, record: RouteRecord);
    fn get(&self, routing_id: &Bytes32) -> Option<RouteRecord>;
    /// Route with `transfer_id` as either leg.
    fn find_by_transfer(&self, transfer_id: Hash) -> Option<RouteRecord>;
    fn all(&self) -> Vec<RouteRecord>;
}

#[derive(Debug, Default)]
pub struct MemoryRouteStore {
    routes: DashMap<Bytes32, RouteRecord>,
}

impl RouteStore for MemoryRouteStore {
    fn put(&self, record: RouteRecord) {
        self.routes.insert(record.routing_id, record);
    }

    fn get(&self, routing_id: &Bytes32) -> Option<RouteRecord> {
        self.routes.get(routing_id).map(|r| r.clone())
    }

    fn find_by_transfer(&self, transfer_id: Hash) -> Option<RouteRecord> {
        self.routes
            .iter()
            .find(|r| {
                r.upstream_transfer == transfer_id || r.downstream_transfer == Some(transfer_id)
            })
            .map(|r| r.clone())
    }

    fn all(&self) -> Vec<RouteRecord> {
        self.routes.iter().map(|r| r.clone()).collect()
    }
}

pub struct Router {
    engine: Arc<ChannelEngine>,
    config: RouterConfig,
    routes: Arc<dyn RouteStore>,
    /// Final recipient to the neighbour that leads to it, for recipients we
    /// have no channel with.
    next_hops: DashMap<Address, Address>,
    route_locks: DashMap<Bytes32, Arc<Mutex<()>>>,
}

impl Router {
    pub fn new(engine: Arc<ChannelEngine>, config: RouterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Router {
            engine,
            config,
            routes: Arc::new(MemoryRouteStore::default()),
            next_hops: DashMap::new(),
            route_locks: DashMap::new(),
        })
    }

    pub fn with_route_store(mut self, routes: Arc<dyn RouteStore>) -> Self {
        self.routes = routes;
        self
    }

    /// Reach `recipient` through our channel with `via`.
    pub fn add_next_hop(&self, recipient: Address, via: Address) {
        self.next_hops.insert(recipient, via);
    }

    pub fn route(&self, routing_id: &Bytes32) -> Option<RouteRecord> {
        self.routes.get(routing_id)
    }

    pub fn routes(&self) -> Vec<RouteRecord> {
        self.routes.all()
    }

    /// `flat_fee + amount * fee_ppm / 1_000_000`.
    pub fn fee_for(&self, amount: U256) -> U256 {
        let proportional = amount.saturating_mul(U256::from(self.config.fee_ppm)) / 1_000_000u64;
        proportional.saturating_add(U256::from(self.config.flat_fee))
    }

    /// Follow the engine's events and sweep periodically until the engine
    /// goes away.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.engine.subscribe();
        let router = self.clone();
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(router.config.sweep_interval());
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => {
                            let r = router.clone();
                            tokio::spawn(async move { r.handle_event(event).await });
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "router fell behind engine events, recovering");
                            let r = router.clone();
                            tokio::spawn(async move { r.recover().await });
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = sweep.tick() => {
                        let r = router.clone();
                        tokio::spawn(async move { r.sweep().await });
                    }
                }
            }
        })
    }

    pub async fn handle_event(&self, event: EngineEvent) {
        let me = self.engine.address();
        match event {
            EngineEvent::TransferCreated {
                channel_address,
                transfer,
            } if transfer.responder == me && transfer.recipient != me => {
                if let Err(e) = self.forward(channel_address, &transfer).await {
                    warn!(
                        routing_id = %transfer.routing_id,
                        error = %e,
                        "forwarding failed"
                    );
                }
            }
            EngineEvent::TransferResolved { transfer, .. }
            | EngineEvent::TransferCancelled { transfer, .. } => {
                if let Some(record) = self.routes.find_by_transfer(transfer.transfer_id) {
                    self.settle_logged(record.routing_id).await;
                }
            }
            _ => {}
        }
    }

    /// Settle every open route once. Drives expiry of stuck downstream legs.
    pub async fn sweep(&self) {
        for record in self.routes.all() {
            if !record.status.is_terminal() {
                self.settle_logged(record.routing_id).await;
            }
        }
    }

    /// Bring every open route to a consistent state, e.g. after a restart
    /// with a persistent route store. Routes whose downstream leg was never
    /// sent are compensated right away.
    pub async fn recover(&self) {
        info!("recovering open routes");
        self.sweep().await;
    }

    fn route_lock(&self, routing_id: Bytes32) -> Arc<Mutex<()>> {
        self.route_locks.entry(routing_id).or_default().clone()
    }

    /// Forget the lock of a finished route once nobody else holds it.
    fn release_route_lock(&self, routing_id: Bytes32, lock: Arc<Mutex<()>>) {
        drop(lock);
        let finished = self
            .routes
            .get(&routing_id)
            .map_or(true, |r| r.status.is_terminal());
        if finished {
            self.route_locks
                .remove_if(&routing_id, |_, l| Arc::strong_count(l) == 1);
        }
    }

    pub fn route_lock_count(&self) -> usize {
        self.route_locks.len()
    }

    /// Mirror `upstream` onto the next hop.
    pub async fn forward(&self, upstream_channel: Address, upstream: &Transfer) -> Result<RouteRecord> {
        let lock = self.route_lock(upstream.routing_id);
        let guard = lock.lock().await;
        let result = self.forward_locked(upstream_channel, upstream).await;
        drop(guard);
        self.release_route_lock(upstream.routing_id, lock);
        result
    }

    async fn forward_locked(
        &self,
        upstream_channel: Address,
        upstream: &Transfer,
    ) -> Result<RouteRecord> {
        if let Some(existing) = self.routes.get(&upstream.routing_id) {
            if existing.upstream_transfer == upstream.transfer_id {
                debug!(routing_id = %upstream.routing_id, "already routed");
                return Ok(existing);
            }
            // A second payment under a routing id we already carry; the
            // route log can only follow one, so hand this one back.
            warn!(
                routing_id = %upstream.routing_id,
                transfer_id = %upstream.transfer_id,
                "routing id already in use, refusing"
            );
            let still_active = self
                .engine
                .get_channel(&upstream_channel)?
                .active_transfer(upstream.transfer_id)
                .is_some();
            if still_active {
                self.engine
                    .cancel_transfer(upstream_channel, upstream.transfer_id)
                    .await?;
            }
            return Err(Error::RoutingFailure(format!(
                "routing id {} already in use",
                upstream.routing_id
            )));
        }

        let mut record = RouteRecord {
            routing_id: upstream.routing_id,
            upstream_channel,
            upstream_transfer: upstream.transfer_id,
            downstream_channel: None,
            downstream_transfer: None,
            downstream_expiry: 0,
            fee: U256::zero(),
            status: RouteStatus::Forwarding,
        };
        self.routes.put(record.clone());

        let result = self.forward_leg(upstream, &mut record).await;
        match result {
            Ok(()) => {
                record.status = RouteStatus::Forwarded;
                self.routes.put(record.clone());
                info!(
                    routing_id = %record.routing_id,
                    fee = %record.fee,
                    "forwarded"
                );
                Ok(record)
            }
            Err(Error::Timeout) => {
                // The next hop may or may not have countersigned; settled
                // once the leg shows up or its expiry passes.
                warn!(routing_id = %record.routing_id, "forward in doubt");
                Err(Error::Timeout)
            }
            Err(e) => {
                self.compensate(&mut record).await?;
                Err(match e {
                    Error::RoutingFailure(_) => e,
                    other => Error::RoutingFailure(other.to_string()),
                })
            }
        }
    }

    /// Plan and create the downstream leg, filling in `record` before the
    /// leg is proposed.
    async fn forward_leg(&self, upstream: &Transfer, record: &mut RouteRecord) -> Result<()> {
        let me = self.engine.address();
        let now = self.engine.now();

        let fee = self.fee_for(upstream.amount);
        if fee >= upstream.amount {
            return Err(Error::RoutingFailure(format!(
                "fee {} consumes amount {}",
                fee, upstream.amount
            )));
        }
        let expiry = upstream
            .expiry
            .checked_sub(self.config.timelock_delta)
            .filter(|e| *e < upstream.expiry)
            .filter(|e| *e >= now.saturating_add(self.config.min_timelock))
            .ok_or_else(|| {
                Error::RoutingFailure(format!(
                    "upstream expiry {} leaves no room for the next hop",
                    upstream.expiry
                ))
            })?;

        let next_hop = self
            .next_hops
            .get(&upstream.recipient)
            .map(|v| *v)
            .unwrap_or(upstream.recipient);
        let chain_id = self
            .engine
            .get_channel(&record.upstream_channel)?
            .core
            .network
            .chain_id;
        let downstream = self
            .engine
            .get_channel_by_participants(me, next_hop, chain_id)
            .map_err(|_| Error::RoutingFailure(format!("no channel with next hop {}", next_hop)))?;

        record.fee = fee;
        record.downstream_channel = Some(downstream.channel_address());
        record.downstream_transfer = Some(Transfer::compute_id(
            downstream.channel_address(),
            upstream.asset_id,
            &upstream.initial_state,
            upstream.routing_id,
            me,
            next_hop,
        )?);
        record.downstream_expiry = expiry;
        self.routes.put(record.clone());

        self.engine
            .create_transfer(
                downstream.channel_address(),
                CreateTransferParams {
                    asset_id: upstream.asset_id,
                    amount: upstream.amount - fee,
                    initial_state: upstream.initial_state.clone(),
                    recipient: upstream.recipient,
                    routing_id: upstream.routing_id,
                    expiry,
                    meta: upstream.meta.clone(),
                },
            )
            .await?;
        Ok(())
    }

    async fn settle_logged(&self, routing_id: Bytes32) {
        if let Err(e) = self.settle(routing_id).await {
            warn!(%routing_id, error = %e, "could not settle route");
        }
    }

    /// One step of the route state machine, driven by the current legs.
    async fn settle(&self, routing_id: Bytes32) -> Result<()> {
        let lock = self.route_lock(routing_id);
        let guard = lock.lock().await;
        let result = self.settle_locked(routing_id).await;
        drop(guard);
        self.release_route_lock(routing_id, lock);
        result
    }

    async fn settle_locked(&self, routing_id: Bytes32) -> Result<()> {
        let Some(mut record) = self.routes.get(&routing_id) else {
            return Ok(());
        };
        if record.status.is_terminal() {
            return Ok(());
        }

        let downstream = match (record.downstream_channel, record.downstream_transfer) {
            (Some(channel), Some(id)) => self
                .engine
                .get_channel(&channel)
                .ok()
                .and_then(|c| c.transfer(id).cloned()),
            _ => None,
        };
        let now = self.engine.now();

        match downstream {
            Some(leg) => match leg.status {
                TransferStatus::Resolved => self.claim_upstream(&mut record, &leg).await,
                TransferStatus::Cancelled | TransferStatus::Expired => {
                    self.compensate(&mut record).await
                }
                TransferStatus::Active if now >= leg.expiry => {
                    info!(%routing_id, "downstream leg expired");
                    self.engine
                        .expire_transfer(leg.channel_address, leg.transfer_id)
                        .await?;
                    // The expiry event settles upstream; do it here as well
                    // in case that event was missed.
                    self.compensate(&mut record).await
                }
                TransferStatus::Active => {
                    if record.status == RouteStatus::Forwarding {
                        record.status = RouteStatus::Forwarded;
                        self.routes.put(record);
                    }
                    Ok(())
                }
            },
            // Never sent, or in doubt and past the point the next hop could
            // still resolve it.
            None if record.downstream_transfer.is_none() || now >= record.downstream_expiry => {
                self.compensate(&mut record).await
            }
            None => Ok(()),
        }
    }

    async fn claim_upstream(&self, record: &mut RouteRecord, downstream: &Transfer) -> Result<()> {
        let Some(resolver) = downstream.resolver.clone() else {
            return Err(Error::ConditionNotSatisfied(
                "resolved downstream leg carries no resolver".into(),
            ));
        };
        if self.upstream_is_active(record)? {
            self.engine
                .resolve_transfer(record.upstream_channel, record.upstream_transfer, resolver)
                .await?;
            info!(routing_id = %record.routing_id, "upstream claimed");
        } else {
            warn!(routing_id = %record.routing_id, "upstream closed before it could be claimed");
        }
        record.status = RouteStatus::Completed;
        self.routes.put(record.clone());
        Ok(())
    }

    /// Cancel the upstream leg, returning the funds to the upstream payer.
    async fn compensate(&self, record: &mut RouteRecord) -> Result<()> {
        if self.upstream_is_active(record)? {
            self.engine
                .cancel_transfer(record.upstream_channel, record.upstream_transfer)
                .await?;
            info!(routing_id = %record.routing_id, "upstream cancelled");
        }
        record.status = RouteStatus::Cancelled;
        self.routes.put(record.clone());
        Ok(())
    }

    fn upstream_is_active(&self, record: &RouteRecord) -> Result<bool> {
        let channel: Arc<StateChannel> = self.engine.get_channel(&record.upstream_channel)?;
        Ok(channel.active_transfer(record.upstream_transfer).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(routing: u8, up: u8, down: Option<u8>) -> RouteRecord {
        RouteRecord {
            routing_id: Bytes32([routing; 32]),
            upstream_channel: Address([1; 20]),
            upstream_transfer: Hash([up; 32]),
            downstream_channel: down.map(|_| Address([2; 20])),
            downstream_transfer: down.map(|d| Hash([d; 32])),
            downstream_expiry: 0,
            fee: U256::zero(),
            status: RouteStatus::Forwarding,
        }
    }

    #[test]
    fn store_finds_routes_by_either_leg() {
        let store = MemoryRouteStore::default();
        store.put(record(1, 10, Some(11)));
        store.put(record(2, 20, None));

        assert_eq!(store.find_by_transfer(Hash([10; 32])).unwrap().routing_id, Bytes32([1; 32]));
        assert_eq!(store.find_by_transfer(Hash([11; 32])).unwrap().routing_id, Bytes32([1; 32]));
        assert_eq!(store.find_by_transfer(Hash([20; 32])).unwrap().routing_id, Bytes32([2; 32]));
        assert!(store.find_by_transfer(Hash([21; 32])).is_none());
        assert_eq!(store.all().len(), 2);
    }

    #[test]
    fn terminal_states() {
        assert!(!RouteStatus::Forwarding.is_terminal());
        assert!(!RouteStatus::Forwarded.is_terminal());
        assert!(RouteStatus::Completed.is_terminal());
        assert!(RouteStatus::Cancelled.is_terminal());
    }
}
