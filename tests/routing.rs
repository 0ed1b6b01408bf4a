mod common;

use common::*;
use hopchannel::{
    channel::{Transfer, TransferStatus},
    config::RouterConfig,
    Address, Bytes32, Error, RouteStatus, U256,
};

const PRE_IMAGE: Bytes32 = Bytes32([0x5e; 32]);
const ROUTING_ID: Bytes32 = Bytes32([0x11; 32]);

fn leg(node: &Node, channel: Address, routing_id: Bytes32) -> Option<Transfer> {
    node.channel(channel)
        .transfers
        .iter()
        .find(|t| t.routing_id == routing_id)
        .cloned()
}

fn leg_status(node: &Node, channel: Address) -> Option<TransferStatus> {
    leg(node, channel, ROUTING_ID).map(|t| t.status)
}

async fn pay_dave(trio: &Trio, amount: U256, expiry: u64) -> Transfer {
    trio.carol
        .engine
        .create_transfer(
            trio.carol_roger,
            payment(amount, PRE_IMAGE, trio.dave.address(), ROUTING_ID, expiry),
        )
        .await
        .unwrap()
}

fn route_status(trio: &Trio) -> Option<RouteStatus> {
    trio.router.route(&ROUTING_ID).map(|r| r.status)
}

/// Wait until Roger committed the downstream leg.
async fn wait_for_downstream(trio: &Trio) -> Transfer {
    eventually("downstream leg", || {
        route_status(trio) == Some(RouteStatus::Forwarded)
    })
    .await;
    let transfer = leg(&trio.dave, trio.roger_dave, ROUTING_ID).unwrap();
    assert_eq!(transfer.status, TransferStatus::Active);
    transfer
}

/// Wait until Roger claimed the upstream leg.
async fn wait_for_completion(trio: &Trio) {
    eventually("route completed", || {
        route_status(trio) == Some(RouteStatus::Completed)
    })
    .await;
    assert_eq!(leg_status(&trio.carol, trio.carol_roger), Some(TransferStatus::Resolved));
}

#[tokio::test]
async fn payment_through_intermediary() {
    let trio = Trio::new(RouterConfig::default()).await;
    trio.assert_consistent();
    assert_eq!(trio.carol.balance(trio.carol_roger), centi_eth(1));
    assert_eq!(trio.roger.balance(trio.roger_dave), centi_eth(1));

    let expiry = trio.now() + 3600;
    let upstream = pay_dave(&trio, milli_eth(5), expiry).await;
    let downstream = wait_for_downstream(&trio).await;

    assert_eq!(downstream.amount, milli_eth(5));
    assert_eq!(downstream.initial_state, upstream.initial_state);
    assert_eq!(downstream.expiry, expiry - 600);
    assert_eq!(downstream.initiator, trio.roger.address());
    assert_eq!(downstream.recipient, trio.dave.address());
    trio.assert_consistent();

    trio.dave
        .engine
        .resolve_by_routing_id(trio.roger_dave, ROUTING_ID, unlock(PRE_IMAGE))
        .await
        .unwrap();

    wait_for_completion(&trio).await;

    assert_eq!(trio.carol.balance(trio.carol_roger), milli_eth(5));
    assert_eq!(trio.roger.balance(trio.carol_roger), milli_eth(5));
    assert_eq!(trio.roger.balance(trio.roger_dave), milli_eth(5));
    assert_eq!(trio.dave.balance(trio.roger_dave), milli_eth(5));
    trio.assert_consistent();

    // The same pre-image can't be redeemed twice.
    assert!(matches!(
        trio.dave
            .engine
            .resolve_transfer(trio.roger_dave, downstream.transfer_id, unlock(PRE_IMAGE))
            .await,
        Err(Error::TransferNotFound(_))
    ));
    trio.assert_consistent();
    eventually("route lock released", || trio.router.route_lock_count() == 0).await;
}

#[tokio::test]
async fn reused_routing_id_is_handed_back() {
    let trio = Trio::new(RouterConfig::default()).await;
    let first = pay_dave(&trio, milli_eth(5), trio.now() + 3600).await;
    wait_for_downstream(&trio).await;

    let second = trio
        .carol
        .engine
        .create_transfer(
            trio.carol_roger,
            payment(
                milli_eth(2),
                Bytes32([0x77; 32]),
                trio.dave.address(),
                ROUTING_ID,
                trio.now() + 3600,
            ),
        )
        .await
        .unwrap();
    assert_ne!(second.transfer_id, first.transfer_id);

    eventually("second payment cancelled", || {
        trio.carol
            .channel(trio.carol_roger)
            .transfer(second.transfer_id)
            .map(|t| t.status)
            == Some(TransferStatus::Cancelled)
    })
    .await;
    let route = trio.router.route(&ROUTING_ID).unwrap();
    assert_eq!(route.upstream_transfer, first.transfer_id);
    assert_eq!(route.status, RouteStatus::Forwarded);
    assert_eq!(trio.dave.engine.active_transfers(&trio.roger_dave).unwrap().len(), 1);
    assert_eq!(trio.carol.balance(trio.carol_roger), milli_eth(5));

    // The first payment is unaffected.
    trio.dave
        .engine
        .resolve_by_routing_id(trio.roger_dave, ROUTING_ID, unlock(PRE_IMAGE))
        .await
        .unwrap();
    wait_for_completion(&trio).await;
    assert_eq!(trio.dave.balance(trio.roger_dave), milli_eth(5));
    trio.assert_consistent();
}

#[tokio::test]
async fn intermediary_keeps_its_fee() {
    let config = RouterConfig {
        flat_fee: 1_000,
        fee_ppm: 10_000,
        ..RouterConfig::default()
    };
    let trio = Trio::new(config).await;
    let amount = milli_eth(5);
    let fee = amount / 100u64 + 1_000u64;
    assert_eq!(trio.router.fee_for(amount), fee);

    pay_dave(&trio, amount, trio.now() + 3600).await;
    let downstream = wait_for_downstream(&trio).await;
    assert_eq!(downstream.amount, amount - fee);

    trio.dave
        .engine
        .resolve_transfer(trio.roger_dave, downstream.transfer_id, unlock(PRE_IMAGE))
        .await
        .unwrap();
    wait_for_completion(&trio).await;

    let roger_total = trio.roger.balance(trio.carol_roger) + trio.roger.balance(trio.roger_dave);
    assert_eq!(roger_total, centi_eth(1) + fee);
    assert_eq!(trio.dave.balance(trio.roger_dave), amount - fee);
    trio.assert_consistent();
}

#[tokio::test]
async fn wrong_pre_image_leaves_both_legs_locked() {
    let trio = Trio::new(RouterConfig::default()).await;
    pay_dave(&trio, milli_eth(5), trio.now() + 3600).await;
    let downstream = wait_for_downstream(&trio).await;

    let res = trio
        .dave
        .engine
        .resolve_transfer(trio.roger_dave, downstream.transfer_id, unlock(Bytes32([0; 32])))
        .await;
    assert!(matches!(res, Err(Error::ConditionNotSatisfied(_))), "{:?}", res);

    assert_eq!(leg_status(&trio.carol, trio.carol_roger), Some(TransferStatus::Active));
    assert_eq!(leg_status(&trio.dave, trio.roger_dave), Some(TransferStatus::Active));
    assert_eq!(trio.carol.balance(trio.carol_roger), milli_eth(5));
    assert!(trio.dave.balance(trio.roger_dave).is_zero());
    trio.assert_consistent();
}

#[tokio::test]
async fn expired_route_unwinds_both_legs() {
    let trio = Trio::new(RouterConfig::default()).await;
    let expiry = trio.now() + 1_000;
    pay_dave(&trio, milli_eth(5), expiry).await;
    wait_for_downstream(&trio).await;

    trio.network.clock.advance(1_000);
    assert!(matches!(
        trio.dave
            .engine
            .resolve_by_routing_id(trio.roger_dave, ROUTING_ID, unlock(PRE_IMAGE))
            .await,
        Err(Error::InvalidUpdate(_))
    ));

    trio.router.sweep().await;
    eventually("route cancelled", || {
        route_status(&trio) == Some(RouteStatus::Cancelled)
    })
    .await;

    assert_eq!(leg_status(&trio.dave, trio.roger_dave), Some(TransferStatus::Expired));
    assert_eq!(leg_status(&trio.carol, trio.carol_roger), Some(TransferStatus::Cancelled));
    assert_eq!(trio.carol.balance(trio.carol_roger), centi_eth(1));
    assert_eq!(trio.roger.balance(trio.roger_dave), centi_eth(1));
    assert!(trio.roger.balance(trio.carol_roger).is_zero());
    trio.assert_consistent();
}

async fn assert_compensated(trio: &Trio) {
    eventually("upstream cancelled", || {
        leg_status(&trio.carol, trio.carol_roger) == Some(TransferStatus::Cancelled)
    })
    .await;
    eventually("route cancelled", || route_status(trio) == Some(RouteStatus::Cancelled)).await;
    assert_eq!(trio.carol.balance(trio.carol_roger), centi_eth(1));
    trio.assert_consistent();
}

#[tokio::test]
async fn unknown_recipient_is_compensated() {
    let trio = Trio::new(RouterConfig::default()).await;
    trio.carol
        .engine
        .create_transfer(
            trio.carol_roger,
            payment(
                milli_eth(5),
                PRE_IMAGE,
                Address([0xee; 20]),
                ROUTING_ID,
                trio.now() + 3600,
            ),
        )
        .await
        .unwrap();

    assert_compensated(&trio).await;
    assert!(trio.router.route(&ROUTING_ID).unwrap().downstream_transfer.is_none());
}

#[tokio::test]
async fn too_short_timelock_is_compensated() {
    let trio = Trio::new(RouterConfig::default()).await;
    pay_dave(&trio, milli_eth(5), trio.now() + 300).await;
    assert_compensated(&trio).await;
    assert_eq!(leg_status(&trio.dave, trio.roger_dave), None);
}

#[tokio::test]
async fn fee_above_amount_is_compensated() {
    let config = RouterConfig {
        flat_fee: 10_000,
        ..RouterConfig::default()
    };
    let trio = Trio::new(config).await;
    pay_dave(&trio, U256::from(10_000u64), trio.now() + 3600).await;
    assert_compensated(&trio).await;
}

#[tokio::test]
async fn missing_downstream_capacity_is_compensated() {
    let trio = Trio::new(RouterConfig::default()).await;
    // Roger locks most of his side in a payment of his own.
    trio.roger
        .engine
        .create_transfer(
            trio.roger_dave,
            payment(
                milli_eth(8),
                Bytes32([1; 32]),
                trio.dave.address(),
                Bytes32([2; 32]),
                trio.now() + 3600,
            ),
        )
        .await
        .unwrap();

    pay_dave(&trio, milli_eth(5), trio.now() + 3600).await;
    assert_compensated(&trio).await;
}

#[tokio::test]
async fn unanswered_forward_is_settled_after_downstream_expiry() {
    let trio = Trio::new(RouterConfig::default()).await;
    trio.network.net.set_offline(trio.dave.address(), true);

    let expiry = trio.now() + 3600;
    pay_dave(&trio, milli_eth(5), expiry).await;

    // The forward times out; the route stays open with the expected leg.
    eventually("route recorded", || {
        trio.router
            .route(&ROUTING_ID)
            .map_or(false, |r| r.downstream_transfer.is_some())
    })
    .await;
    tokio::time::sleep(std::time::Duration::from_millis(700)).await;
    let route = trio.router.route(&ROUTING_ID).unwrap();
    assert_eq!(route.status, RouteStatus::Forwarding);
    assert_eq!(route.downstream_expiry, expiry - 600);

    trio.network.net.set_offline(trio.dave.address(), false);
    trio.router.recover().await;
    assert_eq!(leg_status(&trio.carol, trio.carol_roger), Some(TransferStatus::Active));

    trio.network.clock.advance(3600 - 600);
    trio.router.recover().await;
    assert_compensated(&trio).await;
    assert_eq!(leg_status(&trio.dave, trio.roger_dave), None);
}
