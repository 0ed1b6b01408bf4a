#![allow(dead_code)]

use hopchannel::{
    chain::MemoryChain,
    channel::StateChannel,
    clock::{Clock, ManualClock},
    condition::{linked_hash, LinkedResolver, LinkedState, TransferResolver, TransferState},
    config::{NodeConfig, RouterConfig},
    sig::Signer,
    wire::{InboundHandler, MemoryNetwork, ProtoBufEncodingLayer},
    Address, Bytes32, ChannelEngine, CreateTransferParams, Result, Router, U256,
};
use rand::{rngs::StdRng, SeedableRng};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing_subscriber::EnvFilter;

pub const ETH: Address = Address::ZERO;
pub const START: u64 = 1_700_000_000;

pub fn init_tracing() {
    // Fails when another test already installed it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// `n` hundredths of an ether, in wei.
pub fn centi_eth(n: u64) -> U256 {
    U256::exp10(16) * n
}

/// `n` thousandths of an ether, in wei.
pub fn milli_eth(n: u64) -> U256 {
    U256::exp10(15) * n
}

pub fn test_config() -> NodeConfig {
    NodeConfig {
        countersign_timeout_ms: 500,
        inbound_lock_wait_ms: 100,
        ..NodeConfig::default()
    }
}

pub struct Node {
    pub name: &'static str,
    pub engine: Arc<ChannelEngine>,
}

impl Node {
    pub fn address(&self) -> Address {
        self.engine.address()
    }

    pub fn channel(&self, channel_address: Address) -> Arc<StateChannel> {
        self.engine.get_channel(&channel_address).unwrap()
    }

    pub fn balance(&self, channel_address: Address) -> U256 {
        let channel = self.channel(channel_address);
        let idx = channel.core.part_idx(self.address()).unwrap();
        channel.core.balance_of(ETH, idx)
    }
}

/// Nodes sharing one in-memory network, chain and clock.
pub struct Network {
    pub net: Arc<MemoryNetwork>,
    pub chain: Arc<MemoryChain>,
    pub clock: ManualClock,
    seed: u64,
}

impl Network {
    pub fn new() -> Self {
        init_tracing();
        Network {
            net: MemoryNetwork::new(),
            chain: Arc::new(MemoryChain::new()),
            clock: ManualClock::new(START),
            seed: 0,
        }
    }

    pub fn node(&mut self, name: &'static str, config: NodeConfig) -> Node {
        self.try_node(name, config).unwrap()
    }

    pub fn try_node(&mut self, name: &'static str, config: NodeConfig) -> Result<Node> {
        self.seed += 1;
        let signer = Signer::new(&mut StdRng::seed_from_u64(self.seed));
        let engine = Arc::new(ChannelEngine::new(
            config,
            Arc::new(signer),
            Arc::new(ProtoBufEncodingLayer::new(self.net.clone())),
            self.chain.clone(),
            Arc::new(self.clock.clone()),
        )?);
        let handler: Arc<dyn InboundHandler> = engine.clone();
        self.net.register(engine.address(), Arc::downgrade(&handler));
        Ok(Node { name, engine })
    }

    /// Open a channel from `a` to `b` and fund `a`'s side with `amount`.
    pub async fn funded_channel(&self, a: &Node, b: &Node, amount: U256) -> Address {
        let config = a.engine.config();
        let channel = a
            .engine
            .setup(b.address(), config.chain_id, config.default_channel_timeout)
            .await
            .unwrap()
            .channel_address();
        if !amount.is_zero() {
            self.chain.deposit(channel, a.address(), ETH, amount);
            a.engine.deposit(channel, ETH).await.unwrap();
        }
        channel
    }
}

/// Carol pays Dave through Roger.
pub struct Trio {
    pub network: Network,
    pub carol: Node,
    pub roger: Node,
    pub dave: Node,
    pub router: Arc<Router>,
    pub carol_roger: Address,
    pub roger_dave: Address,
}

impl Trio {
    pub async fn new(router_config: RouterConfig) -> Self {
        let mut network = Network::new();
        let carol = network.node("carol", test_config());
        let roger = network.node("roger", test_config());
        let dave = network.node("dave", test_config());

        let carol_roger = network.funded_channel(&carol, &roger, centi_eth(1)).await;
        let roger_dave = network.funded_channel(&roger, &dave, centi_eth(1)).await;

        let router = Arc::new(Router::new(roger.engine.clone(), router_config).unwrap());
        let _ = router.spawn();

        Trio {
            network,
            carol,
            roger,
            dave,
            router,
            carol_roger,
            roger_dave,
        }
    }

    pub fn now(&self) -> u64 {
        self.network.clock.now()
    }

    /// Both ends of every channel hold identical, fully signed, conserving
    /// states.
    pub fn assert_consistent(&self) {
        for (a, b, channel) in [
            (&self.carol, &self.roger, self.carol_roger),
            (&self.roger, &self.dave, self.roger_dave),
        ] {
            let left = a.channel(channel);
            let right = b.channel(channel);
            assert_eq!(left, right, "{} and {} disagree", a.name, b.name);
            assert!(left.is_fully_signed());
            assert!(left.is_conserved());
        }
    }
}

pub fn hash_lock(pre_image: Bytes32) -> TransferState {
    TransferState::Linked(LinkedState {
        linked_hash: linked_hash(&pre_image),
    })
}

pub fn unlock(pre_image: Bytes32) -> TransferResolver {
    TransferResolver::Linked(LinkedResolver { pre_image })
}

pub fn payment(
    amount: U256,
    pre_image: Bytes32,
    recipient: Address,
    routing_id: Bytes32,
    expiry: u64,
) -> CreateTransferParams {
    CreateTransferParams {
        asset_id: ETH,
        amount,
        initial_state: hash_lock(pre_image),
        recipient,
        routing_id,
        expiry,
        meta: BTreeMap::new(),
    }
}

/// Poll `check` until it holds, failing after five seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
