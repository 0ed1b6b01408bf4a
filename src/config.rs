//! Node configuration, read from YAML.

use crate::{
    error::{Error, Result},
    types::Address,
};
use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    pub chain_id: u64,
    pub channel_factory: Address,
    /// Dispute window of new channels, in seconds.
    pub default_channel_timeout: u64,
    /// How long a proposer waits for the countersignature.
    pub countersign_timeout_ms: u64,
    /// How long an inbound proposal waits for a channel busy with another
    /// update before it is rejected.
    pub inbound_lock_wait_ms: u64,
    pub router: RouterConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain_id: 1337,
            channel_factory: Address::ZERO,
            default_channel_timeout: 86_400,
            countersign_timeout_ms: 5_000,
            inbound_lock_wait_ms: 1_000,
            router: RouterConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RouterConfig {
    /// Fixed part of the forwarding fee, in base units.
    pub flat_fee: u64,
    /// Proportional part of the forwarding fee, in parts per million.
    pub fee_ppm: u32,
    /// Seconds the downstream expiry is set before the upstream one.
    pub timelock_delta: u64,
    /// Minimum remaining lifetime of a forwarded transfer, in seconds.
    pub min_timelock: u64,
    pub sweep_interval_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            flat_fee: 0,
            fee_ppm: 0,
            timelock_delta: 600,
            min_timelock: 60,
            sweep_interval_ms: 1_000,
        }
    }
}

impl NodeConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: NodeConfig =
            serde_yaml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_channel_timeout == 0 {
            return Err(Error::Config("default_channel_timeout must be > 0".into()));
        }
        if self.countersign_timeout_ms == 0 {
            return Err(Error::Config("countersign_timeout_ms must be > 0".into()));
        }
        if self.inbound_lock_wait_ms >= self.countersign_timeout_ms {
            return Err(Error::Config(
                "inbound_lock_wait_ms must be below countersign_timeout_ms".into(),
            ));
        }
        self.router.validate()
    }

    pub fn countersign_timeout(&self) -> Duration {
        Duration::from_millis(self.countersign_timeout_ms)
    }

    pub fn inbound_lock_wait(&self) -> Duration {
        Duration::from_millis(self.inbound_lock_wait_ms)
    }
}

impl RouterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fee_ppm > 1_000_000 {
            return Err(Error::Config("fee_ppm must be at most 1000000".into()));
        }
        if self.timelock_delta == 0 {
            return Err(Error::Config(
                "timelock_delta must be > 0 so forwarded transfers expire first".into(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(Error::Config("sweep_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
