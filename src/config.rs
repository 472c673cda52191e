//! Node configuration: defaults, then an optional TOML file, then
//! `AHMIYAT_`-prefixed environment variables (`AHMIYAT_NETWORK__LISTEN_ADDR`).

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::blockchain::COIN;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConsensusMode {
    /// Proof of work: nonce search against the network difficulty.
    Work,
    /// Stake-weighted lottery over locked balances.
    Stake,
    /// Lottery over delegated stake, confirmed by a delegate quorum.
    Delegate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub mode: ConsensusMode,
    pub initial_difficulty: u32,
    /// Blocks between difficulty retargets.
    pub retarget_interval: u64,
    pub target_block_time_secs: u64,
    pub initial_reward: u64,
    pub halving_interval: u64,
    pub min_reward: u64,
    /// Flat fee charged to the sender of every transfer.
    pub tx_fee: u64,
    /// Delegate acknowledgements must strictly exceed
    /// `quorum_numerator / quorum_denominator` of known delegates.
    pub quorum_numerator: u64,
    pub quorum_denominator: u64,
    pub genesis_timestamp: i64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            mode: ConsensusMode::Work,
            initial_difficulty: 3,
            retarget_interval: 10,
            target_block_time_secs: 30,
            initial_reward: COIN,
            halving_interval: 100,
            min_reward: 10_000,
            tx_fee: COIN,
            quorum_numerator: 2,
            quorum_denominator: 3,
            genesis_timestamp: 1_700_000_000,
        }
    }
}

impl ConsensusConfig {
    /// Producer reward for the block at `index`: halves every
    /// `halving_interval` blocks and never drops below `min_reward`.
    pub fn block_reward(&self, index: u64) -> u64 {
        let halvings = index / self.halving_interval.max(1);
        let halved = u32::try_from(halvings)
            .ok()
            .and_then(|h| self.initial_reward.checked_shr(h))
            .unwrap_or(0);
        halved.max(self.min_reward)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Transaction identifiers remembered for replay protection.
    pub replay_capacity: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            replay_capacity: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub listen_addr: String,
    /// Address peers use to reach this node; defaults to the bound address.
    pub advertised_addr: Option<String>,
    pub bootstrap_peers: Vec<String>,
    /// Reputation at or below which a peer is blocked.
    pub ban_threshold: i64,
    pub rate_limit_max: usize,
    pub rate_limit_window_secs: u64,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
    pub max_frame_bytes: usize,
    /// Inbound connections served concurrently.
    pub workers: usize,
    pub discovery_interval_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:6001".to_string(),
            advertised_addr: None,
            bootstrap_peers: vec![],
            ban_threshold: -4,
            rate_limit_max: 100,
            rate_limit_window_secs: 10,
            connect_timeout_ms: 3_000,
            io_timeout_ms: 5_000,
            max_frame_bytes: 8_000_000,
            workers: 8,
            discovery_interval_secs: 30,
        }
    }
}

impl NetworkConfig {
    /// Endpoint announced to peers: `advertised_addr` if set, otherwise the
    /// address the listener actually bound.
    pub fn advertised(&self, bound: SocketAddr) -> String {
        self.advertised_addr
            .clone()
            .unwrap_or_else(|| bound.to_string())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "ahmiyat_state".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub consensus: ConsensusConfig,
    pub mempool: MempoolConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    /// Genesis balances in base units.
    pub allocations: BTreeMap<String, u64>,
}

impl NodeConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(NodeConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed("AHMIYAT_").split("__"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::str::FromStr;

    #[test]
    fn reward_schedule_halves_and_floors() {
        let params = ConsensusConfig::default();
        for index in [0, 1, 50, 99] {
            assert_eq!(params.block_reward(index), COIN);
        }
        for index in [100, 150, 199] {
            assert_eq!(params.block_reward(index), COIN / 2);
        }
        assert_eq!(params.block_reward(200), COIN / 4);
        assert_eq!(params.block_reward(100 * 40), 10_000);
        assert_eq!(params.block_reward(u64::MAX), 10_000);
        for index in (0..20_000).step_by(97) {
            assert!(params.block_reward(index) >= params.min_reward);
        }
    }

    #[test]
    fn mode_parses_from_text() {
        assert_eq!(ConsensusMode::from_str("stake").unwrap(), ConsensusMode::Stake);
        assert_eq!(ConsensusMode::Delegate.to_string(), "delegate");
        assert!(ConsensusMode::from_str("vote").is_err());
    }

    #[test]
    fn toml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[consensus]\nmode = \"stake\"\ntx_fee = 5\n\n[network]\nlisten_addr = \"0.0.0.0:7000\"\n\n[allocations]\nalice = 50"
        )
        .unwrap();

        let config = NodeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.consensus.mode, ConsensusMode::Stake);
        assert_eq!(config.consensus.tx_fee, 5);
        assert_eq!(config.consensus.halving_interval, 100);
        assert_eq!(config.network.listen_addr, "0.0.0.0:7000");
        let bound: SocketAddr = "10.0.0.7:7000".parse().unwrap();
        assert_eq!(config.network.advertised(bound), "10.0.0.7:7000");
        let announced = NetworkConfig {
            advertised_addr: Some("node-a.example:7000".into()),
            ..config.network
        };
        assert_eq!(announced.advertised(bound), "node-a.example:7000");
        assert_eq!(config.allocations.get("alice"), Some(&50));
    }
}
