use ethereum_types::U256;
use serde::{Deserialize, Serialize};

use self::Fork::*;
use crate::constants::{ETHER_TO_WEI, GAS_PER_BLOB, MIN_BASE_FEE_PER_BLOB_GAS};

/// Hardforks, in activation order.
#[repr(u8)]
#[derive(
    Debug, PartialEq, Eq, PartialOrd, Ord, Default, Hash, Clone, Copy, Serialize, Deserialize,
)]
pub enum Fork {
    Frontier = 0,
    Homestead = 1,
    TangerineWhistle = 2,
    SpuriousDragon = 3,
    Byzantium = 4,
    Constantinople = 5,
    Petersburg = 6,
    Istanbul = 7,
    Berlin = 8,
    London = 9,
    Paris = 10,
    Shanghai = 11,
    #[default]
    Cancun = 12,
    Prague = 13,
}

impl From<Fork> for &str {
    fn from(fork: Fork) -> Self {
        match fork {
            Frontier => "Frontier",
            Homestead => "Homestead",
            TangerineWhistle => "Tangerine Whistle",
            SpuriousDragon => "Spurious Dragon",
            Byzantium => "Byzantium",
            Constantinople => "Constantinople",
            Petersburg => "Petersburg",
            Istanbul => "Istanbul",
            Berlin => "Berlin",
            London => "London",
            Paris => "Paris",
            Shanghai => "Shanghai",
            Cancun => "Cancun",
            Prague => "Prague",
        }
    }
}

impl std::fmt::Display for Fork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).into())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ForkBlobSchedule {
    pub base_fee_update_fraction: u64,
    pub max: u32,
    pub target: u32,
}

impl ForkBlobSchedule {
    pub const CANCUN: Self = Self {
        base_fee_update_fraction: 3338477,
        max: 6,
        target: 3,
    };
    pub const PRAGUE: Self = Self {
        base_fee_update_fraction: 5007716,
        max: 9,
        target: 6,
    };

    pub fn max_blob_gas(&self) -> u64 {
        self.max as u64 * GAS_PER_BLOB
    }

    pub fn target_blob_gas(&self) -> u64 {
        self.target as u64 * GAS_PER_BLOB
    }
}

/// Chain settings. A single fork is active for the whole lifetime of the
/// chain, which is how an in-process devnet is normally configured.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    /// Current chain identifier
    pub chain_id: u64,
    #[serde(default)]
    pub fork: Fork,
    /// Overrides the blob schedule implied by `fork`
    #[serde(default)]
    pub blob_schedule: Option<ForkBlobSchedule>,
}

/// Chain id used when none is configured.
pub const DEFAULT_CHAIN_ID: u64 = 900;

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            fork: Fork::default(),
            blob_schedule: None,
        }
    }
}

impl ChainConfig {
    pub fn new(chain_id: u64, fork: Fork) -> Self {
        Self {
            chain_id,
            fork,
            blob_schedule: None,
        }
    }

    pub fn is_eip155_activated(&self) -> bool {
        self.fork >= SpuriousDragon
    }

    pub fn is_spurious_dragon_activated(&self) -> bool {
        self.fork >= SpuriousDragon
    }

    pub fn is_byzantium_activated(&self) -> bool {
        self.fork >= Byzantium
    }

    pub fn is_istanbul_activated(&self) -> bool {
        self.fork >= Istanbul
    }

    pub fn is_berlin_activated(&self) -> bool {
        self.fork >= Berlin
    }

    pub fn is_london_activated(&self) -> bool {
        self.fork >= London
    }

    pub fn is_shanghai_activated(&self) -> bool {
        self.fork >= Shanghai
    }

    pub fn is_cancun_activated(&self) -> bool {
        self.fork >= Cancun
    }

    pub fn is_prague_activated(&self) -> bool {
        self.fork >= Prague
    }

    /// Proof of work chains pay block and ommer rewards.
    pub fn is_pow(&self) -> bool {
        self.fork < Paris
    }

    /// Static block reward paid to the miner of a proof of work block.
    pub fn block_reward(&self) -> U256 {
        let ether = match self.fork {
            Frontier | Homestead | TangerineWhistle | SpuriousDragon => 5,
            Byzantium => 3,
            Constantinople | Petersburg | Istanbul | Berlin | London => 2,
            Paris | Shanghai | Cancun | Prague => 0,
        };
        U256::from(ether) * U256::from(ETHER_TO_WEI)
    }

    /// EIP-3529: the refund cap went from gas_used / 2 to gas_used / 5.
    pub fn max_refund_quotient(&self) -> u64 {
        if self.is_london_activated() { 5 } else { 2 }
    }

    pub fn get_fork_blob_schedule(&self) -> Option<ForkBlobSchedule> {
        if let Some(schedule) = self.blob_schedule {
            return self.is_cancun_activated().then_some(schedule);
        }
        match self.fork {
            Cancun => Some(ForkBlobSchedule::CANCUN),
            Prague => Some(ForkBlobSchedule::PRAGUE),
            _ => None,
        }
    }
}

/// Approximates `factor * e ** (numerator / denominator)` using Taylor expansion
/// https://eips.ethereum.org/EIPS/eip-4844#helpers
pub fn fake_exponential(factor: U256, numerator: U256, denominator: u64) -> U256 {
    if denominator == 0 {
        return U256::zero();
    }
    let denominator = U256::from(denominator);
    let mut i = U256::one();
    let mut output = U256::zero();
    let mut numerator_accum = factor * denominator;
    while !numerator_accum.is_zero() {
        output = output.saturating_add(numerator_accum);
        numerator_accum = numerator_accum.saturating_mul(numerator) / (denominator * i);
        i += U256::one();
    }
    output / denominator
}

/// Blob gas price implied by the parent's excess blob gas.
pub fn get_base_fee_per_blob_gas(excess_blob_gas: u64, update_fraction: u64) -> U256 {
    fake_exponential(
        U256::from(MIN_BASE_FEE_PER_BLOB_GAS),
        U256::from(excess_blob_gas),
        update_fraction,
    )
}

/// EIP-4844 excess blob gas of a child block.
pub fn calc_excess_blob_gas(
    parent_excess_blob_gas: u64,
    parent_blob_gas_used: u64,
    target_blob_gas: u64,
) -> u64 {
    (parent_excess_blob_gas + parent_blob_gas_used).saturating_sub(target_blob_gas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forks_are_ordered() {
        assert!(Fork::Frontier < Fork::Byzantium);
        assert!(Fork::London < Fork::Cancun);
        let config = ChainConfig::new(1, Fork::Petersburg);
        assert!(config.is_byzantium_activated());
        assert!(!config.is_london_activated());
        assert!(config.is_pow());
        assert_eq!(config.max_refund_quotient(), 2);
    }

    #[test]
    fn block_reward_per_fork() {
        let ether = U256::from(ETHER_TO_WEI);
        assert_eq!(
            ChainConfig::new(1, Fork::Homestead).block_reward(),
            ether * 5
        );
        assert_eq!(
            ChainConfig::new(1, Fork::Byzantium).block_reward(),
            ether * 3
        );
        assert_eq!(
            ChainConfig::new(1, Fork::Istanbul).block_reward(),
            ether * 2
        );
        assert!(ChainConfig::new(1, Fork::Cancun).block_reward().is_zero());
    }

    #[test]
    fn blob_base_fee_starts_at_minimum() {
        assert_eq!(
            get_base_fee_per_blob_gas(0, ForkBlobSchedule::CANCUN.base_fee_update_fraction),
            U256::one()
        );
        assert!(
            get_base_fee_per_blob_gas(
                10_000_000,
                ForkBlobSchedule::CANCUN.base_fee_update_fraction,
            ) > U256::one()
        );
    }

    #[test]
    fn chain_config_from_json() {
        let config: ChainConfig =
            serde_json::from_str(r#"{"chainId": 1337, "fork": "London"}"#).unwrap();
        assert_eq!(config, ChainConfig::new(1337, Fork::London));
        assert!(config.get_fork_blob_schedule().is_none());
    }
}
