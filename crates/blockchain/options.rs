use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tevm_common::{Address, types::ChainConfig};
use tevm_storage::{BlockTag, SerializableState};
use tevm_vm::DEFAULT_BLOCK_GAS_LIMIT;

use crate::{error::ChainError, mempool::TxPoolConfig};

/// Remote chain the node reads missing state from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkConfig {
    pub url: String,
    /// `latest` is resolved to a concrete block number when the node starts
    #[serde(default)]
    pub block_tag: BlockTag,
}

/// When the node produces blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MiningConfig {
    /// Only on explicit `mine` calls
    #[default]
    Manual,
    /// One block per accepted transaction
    Auto,
    #[serde(rename_all = "camelCase")]
    Interval { period_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeOptions {
    pub chain: ChainConfig,
    pub pool: TxPoolConfig,
    pub fork: Option<ForkConfig>,
    pub mining: MiningConfig,
    pub coinbase: Address,
    pub block_gas_limit: u64,
    /// Accounts present at genesis. Ignored when persisted state is restored.
    pub genesis_state: Option<SerializableState>,
    /// File the state is written to after every committed change
    pub persist_path: Option<PathBuf>,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            chain: ChainConfig::default(),
            pool: TxPoolConfig::default(),
            fork: None,
            mining: MiningConfig::default(),
            coinbase: Address::zero(),
            block_gas_limit: DEFAULT_BLOCK_GAS_LIMIT,
            genesis_state: None,
            persist_path: None,
        }
    }
}

impl NodeOptions {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ChainError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|err| ChainError::Config(format!("{}: {err}", path.display())))?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|err| ChainError::Config(format!("{}: {err}", path.display())))
    }
}
