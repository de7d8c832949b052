use std::{
    collections::BTreeMap,
    fmt,
    fs,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tevm_common::{Address, H256, U256};
use tracing::debug;

use crate::error::StateError;

/// Serializable view of a single account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    #[serde(with = "tevm_common::serde_utils::u64::hex_str")]
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: H256,
    pub code_hash: H256,
    /// Non-zero slots only
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub storage: BTreeMap<H256, U256>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "tevm_common::serde_utils::bytes::opt"
    )]
    pub deployed_bytecode: Option<Bytes>,
}

/// Full state dump, keyed by address. Ordered so two dumps of the same state
/// serialize identically.
pub type SerializableState = BTreeMap<Address, AccountSnapshot>;

/// Receives the full state each time the outermost checkpoint is committed.
pub trait StatePersister: fmt::Debug + Send + Sync {
    fn persist(&self, state: &SerializableState) -> Result<(), StateError>;

    /// Previously persisted state, if any.
    fn restore(&self) -> Result<Option<SerializableState>, StateError>;
}

/// Keeps the state as a JSON file.
#[derive(Debug, Clone)]
pub struct FileStatePersister {
    path: PathBuf,
}

impl FileStatePersister {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl StatePersister for FileStatePersister {
    fn persist(&self, state: &SerializableState) -> Result<(), StateError> {
        let json = serde_json::to_vec_pretty(state)?;
        // Write then rename so a crash never leaves a truncated file behind.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|err| StateError::Persist(err.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|err| StateError::Persist(err.to_string()))?;
        debug!(path = %self.path.display(), accounts = state.len(), "Persisted state");
        Ok(())
    }

    fn restore(&self) -> Result<Option<SerializableState>, StateError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = fs::read(&self.path).map_err(|err| StateError::Persist(err.to_string()))?;
        Ok(Some(serde_json::from_slice(&json)?))
    }
}
