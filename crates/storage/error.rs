use tevm_common::{Address, U256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Fork fetch failed: {0}")]
    Fork(#[from] ForkError),
    #[error("Attempted to commit or revert without an open checkpoint")]
    NoCheckpoint,
    #[error("Checkpoint depth mismatch: expected {expected}, found {found}")]
    CheckpointDepthMismatch { expected: usize, found: usize },
    #[error("Account cache is at checkpoint depth {accounts} but code cache is at {code}")]
    CacheDepthDesync { accounts: usize, code: usize },
    #[error("Insufficient balance for {address:#x}: has {balance}, needs {required}")]
    InsufficientBalance {
        address: Address,
        balance: U256,
        required: U256,
    },
    #[error("Balance overflow for {0:#x}")]
    BalanceOverflow(Address),
    #[error("Nonce overflow for {0:#x}")]
    NonceOverflow(Address),
    #[error("Invalid state snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("Failed to persist state: {0}")]
    Persist(String),
}

/// Errors reaching a remote fork. Cloneable so a single in-flight fetch can
/// hand the same failure to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ForkError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Failed to decode response: {0}")]
    Decode(String),
    #[error("Fetch coordinator lock poisoned")]
    LockPoisoned,
}

impl ForkError {
    /// JSON-RPC "method not found".
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, ForkError::Rpc { code: -32601, .. })
    }
}
