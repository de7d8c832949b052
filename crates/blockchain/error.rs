use tevm_common::{Address, H256, U256, types::EcdsaError};
use tevm_storage::{ForkError, StateError};
use tevm_vm::VmError;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Invalid Block: {0}")]
    InvalidBlock(#[from] tevm_vm::InvalidBlockError),
    #[error("Mempool error: {0}")]
    Mempool(#[from] MempoolError),
    #[error("State error: {0}")]
    State(#[from] StateError),
    #[error("Fork error: {0}")]
    Fork(#[from] ForkError),
    #[error("EVM error: {0}")]
    EvmError(VmError),
    #[error("Parent block not found")]
    ParentNotFound,
    #[error("Block {0} does not extend the current head")]
    NonSequentialBlock(u64),
    #[error("Failed to read node options: {0}")]
    Config(String),
    #[error("{0}")]
    Custom(String),
}

impl From<VmError> for ChainError {
    fn from(value: VmError) -> Self {
        match value {
            VmError::InvalidBlock(err) => ChainError::InvalidBlock(err),
            VmError::State(err) => ChainError::State(err),
            other => ChainError::EvmError(other),
        }
    }
}

impl ChainError {
    /// Stable short name of the error, suitable for structured error
    /// responses.
    pub fn kind(&self) -> &'static str {
        match self {
            ChainError::InvalidBlock(_) => "invalid_block",
            ChainError::Mempool(err) => err.kind(),
            ChainError::State(_) => "state_error",
            ChainError::Fork(_) => "fork_error",
            ChainError::EvmError(VmError::Validation(_)) => "invalid_transaction",
            ChainError::EvmError(VmError::Execution(_)) => "execution_reverted",
            ChainError::EvmError(_) => "evm_error",
            ChainError::ParentNotFound => "parent_not_found",
            ChainError::NonSequentialBlock(_) => "non_sequential_block",
            ChainError::Config(_) => "config_error",
            ChainError::Custom(_) => "custom_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MempoolError {
    #[error("Transaction sender is invalid {0}")]
    InvalidSignature(#[from] EcdsaError),
    #[error("Transaction chain id mismatch, expected chain id: {0}")]
    InvalidChainId(u64),
    #[error("Transaction {0:#x} is already in the pool")]
    AlreadyKnown(H256),
    #[error("Transaction pool is full")]
    PoolFull,
    #[error("Sender {0:#x} already has the maximum number of pooled transactions")]
    TooManyTransactions(Address),
    #[error("Transaction data of {0} bytes exceeds the maximum size")]
    TxMaxDataSizeError(usize),
    #[error("Transaction gas limit {gas_limit} exceeds the block gas limit {block_gas_limit}")]
    TxGasLimitExceededError { gas_limit: u64, block_gas_limit: u64 },
    #[error("Transaction intrinsic gas cost above gas limit")]
    TxIntrinsicGasCostAboveLimitError,
    #[error("Transaction priority fee above gas fee")]
    TxTipAboveFeeCapError,
    #[error("Transaction gas price {price} is below the pool minimum of {min}")]
    Underpriced { price: u64, min: u64 },
    #[error("Nonce for account too low: account has {expected}, transaction has {got}")]
    NonceTooLow { expected: u64, got: u64 },
    #[error("Account does not have enough balance to cover the tx cost: have {balance}, need {required}")]
    NotEnoughBalance { balance: U256, required: U256 },
    #[error("Attempted to replace a pooled transaction with an underpriced transaction")]
    UnderpricedReplacement,
    #[error("Mempool lock poisoned: {0}")]
    Lock(String),
}

impl MempoolError {
    pub fn kind(&self) -> &'static str {
        match self {
            MempoolError::InvalidSignature(_) => "invalid_signature",
            MempoolError::InvalidChainId(_) => "invalid_chain_id",
            MempoolError::AlreadyKnown(_) => "already_known",
            MempoolError::PoolFull => "pool_full",
            MempoolError::TooManyTransactions(_) => "too_many_transactions",
            MempoolError::TxMaxDataSizeError(_) => "oversized_data",
            MempoolError::TxGasLimitExceededError { .. } => "gas_limit_exceeded",
            MempoolError::TxIntrinsicGasCostAboveLimitError => "intrinsic_gas_too_low",
            MempoolError::TxTipAboveFeeCapError => "tip_above_fee_cap",
            MempoolError::Underpriced { .. } => "underpriced",
            MempoolError::NonceTooLow { .. } => "nonce_too_low",
            MempoolError::NotEnoughBalance { .. } => "insufficient_balance",
            MempoolError::UnderpricedReplacement => "replacement_underpriced",
            MempoolError::Lock(_) => "internal_error",
        }
    }
}
