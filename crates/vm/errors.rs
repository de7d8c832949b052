use tevm_common::{Address, Bloom, H256, U256, types::Fork};
use tevm_storage::StateError;
use thiserror::Error;

use crate::block_builder::BuildStatus;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("Invalid transaction: {0}")]
    Validation(#[from] TxValidationError),
    #[error("State error: {0}")]
    State(#[from] StateError),
    #[error("Execution failed: {0}")]
    Execution(ExceptionError),
    #[error("Invalid block: {0}")]
    InvalidBlock(#[from] InvalidBlockError),
    #[error("Block builder error: {0}")]
    Builder(#[from] BuilderError),
    #[error("Interpreter error: {0}")]
    Interpreter(String),
}

/// Reasons a transaction cannot be applied at all. Nothing is written to
/// state when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxValidationError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Transaction type {0:?} is not supported before {1}")]
    UnsupportedTxType(tevm_common::types::TxType, Fork),
    #[error("Invalid chain id: expected {expected}, got {got}")]
    InvalidChainId { expected: u64, got: u64 },
    #[error("Nonce too low: account has {expected}, transaction has {got}")]
    NonceTooLow { expected: u64, got: u64 },
    #[error("Nonce too high: account has {expected}, transaction has {got}")]
    NonceTooHigh { expected: u64, got: u64 },
    #[error("Insufficient funds for {sender:#x}: balance {balance}, required {required}")]
    InsufficientFunds {
        sender: Address,
        balance: U256,
        required: U256,
    },
    #[error("Gas limit {gas_limit} exceeds the {available} gas left in the block")]
    GasAllowanceExceeded { gas_limit: u64, available: u64 },
    #[error("Intrinsic gas {intrinsic} exceeds the gas limit {gas_limit}")]
    IntrinsicGasTooLow { intrinsic: u64, gas_limit: u64 },
    #[error("Max fee per gas {max_fee} is below the base fee {base_fee}")]
    InsufficientMaxFeePerGas { max_fee: u64, base_fee: u64 },
    #[error("Priority fee {tip} is greater than the max fee per gas {max_fee}")]
    PriorityGreaterThanMaxFeePerGas { tip: u64, max_fee: u64 },
    #[error("Sender {0:#x} is not an externally owned account")]
    SenderNotEoa(Address),
    #[error("Init code of {0} bytes exceeds the maximum size")]
    InitcodeSizeExceeded(usize),
    #[error("Blob transaction carries no blobs")]
    Type3TxZeroBlobs,
    #[error("Blob gas {blob_gas} exceeds the maximum of {max} per block")]
    BlobGasLimitExceeded { blob_gas: u64, max: u64 },
    #[error("Max fee per blob gas {max_fee} is below the blob base fee {base_fee}")]
    InsufficientMaxFeePerBlobGas { max_fee: U256, base_fee: U256 },
}

/// Exceptional halts reported by the interpreter. A transaction ending in
/// one of these still produces a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExceptionError {
    #[error("out of gas")]
    OutOfGas,
    #[error("revert")]
    Revert,
    #[error("invalid opcode")]
    InvalidOpcode,
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("invalid JUMP")]
    InvalidJump,
    #[error("insufficient balance for transfer")]
    InsufficientBalance,
    #[error("contract address collision")]
    CreateCollision,
    #[error("code size exceeds the maximum")]
    CodeSizeExceeded,
    #[error("state change during static call")]
    StaticStateChange,
}

/// Header fields that do not match the result of executing the block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidBlockError {
    #[error("Gas used {gas_used} exceeds the block gas limit {gas_limit}")]
    GasUsedExceedsGasLimit { gas_used: u64, gas_limit: u64 },
    #[error("Transaction gas limit {gas_limit} exceeds the {available} gas left in the block")]
    TxGasLimitExceedsRemaining { gas_limit: u64, available: u64 },
    #[error("Missing header field {0} for the active fork")]
    MissingHeaderField(&'static str),
    #[error("Invalid transactions root: header has {expected:#x}, computed {computed:#x}")]
    InvalidTransactionsRoot { expected: H256, computed: H256 },
    #[error("Invalid withdrawals root: header has {expected:#x}, computed {computed:#x}")]
    InvalidWithdrawalsRoot { expected: H256, computed: H256 },
    #[error("Invalid receipts root: header has {expected:#x}, computed {computed:#x}")]
    InvalidReceiptsRoot { expected: H256, computed: H256 },
    #[error("Invalid logs bloom")]
    InvalidLogsBloom { expected: Box<Bloom>, computed: Box<Bloom> },
    #[error("Invalid gas used: header has {expected}, computed {computed}")]
    InvalidGasUsed { expected: u64, computed: u64 },
    #[error("Invalid blob gas used: header has {expected:?}, computed {computed}")]
    InvalidBlobGasUsed { expected: Option<u64>, computed: u64 },
    #[error("Invalid state root: header has {expected:#x}, computed {computed:#x}")]
    InvalidStateRoot { expected: H256, computed: H256 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    #[error("Block builder is already {0:?}")]
    AlreadyFinalized(BuildStatus),
    #[error("Transaction gas limit {gas_limit} exceeds the {available} gas left in the block")]
    GasLimitExceeded { gas_limit: u64, available: u64 },
    #[error("Blob gas {blob_gas} would exceed the block maximum of {max}")]
    BlobGasLimitExceeded { blob_gas: u64, max: u64 },
}
