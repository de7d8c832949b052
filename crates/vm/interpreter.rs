//! Boundary between the transaction pipeline and bytecode execution.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use bytes::Bytes;
use tevm_common::{
    Address, H256, U256,
    rlp::{Encoder, RLPEncode},
    types::{BlockHeader, ChainConfig, Log, TxKind},
    utils::keccak,
};
use tevm_storage::StateManager;
use tracing::trace;

use crate::errors::{ExceptionError, VmError};

/// Block level values visible to executing code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockEnv {
    pub number: u64,
    pub coinbase: Address,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub base_fee_per_gas: Option<u64>,
    pub prev_randao: H256,
    pub difficulty: U256,
    pub blob_base_fee: Option<U256>,
    pub chain_id: u64,
}

impl BlockEnv {
    pub fn new(header: &BlockHeader, config: &ChainConfig) -> Self {
        let blob_base_fee = header.excess_blob_gas.zip(config.get_fork_blob_schedule()).map(
            |(excess_blob_gas, schedule)| {
                tevm_common::types::get_base_fee_per_blob_gas(
                    excess_blob_gas,
                    schedule.base_fee_update_fraction,
                )
            },
        );
        Self {
            number: header.number,
            coinbase: header.coinbase,
            timestamp: header.timestamp,
            gas_limit: header.gas_limit,
            base_fee_per_gas: header.base_fee_per_gas,
            prev_randao: header.prev_randao,
            difficulty: header.difficulty,
            blob_base_fee,
            chain_id: config.chain_id,
        }
    }
}

/// Top level message handed to the interpreter.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub caller: Address,
    pub origin: Address,
    pub to: TxKind,
    pub value: U256,
    pub data: Bytes,
    /// Gas left after the intrinsic cost was charged.
    pub gas_limit: u64,
    pub is_static: bool,
    pub gas_price: u64,
    pub block: BlockEnv,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub return_value: Bytes,
    pub gas_used: u64,
    pub gas_refund: u64,
    /// Set when execution halted exceptionally; its state changes are discarded.
    pub exception_error: Option<ExceptionError>,
    pub logs: Vec<Log>,
    pub selfdestructs: BTreeSet<Address>,
    /// Accounts created during this execution.
    pub created_accounts: BTreeSet<Address>,
    pub created_address: Option<Address>,
    /// Addresses and storage keys touched during execution.
    pub accessed: BTreeMap<Address, BTreeSet<H256>>,
}

impl ExecResult {
    pub fn is_success(&self) -> bool {
        self.exception_error.is_none()
    }

    fn halt(error: ExceptionError, gas_used: u64) -> Self {
        Self {
            gas_used,
            exception_error: Some(error),
            ..Default::default()
        }
    }
}

/// Executes a message against the world state.
///
/// Interpreter exceptions are reported through [`ExecResult::exception_error`];
/// `Err` is reserved for failures that make the transaction unprocessable,
/// such as a fork that cannot be reached.
#[async_trait]
pub trait Interpreter: std::fmt::Debug + Send + Sync {
    async fn execute(
        &self,
        context: ExecutionContext,
        state: &mut StateManager,
    ) -> Result<ExecResult, VmError>;
}

/// Address of a contract created by `sender` with the given nonce.
pub fn create_address(sender: Address, nonce: u64) -> Address {
    let mut buf = Vec::new();
    Encoder::new(&mut buf)
        .encode_field(&sender)
        .encode_field(&nonce)
        .finish();
    Address::from_slice(&keccak(buf).as_bytes()[12..])
}

/// Handles plain value transfers and code-less contract creation. Any attempt
/// to run bytecode halts with [`ExceptionError::InvalidOpcode`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferInterpreter;

#[async_trait]
impl Interpreter for TransferInterpreter {
    async fn execute(
        &self,
        context: ExecutionContext,
        state: &mut StateManager,
    ) -> Result<ExecResult, VmError> {
        let target = match context.to {
            TxKind::Call(to) => to,
            TxKind::Create => {
                if !context.data.is_empty() {
                    return Ok(ExecResult::halt(
                        ExceptionError::InvalidOpcode,
                        context.gas_limit,
                    ));
                }
                // The caller nonce was already bumped for this transaction.
                let nonce = state.get_account_or_default(context.caller).await?.nonce;
                create_address(context.caller, nonce.saturating_sub(1))
            }
        };

        let existing = state.get_account(target).await?;
        if context.to == TxKind::Create
            && existing.is_some_and(|account| account.nonce != 0 || account.has_code())
        {
            return Ok(ExecResult::halt(
                ExceptionError::CreateCollision,
                context.gas_limit,
            ));
        }
        if existing.is_some_and(|account| account.has_code()) {
            trace!(%target, "Refusing to run contract code");
            return Ok(ExecResult::halt(
                ExceptionError::InvalidOpcode,
                context.gas_limit,
            ));
        }
        if context.is_static && !context.value.is_zero() {
            return Ok(ExecResult::halt(ExceptionError::StaticStateChange, 0));
        }

        let caller = state.get_account_or_default(context.caller).await?;
        if caller.balance < context.value {
            return Ok(ExecResult::halt(ExceptionError::InsufficientBalance, 0));
        }
        if !context.value.is_zero() {
            state.sub_balance(context.caller, context.value).await?;
            state.add_balance(target, context.value).await?;
        }

        let mut result = ExecResult::default();
        result.accessed.insert(target, BTreeSet::new());
        if context.to == TxKind::Create {
            let mut account = state.get_account_or_default(target).await?;
            account.nonce = 1;
            state.put_account(target, account);
            result.created_accounts.insert(target);
            result.created_address = Some(target);
        }
        Ok(result)
    }
}
