use tevm_common::{
    Address, Bloom, H256, U256,
    constants::MAX_INITCODE_SIZE,
    types::{AccessList, BlockHeader, Fork, Receipt, Transaction, TxType},
};
use tevm_storage::StateError;
use tracing::{debug, instrument, trace};

use crate::{
    errors::{TxValidationError, VmError},
    interpreter::{BlockEnv, ExecResult, ExecutionContext},
    receipts::generate_tx_receipt,
    vm::Vm,
};

/// Gas limit of the block a transaction runs in when the caller does not
/// provide one.
pub const DEFAULT_BLOCK_GAS_LIMIT: u64 = 30_000_000;

#[derive(Debug, Clone, Default)]
pub struct RunTxOpts {
    pub tx: Transaction,
    /// Recovered from the signature when not given.
    pub sender: Option<Address>,
    pub block: Option<BlockHeader>,
    /// Gas already used by earlier transactions of the block.
    pub block_gas_used: u64,
    pub skip_nonce: bool,
    /// Tops the sender up to the required balance instead of failing.
    pub skip_balance: bool,
    pub skip_block_gas_limit_validation: bool,
    pub skip_hardfork_validation: bool,
    /// Turns an exceptional halt into an error, reverting every change.
    pub throw_on_fail: bool,
    pub report_access_list: bool,
}

#[derive(Debug, Clone)]
pub struct RunTxResult {
    pub tx_hash: H256,
    pub sender: Address,
    pub receipt: Receipt,
    pub bloom: Bloom,
    /// `total_gas_spent * effective_gas_price`
    pub amount_spent: U256,
    pub total_gas_spent: u64,
    pub gas_refund: u64,
    pub effective_gas_price: u64,
    /// Paid to the coinbase.
    pub miner_value: U256,
    pub created_address: Option<Address>,
    pub blob_gas_used: Option<u64>,
    pub access_list: Option<AccessList>,
    pub exec_result: ExecResult,
}

impl RunTxResult {
    pub fn is_success(&self) -> bool {
        self.exec_result.is_success()
    }
}

/// Values fixed by validation and needed to apply the transaction.
struct Validated {
    sender: Address,
    intrinsic_gas: u64,
    effective_gas_price: u64,
    blob_gas_price: U256,
    /// Balance the sender is topped up to when balance checks are skipped.
    top_up: Option<U256>,
}

fn default_block(vm: &Vm, tx: &Transaction) -> BlockHeader {
    BlockHeader {
        gas_limit: DEFAULT_BLOCK_GAS_LIMIT.max(tx.gas_limit()),
        base_fee_per_gas: vm.config.is_london_activated().then_some(0),
        excess_blob_gas: vm.config.is_cancun_activated().then_some(0),
        ..BlockHeader::empty()
    }
}

/// Applies a single transaction to the VM state and produces its receipt.
///
/// Validation failures and state errors leave the state untouched. An
/// exceptional halt inside the interpreter still charges gas, bumps the nonce
/// and yields a failed receipt, unless `throw_on_fail` is set.
#[instrument(level = "debug", skip_all, fields(tx_hash = %opts.tx.hash()))]
pub async fn run_tx(vm: &mut Vm, opts: RunTxOpts) -> Result<RunTxResult, VmError> {
    let block = match &opts.block {
        Some(block) => block.clone(),
        None => default_block(vm, &opts.tx),
    };
    let block_env = BlockEnv::new(&block, &vm.config);
    let validated = validate_tx(vm, &opts, &block_env).await?;

    let depth = vm.state.checkpoint_depth();
    vm.state.checkpoint();
    let result = match apply_tx(vm, &opts, &block_env, &validated).await {
        Ok(result) => {
            vm.state.commit()?;
            Ok(result)
        }
        Err(err) => {
            debug!(%err, "Reverting transaction");
            vm.state.revert()?;
            Err(err)
        }
    };
    let found = vm.state.checkpoint_depth();
    if found != depth {
        return Err(StateError::CheckpointDepthMismatch {
            expected: depth,
            found,
        }
        .into());
    }
    result
}

async fn validate_tx(
    vm: &mut Vm,
    opts: &RunTxOpts,
    block: &BlockEnv,
) -> Result<Validated, VmError> {
    let tx = &opts.tx;
    let config = vm.config;

    // (1) INVALID_SIGNATURE
    let sender = match opts.sender {
        Some(sender) => sender,
        None => tx
            .sender()
            .map_err(|err| TxValidationError::InvalidSignature(err.to_string()))?,
    };

    // (2) TYPE_NOT_SUPPORTED
    if !opts.skip_hardfork_validation {
        let activation = match tx.tx_type() {
            TxType::Legacy => Fork::Frontier,
            TxType::EIP2930 => Fork::Berlin,
            TxType::EIP1559 => Fork::London,
            TxType::EIP4844 => Fork::Cancun,
        };
        if config.fork < activation {
            return Err(TxValidationError::UnsupportedTxType(tx.tx_type(), activation).into());
        }
    }

    // (3) INVALID_CHAIN_ID
    if let Some(chain_id) = tx.chain_id() {
        if chain_id != config.chain_id {
            return Err(TxValidationError::InvalidChainId {
                expected: config.chain_id,
                got: chain_id,
            }
            .into());
        }
    }

    // (4) GAS_ALLOWANCE_EXCEEDED
    if !opts.skip_block_gas_limit_validation {
        let available = block.gas_limit.saturating_sub(opts.block_gas_used);
        if tx.gas_limit() > available {
            return Err(TxValidationError::GasAllowanceExceeded {
                gas_limit: tx.gas_limit(),
                available,
            }
            .into());
        }
    }

    // (5) INTRINSIC_GAS_TOO_LOW
    let intrinsic_gas = tx.intrinsic_gas(&config).unwrap_or(u64::MAX);
    if intrinsic_gas > tx.gas_limit() {
        return Err(TxValidationError::IntrinsicGasTooLow {
            intrinsic: intrinsic_gas,
            gas_limit: tx.gas_limit(),
        }
        .into());
    }

    // (6) INITCODE_SIZE_EXCEEDED
    if tx.is_contract_creation()
        && config.is_shanghai_activated()
        && tx.data().len() > MAX_INITCODE_SIZE
    {
        return Err(TxValidationError::InitcodeSizeExceeded(tx.data().len()).into());
    }

    // (7) INSUFFICIENT_MAX_FEE_PER_GAS
    if config.is_london_activated() {
        let base_fee = block.base_fee_per_gas.unwrap_or_default();
        if tx.gas_price() < base_fee {
            return Err(TxValidationError::InsufficientMaxFeePerGas {
                max_fee: tx.gas_price(),
                base_fee,
            }
            .into());
        }
    }

    // (8) PRIORITY_GREATER_THAN_MAX_FEE_PER_GAS
    if let (Some(tip), Some(max_fee)) = (tx.max_priority_fee(), tx.max_fee_per_gas()) {
        if tip > max_fee {
            return Err(TxValidationError::PriorityGreaterThanMaxFeePerGas { tip, max_fee }.into());
        }
    }

    // (9) Blob transactions
    let mut blob_gas_price = U256::zero();
    if let Some(max_fee_per_blob_gas) = tx.max_fee_per_blob_gas() {
        if tx.blob_versioned_hashes().is_empty() {
            return Err(TxValidationError::Type3TxZeroBlobs.into());
        }
        if let Some(schedule) = config.get_fork_blob_schedule() {
            let max = schedule.max_blob_gas();
            if tx.blob_gas() > max {
                return Err(TxValidationError::BlobGasLimitExceeded {
                    blob_gas: tx.blob_gas(),
                    max,
                }
                .into());
            }
        }
        blob_gas_price = block.blob_base_fee.unwrap_or(U256::one());
        if max_fee_per_blob_gas < blob_gas_price {
            return Err(TxValidationError::InsufficientMaxFeePerBlobGas {
                max_fee: max_fee_per_blob_gas,
                base_fee: blob_gas_price,
            }
            .into());
        }
    }

    let account = vm.state.get_account_or_default(sender).await?;

    // (10) SENDER_NOT_EOA
    if account.has_code() {
        return Err(TxValidationError::SenderNotEoa(sender).into());
    }

    // (11) NONCE_MISMATCH
    if !opts.skip_nonce {
        if tx.nonce() < account.nonce {
            return Err(TxValidationError::NonceTooLow {
                expected: account.nonce,
                got: tx.nonce(),
            }
            .into());
        }
        if tx.nonce() > account.nonce {
            return Err(TxValidationError::NonceTooHigh {
                expected: account.nonce,
                got: tx.nonce(),
            }
            .into());
        }
    }

    // (12) INSUFFICIENT_ACCOUNT_FUNDS
    let required = tx.max_cost();
    let mut top_up = None;
    if required.is_none_or(|required| account.balance < required) {
        // A cost past 256 bits can never be covered
        let required = required.unwrap_or(U256::MAX);
        if !opts.skip_balance {
            return Err(TxValidationError::InsufficientFunds {
                sender,
                balance: account.balance,
                required,
            }
            .into());
        }
        top_up = Some(required);
    }

    Ok(Validated {
        sender,
        intrinsic_gas,
        effective_gas_price: tx.effective_gas_price(block.base_fee_per_gas),
        blob_gas_price,
        top_up,
    })
}

async fn apply_tx(
    vm: &mut Vm,
    opts: &RunTxOpts,
    block: &BlockEnv,
    validated: &Validated,
) -> Result<RunTxResult, VmError> {
    let tx = &opts.tx;
    let sender = validated.sender;
    let gas_price = U256::from(validated.effective_gas_price);

    // Pre-pay the whole gas limit and the blob fee.
    if let Some(balance) = validated.top_up {
        let mut account = vm.state.get_account_or_default(sender).await?;
        account.balance = balance;
        vm.state.put_account(sender, account);
    }
    let blob_gas_used = matches!(tx, Transaction::EIP4844Transaction(_)).then(|| tx.blob_gas());
    let blob_fee =
        U256::from(blob_gas_used.unwrap_or_default()).saturating_mul(validated.blob_gas_price);
    let upfront = (U256::from(tx.gas_limit()) * gas_price).saturating_add(blob_fee);
    vm.state.sub_balance(sender, upfront).await?;
    vm.state.increment_nonce(sender).await?;

    let context = ExecutionContext {
        caller: sender,
        origin: sender,
        to: tx.to(),
        value: tx.value(),
        data: tx.data().clone(),
        gas_limit: tx.gas_limit() - validated.intrinsic_gas,
        is_static: false,
        gas_price: validated.effective_gas_price,
        block: block.clone(),
    };
    let exec_gas_limit = context.gas_limit;

    // Code execution gets its own checkpoint so a halt only discards what it wrote.
    vm.state.checkpoint();
    let interpreter = vm.interpreter();
    let mut exec_result = match interpreter.execute(context, &mut vm.state).await {
        Ok(result) => result,
        Err(err) => {
            vm.state.revert()?;
            return Err(err);
        }
    };
    match &exec_result.exception_error {
        None => vm.state.commit()?,
        Some(exception) => {
            vm.state.revert()?;
            trace!(%exception, "Execution halted");
            if opts.throw_on_fail {
                return Err(VmError::Execution(exception.clone()));
            }
            exec_result.gas_refund = 0;
            exec_result.logs.clear();
            exec_result.selfdestructs.clear();
            exec_result.created_address = None;
        }
    }

    // Refund: the unused gas is returned, then at most gas_used / quotient of the refund counter.
    let mut gas_used = validated.intrinsic_gas + exec_result.gas_used.min(exec_gas_limit);
    let gas_refund = exec_result
        .gas_refund
        .min(gas_used / vm.config.max_refund_quotient());
    gas_used -= gas_refund;
    let unused = tx.gas_limit() - gas_used;
    vm.state
        .add_balance(sender, U256::from(unused) * gas_price)
        .await?;

    // Coinbase gets the priority fee; before London it gets the whole gas price.
    let miner_fee = if vm.config.is_london_activated() {
        validated
            .effective_gas_price
            .saturating_sub(block.base_fee_per_gas.unwrap_or_default())
    } else {
        validated.effective_gas_price
    };
    let miner_value = U256::from(gas_used) * U256::from(miner_fee);
    if miner_value.is_zero() && vm.config.is_spurious_dragon_activated() {
        // EIP-161: an empty coinbase touched by a zero payment goes away.
        if vm
            .state
            .get_account(block.coinbase)
            .await?
            .is_some_and(|account| account.is_empty())
        {
            vm.state.delete_account(block.coinbase);
        }
    } else {
        vm.state.add_balance(block.coinbase, miner_value).await?;
    }

    // EIP-6780: from Cancun only accounts created in this transaction are destroyed.
    for address in &exec_result.selfdestructs {
        if !vm.config.is_cancun_activated() || exec_result.created_accounts.contains(address) {
            vm.state.delete_account(*address);
        }
    }

    let state_root = (tx.tx_type() == TxType::Legacy && !vm.config.is_byzantium_activated())
        .then(|| vm.state.state_root());
    let blob_gas_price =
        blob_gas_used.map(|_| u64::try_from(validated.blob_gas_price).unwrap_or(u64::MAX));
    let receipt = generate_tx_receipt(
        tx,
        &exec_result,
        opts.block_gas_used + gas_used,
        blob_gas_used,
        blob_gas_price,
        &vm.config,
        state_root,
    );

    let access_list = opts.report_access_list.then(|| {
        exec_result
            .accessed
            .iter()
            .filter(|(address, _)| **address != sender)
            .map(|(address, keys)| (*address, keys.iter().copied().collect()))
            .collect()
    });

    debug!(
        %sender,
        gas_used,
        success = exec_result.is_success(),
        "Transaction executed"
    );
    Ok(RunTxResult {
        tx_hash: tx.hash(),
        sender,
        bloom: receipt.bloom,
        receipt,
        amount_spent: U256::from(gas_used) * gas_price,
        total_gas_spent: gas_used,
        gas_refund,
        effective_gas_price: validated.effective_gas_price,
        miner_value,
        created_address: exec_result.created_address,
        blob_gas_used,
        access_list,
        exec_result,
    })
}
