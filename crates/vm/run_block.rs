use tevm_common::{
    Address, Bloom, H256, U256,
    constants::{MAX_OMMER_DEPTH, OMMER_INCLUSION_REWARD_DIVISOR},
    types::{
        Block, BlockHeader, Receipt, Withdrawal, compute_receipts_root, compute_transactions_root,
        compute_withdrawals_root,
    },
};
use tevm_storage::{StateError, StateManager};
use tracing::{debug, instrument};

use crate::{
    errors::{InvalidBlockError, VmError},
    run_tx::{RunTxOpts, RunTxResult, run_tx},
    vm::Vm,
};

#[derive(Debug, Clone, Default)]
pub struct RunBlockOpts {
    pub block: Block,
    /// Fill the computed roots into the returned block instead of checking
    /// them against the header.
    pub generate: bool,
    pub skip_block_validation: bool,
    pub skip_nonce: bool,
    pub skip_balance: bool,
    pub skip_header_validation: bool,
}

#[derive(Debug, Clone)]
pub struct RunBlockResult {
    /// The executed block, with computed fields when generating.
    pub block: Block,
    pub receipts: Vec<Receipt>,
    pub results: Vec<RunTxResult>,
    pub gas_used: u64,
    pub blob_gas_used: u64,
    pub logs_bloom: Bloom,
    pub receipts_root: H256,
    pub state_root: H256,
}

/// Share of the block reward paid to the miner of an ommer included at
/// `block_number`. Ommers further than [`MAX_OMMER_DEPTH`] blocks back earn nothing.
pub fn calculate_ommer_reward(ommer_number: u64, block_number: u64, block_reward: U256) -> U256 {
    let distance = block_number.saturating_sub(ommer_number);
    let Some(factor) = MAX_OMMER_DEPTH.checked_sub(distance) else {
        return U256::zero();
    };
    block_reward * U256::from(factor) / U256::from(MAX_OMMER_DEPTH)
}

/// Block reward plus an inclusion bonus for every ommer.
pub fn calculate_miner_reward(block_reward: U256, ommers: usize) -> U256 {
    block_reward + block_reward / U256::from(OMMER_INCLUSION_REWARD_DIVISOR) * U256::from(ommers)
}

pub async fn reward_account(
    state: &mut StateManager,
    address: Address,
    reward: U256,
) -> Result<(), StateError> {
    state.add_balance(address, reward).await
}

/// Pays the proof of work block and ommer rewards.
pub(crate) async fn assign_block_rewards(
    vm: &mut Vm,
    header: &BlockHeader,
    ommers: &[BlockHeader],
) -> Result<(), StateError> {
    let block_reward = vm.config.block_reward();
    for ommer in ommers {
        let reward = calculate_ommer_reward(ommer.number, header.number, block_reward);
        reward_account(&mut vm.state, ommer.coinbase, reward).await?;
    }
    let reward = calculate_miner_reward(block_reward, ommers.len());
    reward_account(&mut vm.state, header.coinbase, reward).await
}

/// Credits withdrawals, whose amounts are denominated in gwei.
pub(crate) async fn process_withdrawals(
    state: &mut StateManager,
    withdrawals: &[Withdrawal],
) -> Result<(), StateError> {
    for withdrawal in withdrawals.iter().filter(|w| w.amount > 0) {
        state
            .add_balance(withdrawal.address, withdrawal.amount_in_wei())
            .await?;
    }
    Ok(())
}

fn validate_header(vm: &Vm, header: &BlockHeader) -> Result<(), InvalidBlockError> {
    if header.gas_used > header.gas_limit {
        return Err(InvalidBlockError::GasUsedExceedsGasLimit {
            gas_used: header.gas_used,
            gas_limit: header.gas_limit,
        });
    }
    if vm.config.is_london_activated() && header.base_fee_per_gas.is_none() {
        return Err(InvalidBlockError::MissingHeaderField("baseFeePerGas"));
    }
    if vm.config.is_shanghai_activated() && header.withdrawals_root.is_none() {
        return Err(InvalidBlockError::MissingHeaderField("withdrawalsRoot"));
    }
    if vm.config.is_cancun_activated() {
        if header.excess_blob_gas.is_none() {
            return Err(InvalidBlockError::MissingHeaderField("excessBlobGas"));
        }
        if header.parent_beacon_block_root.is_none() {
            return Err(InvalidBlockError::MissingHeaderField("parentBeaconBlockRoot"));
        }
    }
    Ok(())
}

fn validate_body(block: &Block) -> Result<(), InvalidBlockError> {
    let computed = compute_transactions_root(&block.body.transactions);
    if computed != block.header.transactions_root {
        return Err(InvalidBlockError::InvalidTransactionsRoot {
            expected: block.header.transactions_root,
            computed,
        });
    }
    if let (Some(withdrawals), Some(expected)) =
        (&block.body.withdrawals, block.header.withdrawals_root)
    {
        let computed = compute_withdrawals_root(withdrawals);
        if computed != expected {
            return Err(InvalidBlockError::InvalidWithdrawalsRoot { expected, computed });
        }
    }
    Ok(())
}

/// Executes every transaction of a block in order, then pays withdrawals and
/// rewards. Either the whole block is applied or nothing is.
#[instrument(level = "debug", skip_all, fields(block_number = opts.block.header.number))]
pub async fn run_block(vm: &mut Vm, opts: RunBlockOpts) -> Result<RunBlockResult, VmError> {
    let depth = vm.state.checkpoint_depth();
    vm.state.checkpoint();
    let result = match apply_block(vm, &opts).await {
        Ok(result) => {
            vm.state.commit()?;
            Ok(result)
        }
        Err(err) => {
            debug!(%err, "Reverting block");
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

async fn apply_block(vm: &mut Vm, opts: &RunBlockOpts) -> Result<RunBlockResult, VmError> {
    let mut block = opts.block.clone();
    if !opts.skip_header_validation && !opts.generate {
        validate_header(vm, &block.header)?;
    }
    if !opts.skip_block_validation && !opts.generate {
        validate_body(&block)?;
    }

    let mut gas_used = 0;
    let mut blob_gas_used = 0;
    let mut logs_bloom = Bloom::zero();
    let mut receipts = Vec::with_capacity(block.body.transactions.len());
    let mut results = Vec::with_capacity(block.body.transactions.len());

    for tx in &block.body.transactions {
        if !opts.skip_block_validation {
            let available = block.header.gas_limit.saturating_sub(gas_used);
            if tx.gas_limit() > available {
                return Err(InvalidBlockError::TxGasLimitExceedsRemaining {
                    gas_limit: tx.gas_limit(),
                    available,
                }
                .into());
            }
        }
        let result = run_tx(
            vm,
            RunTxOpts {
                tx: tx.clone(),
                block: Some(block.header.clone()),
                block_gas_used: gas_used,
                skip_nonce: opts.skip_nonce,
                skip_balance: opts.skip_balance,
                skip_block_gas_limit_validation: opts.skip_block_validation,
                ..Default::default()
            },
        )
        .await?;
        gas_used += result.total_gas_spent;
        blob_gas_used += result.blob_gas_used.unwrap_or_default();
        logs_bloom.accrue_bloom(&result.bloom);
        receipts.push(result.receipt.clone());
        results.push(result);
    }

    if vm.config.is_shanghai_activated() {
        if let Some(withdrawals) = &block.body.withdrawals {
            process_withdrawals(&mut vm.state, withdrawals).await?;
        }
    }
    if vm.config.is_pow() {
        assign_block_rewards(vm, &block.header, &block.body.ommers).await?;
    }

    let receipts_root = compute_receipts_root(&receipts);
    let state_root = vm.state.state_root();
    let cancun = vm.config.is_cancun_activated();

    if opts.generate {
        let header = &mut block.header;
        header.receipts_root = receipts_root;
        header.logs_bloom = logs_bloom;
        header.gas_used = gas_used;
        header.state_root = state_root;
        header.transactions_root = compute_transactions_root(&block.body.transactions);
        if let Some(withdrawals) = &block.body.withdrawals {
            header.withdrawals_root = Some(compute_withdrawals_root(withdrawals));
        }
        if cancun {
            header.blob_gas_used = Some(blob_gas_used);
        }
    } else {
        let header = &block.header;
        if header.receipts_root != receipts_root {
            return Err(InvalidBlockError::InvalidReceiptsRoot {
                expected: header.receipts_root,
                computed: receipts_root,
            }
            .into());
        }
        if header.logs_bloom != logs_bloom {
            return Err(InvalidBlockError::InvalidLogsBloom {
                expected: Box::new(header.logs_bloom),
                computed: Box::new(logs_bloom),
            }
            .into());
        }
        if header.gas_used != gas_used {
            return Err(InvalidBlockError::InvalidGasUsed {
                expected: header.gas_used,
                computed: gas_used,
            }
            .into());
        }
        if cancun && header.blob_gas_used != Some(blob_gas_used) {
            return Err(InvalidBlockError::InvalidBlobGasUsed {
                expected: header.blob_gas_used,
                computed: blob_gas_used,
            }
            .into());
        }
        if header.state_root != state_root {
            return Err(InvalidBlockError::InvalidStateRoot {
                expected: header.state_root,
                computed: state_root,
            }
            .into());
        }
    }

    debug!(
        block_number = block.header.number,
        txs = receipts.len(),
        gas_used,
        "Block executed"
    );
    Ok(RunBlockResult {
        block,
        receipts,
        results,
        gas_used,
        blob_gas_used,
        logs_bloom,
        receipts_root,
        state_root,
    })
}

#[cfg(test)]
mod tests {
    use secp256k1::SecretKey;
    use tevm_common::{
        constants::{ETHER_TO_WEI, ether},
        types::{
            AccountState, BlockBody, ChainConfig, EIP1559Transaction, Fork, Transaction, TxKind,
        },
    };

    use super::*;

    fn reward() -> U256 {
        U256::from(2) * U256::from(ETHER_TO_WEI)
    }

    #[test]
    fn ommer_reward_by_distance() {
        let r = reward();
        assert_eq!(calculate_ommer_reward(100, 101, r), r * 7 / 8);
        assert_eq!(calculate_ommer_reward(100, 102, r), r * 6 / 8);
        assert_eq!(calculate_ommer_reward(100, 107, r), r / 8);
        assert_eq!(calculate_ommer_reward(100, 108, r), U256::zero());
        assert_eq!(calculate_ommer_reward(100, 110, r), U256::zero());
    }

    #[test]
    fn miner_reward_with_ommers() {
        let r = reward();
        assert_eq!(calculate_miner_reward(r, 0), r);
        assert_eq!(calculate_miner_reward(r, 2), r + r / 32 * 2);
    }

    fn signed_transfer(key: &SecretKey, nonce: u64) -> Transaction {
        let mut tx = Transaction::EIP1559Transaction(EIP1559Transaction {
            chain_id: 1,
            nonce,
            max_priority_fee_per_gas: 2,
            max_fee_per_gas: 10,
            gas_limit: 21000,
            to: TxKind::Call(Address::repeat_byte(0xbb)),
            value: U256::from(1000),
            ..Default::default()
        });
        tx.sign(key, Some(1));
        tx
    }

    fn shanghai_vm(key: &SecretKey) -> Vm {
        let mut state = StateManager::new();
        let sender = signed_transfer(key, 0).sender().unwrap();
        state.put_account(sender, AccountState::with_balance(ether(1)));
        Vm::new(ChainConfig::new(1, Fork::Shanghai), state)
    }

    fn block(key: &SecretKey) -> Block {
        Block::new(
            BlockHeader {
                number: 1,
                gas_limit: 30_000_000,
                base_fee_per_gas: Some(7),
                coinbase: Address::repeat_byte(0xcc),
                ..BlockHeader::empty()
            },
            BlockBody {
                transactions: vec![signed_transfer(key, 0), signed_transfer(key, 1)],
                ommers: vec![],
                withdrawals: Some(vec![Withdrawal {
                    index: 0,
                    validator_index: 0,
                    address: Address::repeat_byte(0xdd),
                    amount: 5,
                }]),
            },
        )
    }

    #[tokio::test]
    async fn generated_block_validates_on_a_fresh_state() {
        let key = SecretKey::from_slice(&[0x11; 32]).unwrap();

        let mut vm = shanghai_vm(&key);
        let generated = run_block(
            &mut vm,
            RunBlockOpts {
                block: block(&key),
                generate: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(generated.gas_used, 42000);
        assert_eq!(generated.receipts[1].cumulative_gas_used, 42000);
        let withdrawn = vm.state.get_account(Address::repeat_byte(0xdd)).await.unwrap().unwrap();
        assert_eq!(withdrawn.balance, U256::from(5_000_000_000u64));

        let mut replay = shanghai_vm(&key);
        let validated = run_block(
            &mut replay,
            RunBlockOpts {
                block: generated.block.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(validated.state_root, generated.state_root);
        assert_eq!(replay.state.state_root(), vm.state.state_root());
    }

    #[tokio::test]
    async fn mismatching_state_root_reverts_block() {
        let key = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let mut vm = shanghai_vm(&key);
        let mut generated = run_block(
            &mut shanghai_vm(&key),
            RunBlockOpts {
                block: block(&key),
                generate: true,
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .block;
        generated.header.state_root = H256::repeat_byte(1);

        let root = vm.state.state_root();
        let err = run_block(
            &mut vm,
            RunBlockOpts {
                block: generated,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            VmError::InvalidBlock(InvalidBlockError::InvalidStateRoot { .. })
        ));
        assert_eq!(vm.state.state_root(), root);
        assert_eq!(vm.state.checkpoint_depth(), 0);
    }

    #[tokio::test]
    async fn proof_of_work_rewards() {
        let mut vm = Vm::new(ChainConfig::new(1, Fork::Byzantium), StateManager::new());
        let ommer = BlockHeader {
            number: 9,
            coinbase: Address::repeat_byte(0x0e),
            ..Default::default()
        };
        let block = Block::new(
            BlockHeader {
                number: 10,
                gas_limit: 8_000_000,
                coinbase: Address::repeat_byte(0xcc),
                ..BlockHeader::empty()
            },
            BlockBody {
                ommers: vec![ommer],
                ..Default::default()
            },
        );
        run_block(
            &mut vm,
            RunBlockOpts {
                block,
                generate: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let r = ether(3);
        let miner = vm.state.get_account(Address::repeat_byte(0xcc)).await.unwrap().unwrap();
        assert_eq!(miner.balance, r + r / 32);
        let uncle = vm.state.get_account(Address::repeat_byte(0x0e)).await.unwrap().unwrap();
        assert_eq!(uncle.balance, r * 7 / 8);
    }
}
