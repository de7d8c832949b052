use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tevm_common::{
    Address, Bloom, H256, U256,
    constants::DEFAULT_OMMERS_HASH,
    types::{
        Block, BlockBody, BlockHeader, Receipt, Transaction, Withdrawal, calc_excess_blob_gas,
        calculate_base_fee_per_gas, compute_receipts_root, compute_transactions_root,
        compute_withdrawals_root,
    },
};
use tracing::{debug, warn};

use crate::{
    errors::{BuilderError, VmError},
    run_block::{assign_block_rewards, process_withdrawals},
    run_tx::{RunTxOpts, RunTxResult, run_tx},
    vm::Vm,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Pending,
    Built,
    Reverted,
}

/// Header values that override what is derived from the parent.
#[derive(Debug, Clone, Default)]
pub struct HeaderData {
    pub number: Option<u64>,
    pub coinbase: Option<Address>,
    pub timestamp: Option<u64>,
    pub gas_limit: Option<u64>,
    pub difficulty: Option<U256>,
    pub extra_data: Option<Bytes>,
    pub prev_randao: Option<H256>,
    pub base_fee_per_gas: Option<u64>,
    pub excess_blob_gas: Option<u64>,
    pub parent_beacon_block_root: Option<H256>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildBlockOpts {
    pub parent: BlockHeader,
    pub header_data: HeaderData,
    pub withdrawals: Option<Vec<Withdrawal>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AddTxOpts {
    /// Executes as this sender instead of the one recovered from the signature
    pub sender: Option<Address>,
    pub skip_nonce: bool,
    pub skip_balance: bool,
    pub skip_hardfork_validation: bool,
}

/// Proof of work seal applied when building.
#[derive(Debug, Clone, Copy, Default)]
pub struct SealOpts {
    pub nonce: u64,
    pub mix_hash: H256,
}

/// Assembles a block one transaction at a time on top of the VM state.
///
/// The builder holds a checkpoint for its whole life: `build` commits it,
/// `revert` (or dropping a pending builder) discards it.
#[derive(Debug)]
pub struct BlockBuilder<'vm> {
    vm: &'vm mut Vm,
    header: BlockHeader,
    withdrawals: Option<Vec<Withdrawal>>,
    transactions: Vec<Transaction>,
    receipts: Vec<Receipt>,
    results: Vec<RunTxResult>,
    gas_used: u64,
    blob_gas_used: u64,
    logs_bloom: Bloom,
    status: BuildStatus,
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Starts a new block on top of `opts.parent`.
pub fn build_block(vm: &mut Vm, opts: BuildBlockOpts) -> BlockBuilder<'_> {
    let BuildBlockOpts {
        parent,
        header_data,
        withdrawals,
    } = opts;
    let config = vm.config;

    let base_fee_per_gas = config
        .is_london_activated()
        .then(|| {
            header_data
                .base_fee_per_gas
                .unwrap_or_else(|| calculate_base_fee_per_gas(&parent))
        });
    let excess_blob_gas = config.get_fork_blob_schedule().map(|schedule| {
        header_data.excess_blob_gas.unwrap_or_else(|| {
            calc_excess_blob_gas(
                parent.excess_blob_gas.unwrap_or_default(),
                parent.blob_gas_used.unwrap_or_default(),
                schedule.target_blob_gas(),
            )
        })
    });
    let cancun = config.is_cancun_activated();
    let shanghai = config.is_shanghai_activated();

    let header = BlockHeader {
        parent_hash: parent.hash(),
        ommers_hash: *DEFAULT_OMMERS_HASH,
        coinbase: header_data.coinbase.unwrap_or_default(),
        number: header_data.number.unwrap_or(parent.number + 1),
        gas_limit: header_data.gas_limit.unwrap_or(parent.gas_limit),
        timestamp: header_data
            .timestamp
            .unwrap_or_else(|| unix_timestamp().max(parent.timestamp + 1)),
        difficulty: header_data.difficulty.unwrap_or(if config.is_pow() {
            parent.difficulty
        } else {
            U256::zero()
        }),
        extra_data: header_data.extra_data.unwrap_or_default(),
        prev_randao: header_data.prev_randao.unwrap_or_default(),
        base_fee_per_gas,
        excess_blob_gas: if cancun { excess_blob_gas } else { None },
        blob_gas_used: cancun.then_some(0),
        parent_beacon_block_root: cancun
            .then(|| header_data.parent_beacon_block_root.unwrap_or_default()),
        ..BlockHeader::empty()
    };
    let withdrawals = shanghai.then(|| withdrawals.unwrap_or_default());

    vm.state.checkpoint();
    debug!(number = header.number, "Building block");
    BlockBuilder {
        vm,
        header,
        withdrawals,
        transactions: Vec::new(),
        receipts: Vec::new(),
        results: Vec::new(),
        gas_used: 0,
        blob_gas_used: 0,
        logs_bloom: Bloom::zero(),
        status: BuildStatus::Pending,
    }
}

impl BlockBuilder<'_> {
    pub fn status(&self) -> BuildStatus {
        self.status
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn gas_left(&self) -> u64 {
        self.header.gas_limit.saturating_sub(self.gas_used)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    pub fn results(&self) -> &[RunTxResult] {
        &self.results
    }

    pub fn vm(&mut self) -> &mut Vm {
        self.vm
    }

    fn ensure_pending(&self) -> Result<(), BuilderError> {
        match self.status {
            BuildStatus::Pending => Ok(()),
            status => Err(BuilderError::AlreadyFinalized(status)),
        }
    }

    /// Runs `tx` on top of the transactions already in the block.
    pub async fn add_transaction(
        &mut self,
        tx: Transaction,
        opts: AddTxOpts,
    ) -> Result<RunTxResult, VmError> {
        self.ensure_pending()?;
        let available = self.gas_left();
        if tx.gas_limit() > available {
            return Err(BuilderError::GasLimitExceeded {
                gas_limit: tx.gas_limit(),
                available,
            }
            .into());
        }
        if let Some(schedule) = self.vm.config.get_fork_blob_schedule() {
            let blob_gas = self.blob_gas_used + tx.blob_gas();
            if blob_gas > schedule.max_blob_gas() {
                return Err(BuilderError::BlobGasLimitExceeded {
                    blob_gas,
                    max: schedule.max_blob_gas(),
                }
                .into());
            }
        }

        let result = run_tx(
            self.vm,
            RunTxOpts {
                tx: tx.clone(),
                sender: opts.sender,
                block: Some(self.header.clone()),
                block_gas_used: self.gas_used,
                skip_nonce: opts.skip_nonce,
                skip_balance: opts.skip_balance,
                skip_hardfork_validation: opts.skip_hardfork_validation,
                ..Default::default()
            },
        )
        .await?;

        self.gas_used += result.total_gas_spent;
        self.blob_gas_used += result.blob_gas_used.unwrap_or_default();
        self.logs_bloom.accrue_bloom(&result.bloom);
        self.transactions.push(tx);
        self.receipts.push(result.receipt.clone());
        self.results.push(result.clone());
        Ok(result)
    }

    /// Pays rewards and withdrawals, seals the header and commits the block
    /// state.
    pub async fn build(&mut self, seal: Option<SealOpts>) -> Result<Block, VmError> {
        self.ensure_pending()?;
        if let Some(withdrawals) = &self.withdrawals {
            process_withdrawals(&mut self.vm.state, withdrawals).await?;
        }
        if self.vm.config.is_pow() {
            assign_block_rewards(self.vm, &self.header, &[]).await?;
        }

        let mut header = self.header.clone();
        header.state_root = self.vm.state.state_root();
        header.transactions_root = compute_transactions_root(&self.transactions);
        header.receipts_root = compute_receipts_root(&self.receipts);
        header.logs_bloom = self.logs_bloom;
        header.gas_used = self.gas_used;
        if header.blob_gas_used.is_some() {
            header.blob_gas_used = Some(self.blob_gas_used);
        }
        header.withdrawals_root = self.withdrawals.as_deref().map(compute_withdrawals_root);
        if let Some(seal) = seal {
            header.nonce = seal.nonce;
            header.prev_randao = seal.mix_hash;
        }

        self.vm.state.commit()?;
        self.status = BuildStatus::Built;
        self.header = header.clone();
        debug!(
            number = header.number,
            txs = self.transactions.len(),
            gas_used = self.gas_used,
            "Block built"
        );
        Ok(Block::new(
            header,
            BlockBody {
                transactions: self.transactions.clone(),
                ommers: Vec::new(),
                withdrawals: self.withdrawals.clone(),
            },
        ))
    }

    /// Throws away every change made by the builder.
    pub fn revert(&mut self) -> Result<(), VmError> {
        self.ensure_pending()?;
        self.vm.state.revert()?;
        self.status = BuildStatus::Reverted;
        Ok(())
    }
}

impl Drop for BlockBuilder<'_> {
    fn drop(&mut self) {
        if self.status == BuildStatus::Pending {
            if let Err(err) = self.vm.state.revert() {
                warn!(%err, "Failed to revert abandoned block builder");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use secp256k1::SecretKey;
    use tevm_common::{
        constants::{EMPTY_TRIE_HASH, ether},
        types::{AccountState, ChainConfig, EIP1559Transaction, Fork, TxKind},
    };
    use tevm_storage::StateManager;

    use super::*;
    use crate::run_block::{RunBlockOpts, run_block};

    fn key() -> SecretKey {
        SecretKey::from_slice(&[0x22; 32]).unwrap()
    }

    fn transfer(nonce: u64, gas_limit: u64) -> Transaction {
        let mut tx = Transaction::EIP1559Transaction(EIP1559Transaction {
            chain_id: 1,
            nonce,
            max_priority_fee_per_gas: 1_000_000_000,
            max_fee_per_gas: 2_000_000_000,
            gas_limit,
            to: TxKind::Call(Address::repeat_byte(0xbb)),
            value: U256::from(1),
            ..Default::default()
        });
        tx.sign(&key(), Some(1));
        tx
    }

    fn vm() -> Vm {
        let mut state = StateManager::new();
        let sender = transfer(0, 21000).sender().unwrap();
        state.put_account(sender, AccountState::with_balance(ether(1)));
        Vm::new(ChainConfig::new(1, Fork::Cancun), state)
    }

    fn parent() -> BlockHeader {
        BlockHeader {
            number: 7,
            gas_limit: 30_000_000,
            gas_used: 15_000_000,
            timestamp: 1_000,
            base_fee_per_gas: Some(1_000_000_000),
            excess_blob_gas: Some(0),
            blob_gas_used: Some(0),
            ..BlockHeader::empty()
        }
    }

    #[test]
    fn header_derived_from_parent() {
        let mut vm = vm();
        let builder = build_block(
            &mut vm,
            BuildBlockOpts {
                parent: parent(),
                header_data: HeaderData {
                    timestamp: Some(2_000),
                    ..Default::default()
                },
                withdrawals: None,
            },
        );
        let header = builder.header();
        assert_eq!(header.number, 8);
        assert_eq!(header.parent_hash, parent().hash());
        assert_eq!(header.gas_limit, 30_000_000);
        assert_eq!(header.base_fee_per_gas, Some(1_000_000_000));
        assert_eq!(header.excess_blob_gas, Some(0));
        assert_eq!(header.parent_beacon_block_root, Some(H256::zero()));
        assert_eq!(header.timestamp, 2_000);
    }

    #[tokio::test]
    async fn built_block_is_valid() {
        let mut vm = vm();
        let block = {
            let mut builder = build_block(
                &mut vm,
                BuildBlockOpts {
                    parent: parent(),
                    ..Default::default()
                },
            );
            builder
                .add_transaction(transfer(0, 21000), AddTxOpts::default())
                .await
                .unwrap();
            builder
                .add_transaction(transfer(1, 21000), AddTxOpts::default())
                .await
                .unwrap();
            let block = builder.build(None).await.unwrap();
            assert_eq!(builder.status(), BuildStatus::Built);
            assert!(matches!(
                builder.build(None).await,
                Err(VmError::Builder(BuilderError::AlreadyFinalized(BuildStatus::Built)))
            ));
            block
        };
        assert_eq!(block.header.gas_used, 42000);
        assert_eq!(block.header.withdrawals_root, Some(*EMPTY_TRIE_HASH));
        assert_eq!(block.header.state_root, vm.state.state_root());
        assert_eq!(vm.state.checkpoint_depth(), 0);

        let mut replay = self::vm();
        run_block(
            &mut replay,
            RunBlockOpts {
                block,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn rejects_transactions_over_the_gas_left() {
        let mut vm = vm();
        let mut builder = build_block(
            &mut vm,
            BuildBlockOpts {
                parent: BlockHeader {
                    gas_limit: 30_000,
                    gas_used: 15_000,
                    ..parent()
                },
                ..Default::default()
            },
        );
        builder
            .add_transaction(transfer(0, 21000), AddTxOpts::default())
            .await
            .unwrap();
        let err = builder
            .add_transaction(transfer(1, 21000), AddTxOpts::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VmError::Builder(BuilderError::GasLimitExceeded {
                gas_limit: 21000,
                available: 9000
            })
        ));
    }

    #[tokio::test]
    async fn revert_discards_changes() {
        let mut vm = vm();
        let root = vm.state.state_root();
        {
            let mut builder = build_block(
                &mut vm,
                BuildBlockOpts {
                    parent: parent(),
                    ..Default::default()
                },
            );
            builder
                .add_transaction(transfer(0, 21000), AddTxOpts::default())
                .await
                .unwrap();
            builder.revert().unwrap();
            assert!(matches!(
                builder.revert(),
                Err(VmError::Builder(BuilderError::AlreadyFinalized(BuildStatus::Reverted)))
            ));
        }
        assert_eq!(vm.state.state_root(), root);

        // Dropping a pending builder reverts too.
        {
            let mut builder = build_block(
                &mut vm,
                BuildBlockOpts {
                    parent: parent(),
                    ..Default::default()
                },
            );
            builder
                .add_transaction(transfer(0, 21000), AddTxOpts::default())
                .await
                .unwrap();
        }
        assert_eq!(vm.state.state_root(), root);
        assert_eq!(vm.state.checkpoint_depth(), 0);
    }
}
