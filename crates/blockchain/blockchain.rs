pub mod error;
pub mod mempool;
pub mod options;
pub mod payload;
pub mod store;

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use error::{ChainError, MempoolError};
use mempool::{AdmissionOpts, Subscription, TxPool, TxPoolEvent};
use options::{MiningConfig, NodeOptions};
use payload::TransactionQueue;
use store::{ChainStore, StoredReceipt};
use tevm_common::{
    Address, H256, U256,
    constants::{EMPTY_TRIE_HASH, INITIAL_BASE_FEE},
    types::{
        AccountState, Block, BlockBody, BlockHeader, Transaction, calculate_base_fee_per_gas,
    },
};
use tevm_storage::{
    BlockTag, FileStatePersister, ForkCoordinator, HttpForkTransport, SerializableState,
    StateManager,
};
use tevm_vm::{
    AddTxOpts, BuildBlockOpts, HeaderData, RunBlockOpts, RunTxResult, Vm, VmError, build_block,
    run_block,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Speculative next block, dropped on every pool event and head change.
#[derive(Debug, Default)]
struct PendingBlockCache {
    generation: u64,
    block: Option<Block>,
}

impl PendingBlockCache {
    fn invalidate(&mut self) {
        self.generation += 1;
        self.block = None;
    }
}

/// An in-process chain: world state, transaction pool and canonical blocks.
///
/// Every operation that mutates the world state holds the VM lock for its
/// whole duration, so blocks and transactions are applied one at a time.
#[derive(Debug)]
pub struct Node {
    vm: tokio::sync::Mutex<Vm>,
    pool: Mutex<TxPool>,
    store: RwLock<ChainStore>,
    pending: Arc<Mutex<PendingBlockCache>>,
    options: NodeOptions,
    _pool_events: Subscription,
}

impl Node {
    /// Creates a node, connecting to the fork first when one is configured.
    pub async fn new(options: NodeOptions) -> Result<Self, ChainError> {
        let state = match &options.fork {
            Some(fork) => {
                let transport = HttpForkTransport::new(&fork.url)?;
                let block = transport.resolve_block_tag(fork.block_tag).await?;
                info!(url = %transport.url(), %block, "Forking remote chain");
                StateManager::forked(Arc::new(ForkCoordinator::new(Arc::new(transport), block)))
            }
            None => StateManager::new(),
        };
        Self::with_state(options, state)
    }

    /// Creates a node on top of an existing state.
    pub fn with_state(options: NodeOptions, mut state: StateManager) -> Result<Self, ChainError> {
        let mut restored = false;
        if let Some(path) = &options.persist_path {
            state = state.with_persister(Arc::new(FileStatePersister::new(path)));
            restored = state.restore()?;
        }
        if !restored {
            if let Some(genesis_state) = &options.genesis_state {
                state.load_state(genesis_state);
            }
        }

        let genesis = Self::genesis_block(&options, &state);
        debug!(number = genesis.header.number, state_root = %genesis.header.state_root, "Created genesis block");
        let mut pool = TxPool::new(options.pool.clone(), options.chain);
        pool.set_block_gas_limit(genesis.header.gas_limit);

        let pending = Arc::new(Mutex::new(PendingBlockCache::default()));
        let cache = Arc::downgrade(&pending);
        let subscription = pool.subscribe(move |_: &TxPoolEvent| {
            if let Some(cache) = cache.upgrade() {
                cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .invalidate();
            }
        });

        Ok(Self {
            vm: tokio::sync::Mutex::new(Vm::new(options.chain, state)),
            pool: Mutex::new(pool),
            store: RwLock::new(ChainStore::new(genesis)),
            pending,
            options,
            _pool_events: subscription,
        })
    }

    fn genesis_block(options: &NodeOptions, state: &StateManager) -> Block {
        let chain = options.chain;
        let number = match state.fork_block() {
            Some(BlockTag::Number(number)) => number,
            _ => 0,
        };
        let header = BlockHeader {
            number,
            coinbase: options.coinbase,
            gas_limit: options.block_gas_limit,
            state_root: state.state_root(),
            base_fee_per_gas: chain.is_london_activated().then_some(INITIAL_BASE_FEE),
            withdrawals_root: chain.is_shanghai_activated().then_some(*EMPTY_TRIE_HASH),
            blob_gas_used: chain.is_cancun_activated().then_some(0),
            excess_blob_gas: chain.is_cancun_activated().then_some(0),
            parent_beacon_block_root: chain.is_cancun_activated().then_some(H256::zero()),
            ..BlockHeader::empty()
        };
        Block::new(
            header,
            BlockBody {
                withdrawals: chain.is_shanghai_activated().then(Vec::new),
                ..Default::default()
            },
        )
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    fn pool(&self) -> Result<MutexGuard<'_, TxPool>, ChainError> {
        self.pool
            .lock()
            .map_err(|err| MempoolError::Lock(err.to_string()).into())
    }

    fn store(&self) -> Result<RwLockReadGuard<'_, ChainStore>, ChainError> {
        self.store
            .read()
            .map_err(|err| ChainError::Custom(format!("Chain store lock poisoned: {err}")))
    }

    fn store_mut(&self) -> Result<RwLockWriteGuard<'_, ChainStore>, ChainError> {
        self.store
            .write()
            .map_err(|err| ChainError::Custom(format!("Chain store lock poisoned: {err}")))
    }

    fn invalidate_pending_block(&self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .invalidate();
    }

    /// Runs `f` with exclusive access to the transaction pool.
    pub fn with_pool<R>(&self, f: impl FnOnce(&mut TxPool) -> R) -> Result<R, ChainError> {
        Ok(f(&mut *self.pool()?))
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&TxPoolEvent) + Send + Sync + 'static,
    ) -> Result<Subscription, ChainError> {
        Ok(self.pool()?.subscribe(listener))
    }

    /// Validates `tx` against the current state and adds it to the pool.
    pub async fn add_transaction(&self, tx: Transaction) -> Result<H256, ChainError> {
        self.add_transaction_with(tx, AdmissionOpts::default()).await
    }

    /// [`Self::add_transaction`] that can impersonate the sender or skip the
    /// balance check. Mining executes the transaction the same way.
    pub async fn add_transaction_with(
        &self,
        tx: Transaction,
        opts: AdmissionOpts,
    ) -> Result<H256, ChainError> {
        let sender = opts.sender_of(&tx)?;
        let account = self
            .vm
            .lock()
            .await
            .state
            .get_account_or_default(sender)
            .await?;
        let hash = self.pool()?.add_with(tx, &account, opts)?;
        if self.options.mining == MiningConfig::Auto {
            self.mine(1).await?;
        }
        Ok(hash)
    }

    /// Mines `blocks` blocks out of the pool.
    pub async fn mine(&self, blocks: usize) -> Result<Vec<Block>, ChainError> {
        let mut mined = Vec::with_capacity(blocks);
        for _ in 0..blocks {
            let mut vm = self.vm.lock().await;
            // The block's state changes stay open until the block is stored
            vm.state.checkpoint();
            let block = match self.mine_on_head(&mut vm).await {
                Ok(block) => {
                    vm.state.commit()?;
                    block
                }
                Err(err) => {
                    vm.state.revert()?;
                    warn!(%err, "Discarded mined block");
                    return Err(err);
                }
            };

            self.pool()?.on_block_added(&block);
            self.invalidate_pending_block();
            info!(
                block_number = block.header.number,
                txs = block.body.transactions.len(),
                gas_used = block.header.gas_used,
                "Mined block"
            );
            mined.push(block);
        }
        Ok(mined)
    }

    async fn mine_on_head(&self, vm: &mut Vm) -> Result<Block, ChainError> {
        let parent = self.head()?;
        let queue = self.pool()?.transaction_queue(next_base_fee(vm, &parent));
        let (block, results) = fill_block(vm, parent, queue, self.options.coinbase).await?;
        self.store_mut()?.push(block.clone(), &results)?;
        Ok(block)
    }

    /// Executes and validates a block built elsewhere, then makes it the new
    /// head.
    pub async fn add_block(&self, block: Block) -> Result<(), ChainError> {
        let mut vm = self.vm.lock().await;
        let head = self.head()?;
        if block.header.parent_hash != head.hash() {
            return Err(ChainError::ParentNotFound);
        }
        if block.header.number != head.number + 1 {
            return Err(ChainError::NonSequentialBlock(block.header.number));
        }
        vm.state.checkpoint();
        let stored = async {
            let result = run_block(
                &mut vm,
                RunBlockOpts {
                    block,
                    ..Default::default()
                },
            )
            .await?;
            self.store_mut()?.push(result.block.clone(), &result.results)?;
            Ok::<_, ChainError>(result)
        }
        .await;
        let result = match stored {
            Ok(result) => {
                vm.state.commit()?;
                result
            }
            Err(err) => {
                vm.state.revert()?;
                return Err(err);
            }
        };
        self.pool()?.on_block_added(&result.block);
        self.invalidate_pending_block();
        debug!(block_number = result.block.header.number, "Added block");
        Ok(())
    }

    /// Block that mining right now would produce. It is built on a copy of
    /// the state and cached until the pool or the head changes.
    pub async fn pending_block(&self) -> Result<Block, ChainError> {
        let generation = {
            let cache = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(block) = &cache.block {
                return Ok(block.clone());
            }
            cache.generation
        };

        let (mut vm, parent) = {
            let vm = self.vm.lock().await;
            (vm.deep_copy(), self.head()?)
        };
        let queue = self.pool()?.transaction_queue(next_base_fee(&vm, &parent));
        let (block, _) = fill_block(&mut vm, parent, queue, self.options.coinbase).await?;

        let mut cache = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.generation == generation {
            cache.block = Some(block.clone());
        }
        Ok(block)
    }

    /// Spawns the interval miner when the node is configured for one.
    pub fn spawn_miner(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        match self.options.mining {
            MiningConfig::Interval { period_ms } => Some(
                self.clone()
                    .spawn_interval_miner(Duration::from_millis(period_ms), cancel),
            ),
            MiningConfig::Manual | MiningConfig::Auto => None,
        }
    }

    /// Mines a block every `period` until `cancel` fires.
    pub fn spawn_interval_miner(
        self: Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Interval miner stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(err) = self.mine(1).await {
                            warn!(%err, "Interval mining failed");
                        }
                    }
                }
            }
        })
    }

    pub fn head(&self) -> Result<BlockHeader, ChainError> {
        Ok(self.store()?.head().header.clone())
    }

    pub fn get_block_by_number(&self, number: u64) -> Result<Option<Block>, ChainError> {
        Ok(self.store()?.get_block_by_number(number).cloned())
    }

    pub fn get_block_by_hash(&self, hash: &H256) -> Result<Option<Block>, ChainError> {
        Ok(self.store()?.get_block_by_hash(hash).cloned())
    }

    pub fn get_receipt(&self, tx_hash: &H256) -> Result<Option<StoredReceipt>, ChainError> {
        Ok(self.store()?.get_receipt(tx_hash).cloned())
    }

    pub async fn get_account(&self, address: Address) -> Result<AccountState, ChainError> {
        Ok(self
            .vm
            .lock()
            .await
            .state
            .get_account_or_default(address)
            .await?)
    }

    pub async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        Ok(self.get_account(address).await?.balance)
    }

    pub async fn dump_state(&self) -> SerializableState {
        self.vm.lock().await.state.dump_state()
    }

    /// Overwrites the accounts in `state`.
    pub async fn load_state(&self, state: &SerializableState) {
        self.vm.lock().await.state.load_state(state);
        self.invalidate_pending_block();
    }
}

fn next_base_fee(vm: &Vm, parent: &BlockHeader) -> Option<u64> {
    vm.config
        .is_london_activated()
        .then(|| calculate_base_fee_per_gas(parent))
}

/// Builds a block on `parent` out of `queue`. A transaction that cannot be
/// included drops the rest of its sender's transactions from this block.
async fn fill_block(
    vm: &mut Vm,
    parent: BlockHeader,
    mut queue: TransactionQueue,
    coinbase: Address,
) -> Result<(Block, Vec<RunTxResult>), ChainError> {
    let mut builder = build_block(
        vm,
        BuildBlockOpts {
            parent,
            header_data: HeaderData {
                coinbase: Some(coinbase),
                ..Default::default()
            },
            withdrawals: None,
        },
    );
    while let Some(head) = queue.peek() {
        let tx_hash = head.tx.hash();
        let opts = AddTxOpts {
            sender: Some(head.tx.sender()),
            skip_balance: head.tx.skips_balance(),
            ..Default::default()
        };
        match builder
            .add_transaction(head.tx.transaction().clone(), opts)
            .await
        {
            Ok(_) => queue.shift(),
            Err(err @ (VmError::Validation(_) | VmError::Builder(_))) => {
                warn!(%tx_hash, %err, "Dropping transaction from block");
                queue.pop();
            }
            Err(err) => return Err(err.into()),
        }
    }
    let block = builder.build(None).await?;
    Ok((block, builder.results().to_vec()))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        OnceLock, Weak,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use secp256k1::SecretKey;
    use tevm_common::{
        constants::{EMPTY_KECCACK_HASH, GWEI_TO_WEI, ether},
        types::{ChainConfig, Fork, LegacyTransaction, ReceiptOutcome, TxKind},
    };
    use tevm_storage::AccountSnapshot;
    use tevm_vm::{ExecResult, ExecutionContext, Interpreter, TransferInterpreter};

    use super::*;
    use crate::mempool::TxsByPriceOpts;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn key() -> SecretKey {
        SecretKey::from_slice(&[0x33; 32]).unwrap()
    }

    fn transfer(nonce: u64, gas_price: u64) -> Transaction {
        let mut tx = Transaction::LegacyTransaction(LegacyTransaction {
            nonce,
            gas_price,
            gas: 21000,
            to: TxKind::Call(Address::repeat_byte(0xbb)),
            value: ether(1),
            ..Default::default()
        });
        tx.sign(&key(), Some(1));
        tx
    }

    fn sender() -> Address {
        transfer(0, GWEI_TO_WEI).sender().unwrap()
    }

    fn genesis(balance: U256) -> SerializableState {
        let account = AccountSnapshot {
            nonce: 0,
            balance,
            storage_root: *EMPTY_TRIE_HASH,
            code_hash: *EMPTY_KECCACK_HASH,
            storage: Default::default(),
            deployed_bytecode: None,
        };
        SerializableState::from([(sender(), account)])
    }

    fn options(mining: MiningConfig) -> NodeOptions {
        NodeOptions {
            chain: ChainConfig::new(1, Fork::Cancun),
            mining,
            coinbase: Address::repeat_byte(0xcc),
            genesis_state: Some(genesis(ether(10))),
            ..Default::default()
        }
    }

    fn node(mining: MiningConfig) -> Node {
        Node::with_state(options(mining), StateManager::new()).unwrap()
    }

    #[tokio::test]
    async fn mines_a_pooled_transfer() {
        init_tracing();
        let node = node(MiningConfig::Manual);
        let tx = transfer(0, GWEI_TO_WEI);
        let hash = node.add_transaction(tx).await.unwrap();

        let ordered = node
            .with_pool(|pool| pool.txs_by_price_and_nonce(TxsByPriceOpts::default()))
            .unwrap();
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].hash(), hash);

        let blocks = node.mine(1).await.unwrap();
        let block = &blocks[0];
        assert_eq!(block.header.number, 1);
        assert_eq!(block.body.transactions.len(), 1);
        assert_eq!(node.head().unwrap().hash(), block.hash());

        let receipt = node.get_receipt(&hash).unwrap().unwrap();
        assert_eq!(receipt.receipt.outcome, ReceiptOutcome::Status(true));
        assert_eq!(receipt.block_number, 1);
        assert_eq!(
            node.get_balance(sender()).await.unwrap(),
            ether(10) - ether(1) - U256::from(21000 * GWEI_TO_WEI)
        );
        assert_eq!(
            node.get_balance(Address::repeat_byte(0xbb)).await.unwrap(),
            ether(1)
        );
        assert!(node.with_pool(|pool| pool.is_empty()).unwrap());
    }

    #[tokio::test]
    async fn rejects_underpriced_replacement() {
        let node = node(MiningConfig::Manual);
        node.add_transaction(transfer(0, GWEI_TO_WEI)).await.unwrap();
        let err = node
            .add_transaction(transfer(0, 1_050_000_000))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChainError::Mempool(MempoolError::UnderpricedReplacement)
        ));
        assert_eq!(err.kind(), "replacement_underpriced");
        node.add_transaction(transfer(0, 1_100_000_000)).await.unwrap();
        assert_eq!(node.with_pool(|pool| pool.len()).unwrap(), 1);
    }

    #[tokio::test]
    async fn auto_mining_mines_each_transaction() {
        let node = node(MiningConfig::Auto);
        node.add_transaction(transfer(0, GWEI_TO_WEI)).await.unwrap();
        node.add_transaction(transfer(1, GWEI_TO_WEI)).await.unwrap();
        assert_eq!(node.head().unwrap().number, 2);
        assert_eq!(node.get_account(sender()).await.unwrap().nonce, 2);
    }

    #[tokio::test]
    async fn pending_block_leaves_canonical_state_alone() {
        let node = node(MiningConfig::Manual);
        node.add_transaction(transfer(0, GWEI_TO_WEI)).await.unwrap();

        let pending = node.pending_block().await.unwrap();
        assert_eq!(pending.body.transactions.len(), 1);
        assert_eq!(node.get_balance(sender()).await.unwrap(), ether(10));
        assert_eq!(node.head().unwrap().number, 0);
        assert_eq!(node.pending_block().await.unwrap(), pending);

        node.add_transaction(transfer(1, GWEI_TO_WEI)).await.unwrap();
        assert_eq!(
            node.pending_block().await.unwrap().body.transactions.len(),
            2
        );
    }

    #[tokio::test]
    async fn invalid_transactions_are_left_out() {
        let node = node(MiningConfig::Manual);
        node.add_transaction(transfer(0, GWEI_TO_WEI)).await.unwrap();
        node.add_transaction(transfer(1, GWEI_TO_WEI)).await.unwrap();
        // The sender can no longer pay for anything
        node.load_state(&genesis(U256::from(1))).await;

        let blocks = node.mine(1).await.unwrap();
        assert!(blocks[0].body.transactions.is_empty());
        assert_eq!(node.with_pool(|pool| pool.len()).unwrap(), 2);
    }

    #[tokio::test]
    async fn replays_blocks_of_another_node() {
        let producer = node(MiningConfig::Manual);
        producer.add_transaction(transfer(0, GWEI_TO_WEI)).await.unwrap();
        let block = producer.mine(1).await.unwrap().remove(0);

        let follower = Node::with_state(
            NodeOptions {
                genesis_state: Some(genesis(ether(10))),
                ..producer.options().clone()
            },
            StateManager::new(),
        )
        .unwrap();
        assert_eq!(
            follower.head().unwrap().hash(),
            producer.get_block_by_number(0).unwrap().unwrap().hash()
        );
        follower.add_block(block.clone()).await.unwrap();
        assert_eq!(follower.head().unwrap().hash(), block.hash());
        assert_eq!(
            follower.get_balance(sender()).await.unwrap(),
            producer.get_balance(sender()).await.unwrap()
        );
        assert!(matches!(
            follower.add_block(block).await,
            Err(ChainError::ParentNotFound)
        ));
    }

    #[tokio::test]
    async fn pool_events_reach_subscribers() {
        let node = node(MiningConfig::Manual);
        let events = Arc::new(AtomicUsize::new(0));
        let _subscription = {
            let events = events.clone();
            node.subscribe(move |_| {
                events.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
        };
        node.add_transaction(transfer(0, GWEI_TO_WEI)).await.unwrap();
        node.mine(1).await.unwrap();
        // One add, one removal on inclusion
        assert_eq!(events.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn interval_miner_stops_on_cancel() {
        let node = Arc::new(node(MiningConfig::Interval { period_ms: 10 }));
        let cancel = CancellationToken::new();
        let handle = node.spawn_miner(cancel.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();
        let height = node.head().unwrap().number;
        assert!(height >= 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(node.head().unwrap().number, height);
    }

    #[tokio::test]
    async fn mines_an_impersonated_transfer() {
        let node = node(MiningConfig::Manual);
        let impersonated = Address::repeat_byte(0x42);
        let unsigned = Transaction::LegacyTransaction(LegacyTransaction {
            gas_price: GWEI_TO_WEI,
            gas: 21000,
            to: TxKind::Call(Address::repeat_byte(0xbb)),
            value: ether(1),
            ..Default::default()
        });
        assert!(node.add_transaction(unsigned.clone()).await.is_err());

        let opts = AdmissionOpts {
            skip_balance: true,
            ..AdmissionOpts::impersonating(impersonated)
        };
        let hash = node.add_transaction_with(unsigned, opts).await.unwrap();
        let blocks = node.mine(1).await.unwrap();
        assert_eq!(blocks[0].body.transactions.len(), 1);

        let receipt = node.get_receipt(&hash).unwrap().unwrap();
        assert_eq!(receipt.sender, impersonated);
        assert_eq!(receipt.receipt.status(), Some(true));
        assert_eq!(node.get_account(impersonated).await.unwrap().nonce, 1);
        assert_eq!(
            node.get_balance(Address::repeat_byte(0xbb)).await.unwrap(),
            ether(1)
        );
        assert_eq!(node.with_pool(|pool| pool.len()).unwrap(), 0);
    }

    /// Runs transfers, but first crashes a writer of the node's chain store.
    #[derive(Debug, Default)]
    struct PoisonsChainStore(OnceLock<Weak<Node>>);

    #[async_trait]
    impl Interpreter for PoisonsChainStore {
        async fn execute(
            &self,
            context: ExecutionContext,
            state: &mut StateManager,
        ) -> Result<ExecResult, VmError> {
            if let Some(node) = self.0.get().and_then(Weak::upgrade) {
                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let _guard = node.store.write();
                    panic!("chain store writer crashed");
                }));
            }
            TransferInterpreter.execute(context, state).await
        }
    }

    #[tokio::test]
    async fn unstored_block_leaves_state_untouched() {
        let node = Arc::new(node(MiningConfig::Manual));
        let interpreter = Arc::new(PoisonsChainStore::default());
        interpreter.0.set(Arc::downgrade(&node)).unwrap();
        {
            let mut vm = node.vm.lock().await;
            let config = vm.config;
            let current = std::mem::replace(&mut *vm, Vm::new(config, StateManager::new()));
            *vm = current.with_interpreter(interpreter);
        }
        node.add_transaction(transfer(0, GWEI_TO_WEI)).await.unwrap();
        let root = node.vm.lock().await.state.state_root();

        let err = node.mine(1).await.unwrap_err();
        assert_eq!(err.kind(), "custom_error");

        let vm = node.vm.lock().await;
        assert_eq!(vm.state.state_root(), root);
        assert_eq!(vm.state.checkpoint_depth(), 0);
        drop(vm);
        assert_eq!(node.get_balance(sender()).await.unwrap(), ether(10));
        assert_eq!(node.with_pool(|pool| pool.len()).unwrap(), 1);
    }
}
