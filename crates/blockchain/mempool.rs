use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError, Weak},
    time::{Duration, Instant},
};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tevm_common::{
    Address, H256, U256,
    types::{AccountState, Block, ChainConfig, Transaction},
};
use tevm_vm::DEFAULT_BLOCK_GAS_LIMIT;
use tracing::{debug, trace};

use crate::{error::MempoolError, payload::TransactionQueue};

/// Admission limits of the transaction pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TxPoolConfig {
    /// Minimum increase, in percent, of every fee field of a replacement
    pub min_gas_price_bump_percent: u64,
    /// Minimum tip (gas price for legacy transactions) in wei
    pub min_gas_price: u64,
    pub max_pool_size: usize,
    pub max_txs_per_account: usize,
    pub max_tx_data_size: usize,
    /// Pooled transactions older than this are evicted by `cleanup`
    pub tx_lifetime_secs: u64,
    /// How long the status of a handled transaction is remembered
    pub handled_lifetime_secs: u64,
}

impl Default for TxPoolConfig {
    fn default() -> Self {
        Self {
            min_gas_price_bump_percent: 10,
            min_gas_price: 100_000_000,
            max_pool_size: 5000,
            max_txs_per_account: 100,
            max_tx_data_size: 128 * 1024,
            tx_lifetime_secs: 20 * 60,
            handled_lifetime_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MempoolTransaction {
    transaction: Transaction,
    sender: Address,
    hash: H256,
    // Insertion order, breaks ties between equally priced transactions
    seq: u64,
    added: Instant,
    skip_balance: bool,
}

impl MempoolTransaction {
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn hash(&self) -> H256 {
        self.hash
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Admitted without a balance check, so it is also executed without one.
    pub fn skips_balance(&self) -> bool {
        self.skip_balance
    }

    /// Most the transaction can take from its sender: value, gas at the fee
    /// cap and blob gas at the blob fee cap. Saturates at `U256::MAX`.
    fn reserved_balance(&self) -> U256 {
        if self.skip_balance {
            return U256::zero();
        }
        self.transaction.max_cost().unwrap_or(U256::MAX)
    }
}

impl std::ops::Deref for MempoolTransaction {
    type Target = Transaction;

    fn deref(&self) -> &Self::Target {
        &self.transaction
    }
}

impl From<MempoolTransaction> for Transaction {
    fn from(val: MempoolTransaction) -> Self {
        val.transaction
    }
}

/// Pooled transactions of one sender keyed by nonce.
#[derive(Debug, Clone, Default)]
struct SenderQueue {
    /// Latest known account nonce
    nonce: u64,
    txs: BTreeMap<u64, MempoolTransaction>,
}

impl SenderQueue {
    /// Transactions whose nonces run without gaps from the account nonce.
    fn pending(&self) -> impl Iterator<Item = &MempoolTransaction> {
        self.txs
            .range(self.nonce..)
            .zip(self.nonce..)
            .take_while(|((nonce, _), expected)| *nonce == expected)
            .map(|((_, tx), _)| tx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Mined,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPoolEvent {
    TxAdded(H256),
    TxRemoved(H256),
}

type Listener = Arc<dyn Fn(&TxPoolEvent) + Send + Sync>;

#[derive(Default)]
struct ObserverList {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

/// Keeps a pool listener registered. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    observers: Weak<Mutex<ObserverList>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            observers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .listeners
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[derive(Default)]
struct Observers(Arc<Mutex<ObserverList>>);

impl Observers {
    fn subscribe(&self, listener: Listener) -> Subscription {
        let mut list = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let id = list.next_id;
        list.next_id += 1;
        list.listeners.push((id, listener));
        Subscription {
            id,
            observers: Arc::downgrade(&self.0),
        }
    }

    /// Calls every listener before returning. The list is copied first so a
    /// listener may subscribe or unsubscribe.
    fn emit(&self, event: TxPoolEvent) {
        let listeners: Vec<Listener> = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    fn len(&self) -> usize {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .len()
    }
}

/// How [`TxPool::add_with`] admits a transaction.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionOpts {
    /// Reject transactions whose signature does not recover a sender
    pub require_signature: bool,
    pub skip_balance: bool,
    /// Sender an unsigned transaction is pooled and executed as. Ignored
    /// while `require_signature` is set.
    pub impersonated_sender: Option<Address>,
}

impl Default for AdmissionOpts {
    fn default() -> Self {
        Self {
            require_signature: true,
            skip_balance: false,
            impersonated_sender: None,
        }
    }
}

impl AdmissionOpts {
    /// Admits `tx` as sent by `sender` whatever its signature says.
    pub fn impersonating(sender: Address) -> Self {
        Self {
            require_signature: false,
            skip_balance: false,
            impersonated_sender: Some(sender),
        }
    }

    /// Address the transaction is pooled under.
    pub fn sender_of(&self, tx: &Transaction) -> Result<Address, MempoolError> {
        match self.impersonated_sender {
            Some(sender) if !self.require_signature => Ok(sender),
            _ => Ok(tx.sender()?),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TxsByPriceOpts {
    pub base_fee: Option<u64>,
    /// Maximum number of blobs the returned transactions may carry
    pub allowed_blobs: Option<usize>,
}

/// Pending and queued transactions keyed by sender and nonce.
///
/// A sender's transactions are pending while their nonces run contiguously
/// from the account nonce and queued after the first gap. The split is
/// derived on every read, so filling a gap promotes the queued transactions
/// behind it.
pub struct TxPool {
    config: TxPoolConfig,
    chain: ChainConfig,
    block_gas_limit: u64,
    senders: FxHashMap<Address, SenderQueue>,
    by_hash: FxHashMap<H256, (Address, u64)>,
    handled: FxHashMap<H256, Instant>,
    next_seq: u64,
    observers: Observers,
}

impl std::fmt::Debug for TxPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxPool")
            .field("len", &self.len())
            .field("senders", &self.senders.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl TxPool {
    pub fn new(config: TxPoolConfig, chain: ChainConfig) -> Self {
        Self {
            config,
            chain,
            block_gas_limit: DEFAULT_BLOCK_GAS_LIMIT,
            senders: FxHashMap::default(),
            by_hash: FxHashMap::default(),
            handled: FxHashMap::default(),
            next_seq: 0,
            observers: Observers::default(),
        }
    }

    pub fn config(&self) -> &TxPoolConfig {
        &self.config
    }

    pub fn block_gas_limit(&self) -> u64 {
        self.block_gas_limit
    }

    pub fn set_block_gas_limit(&mut self, gas_limit: u64) {
        self.block_gas_limit = gas_limit;
    }

    /// Registers `listener` for every pool event. Events are delivered after
    /// the mutation and before the mutating call returns.
    pub fn subscribe(
        &self,
        listener: impl Fn(&TxPoolEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.observers.subscribe(Arc::new(listener))
    }

    /// Validates `tx` against the pool rules and the sender's `account`, then
    /// adds it. A transaction with the nonce of a pooled one replaces it when
    /// every fee field is bumped enough.
    pub fn add(&mut self, tx: Transaction, account: &AccountState) -> Result<H256, MempoolError> {
        self.add_with(tx, account, AdmissionOpts::default())
    }

    /// [`Self::add`] with control over signature and balance checks. `account`
    /// must be the state of the sender given by [`AdmissionOpts::sender_of`].
    pub fn add_with(
        &mut self,
        tx: Transaction,
        account: &AccountState,
        opts: AdmissionOpts,
    ) -> Result<H256, MempoolError> {
        let sender = opts.sender_of(&tx)?;
        let hash = tx.hash();
        self.validate(&tx, hash, sender, account, opts.skip_balance)?;

        let stale = self.set_account_nonce(sender, account.nonce);
        for removed in stale {
            self.observers.emit(TxPoolEvent::TxRemoved(removed));
        }
        if let Some(replaced) = self.insert(tx, sender, hash, opts.skip_balance) {
            debug!(tx_hash = %replaced, replacement = %hash, "Replaced pooled transaction");
            self.observers.emit(TxPoolEvent::TxRemoved(replaced));
        }
        debug!(tx_hash = %hash, %sender, "Added transaction to the pool");
        self.observers.emit(TxPoolEvent::TxAdded(hash));
        Ok(hash)
    }

    /// Adds `tx` without validating it, used to re-admit transactions of
    /// blocks dropped by a reorganization.
    pub fn add_unverified(&mut self, tx: Transaction, sender: Address) -> H256 {
        let hash = tx.hash();
        if self.by_hash.contains_key(&hash) {
            return hash;
        }
        let queue = self.senders.entry(sender).or_default();
        queue.nonce = queue.nonce.min(tx.nonce());
        if let Some(replaced) = self.insert(tx, sender, hash, false) {
            self.observers.emit(TxPoolEvent::TxRemoved(replaced));
        }
        self.observers.emit(TxPoolEvent::TxAdded(hash));
        hash
    }

    fn validate(
        &self,
        tx: &Transaction,
        hash: H256,
        sender: Address,
        account: &AccountState,
        skip_balance: bool,
    ) -> Result<(), MempoolError> {
        if let Some(chain_id) = tx.chain_id() {
            if chain_id != self.chain.chain_id {
                return Err(MempoolError::InvalidChainId(self.chain.chain_id));
            }
        }
        if self.by_hash.contains_key(&hash) {
            return Err(MempoolError::AlreadyKnown(hash));
        }
        if tx.data().len() > self.config.max_tx_data_size {
            return Err(MempoolError::TxMaxDataSizeError(tx.data().len()));
        }
        if tx.gas_limit() > self.block_gas_limit {
            return Err(MempoolError::TxGasLimitExceededError {
                gas_limit: tx.gas_limit(),
                block_gas_limit: self.block_gas_limit,
            });
        }
        if tx
            .intrinsic_gas(&self.chain)
            .is_none_or(|intrinsic| intrinsic > tx.gas_limit())
        {
            return Err(MempoolError::TxIntrinsicGasCostAboveLimitError);
        }
        if tx.max_priority_fee().unwrap_or_default() > tx.gas_price() {
            return Err(MempoolError::TxTipAboveFeeCapError);
        }
        let price = tx.max_priority_fee().unwrap_or_else(|| tx.gas_price());
        if price < self.config.min_gas_price {
            return Err(MempoolError::Underpriced {
                price,
                min: self.config.min_gas_price,
            });
        }
        if tx.nonce() < account.nonce {
            return Err(MempoolError::NonceTooLow {
                expected: account.nonce,
                got: tx.nonce(),
            });
        }

        let queue = self.senders.get(&sender);
        match queue.and_then(|queue| queue.txs.get(&tx.nonce())) {
            Some(existing) => self.validate_replacement(existing, tx)?,
            None => {
                if self.len() >= self.config.max_pool_size {
                    return Err(MempoolError::PoolFull);
                }
                if queue.is_some_and(|queue| queue.txs.len() >= self.config.max_txs_per_account) {
                    return Err(MempoolError::TooManyTransactions(sender));
                }
            }
        }

        if skip_balance {
            return Ok(());
        }
        // Every other pooled transaction of the sender keeps its reservation
        let reserved = queue
            .into_iter()
            .flat_map(|queue| queue.txs.range(account.nonce..))
            .filter(|(nonce, _)| **nonce != tx.nonce())
            .fold(U256::zero(), |total, (_, pooled)| {
                total.saturating_add(pooled.reserved_balance())
            });
        let required = tx
            .max_cost()
            .and_then(|cost| reserved.checked_add(cost));
        if required.is_none_or(|required| account.balance < required) {
            return Err(MempoolError::NotEnoughBalance {
                balance: account.balance,
                required: required.unwrap_or(U256::MAX),
            });
        }
        Ok(())
    }

    fn validate_replacement(
        &self,
        existing: &MempoolTransaction,
        tx: &Transaction,
    ) -> Result<(), MempoolError> {
        let bump = self.config.min_gas_price_bump_percent;
        let bumped = |old: u64| {
            let old = u128::from(old);
            old + old * u128::from(bump) / 100
        };
        let (old_tip, old_fee) = fee_caps(existing);
        let (new_tip, new_fee) = fee_caps(tx);
        if u128::from(new_tip) < bumped(old_tip) || u128::from(new_fee) < bumped(old_fee) {
            return Err(MempoolError::UnderpricedReplacement);
        }
        if let (Some(old_blob_fee), Some(new_blob_fee)) =
            (existing.max_fee_per_blob_gas(), tx.max_fee_per_blob_gas())
        {
            let min =
                old_blob_fee.saturating_add(old_blob_fee.saturating_mul(U256::from(bump)) / 100);
            if new_blob_fee < min {
                return Err(MempoolError::UnderpricedReplacement);
            }
        }
        Ok(())
    }

    /// Records the account nonce of `sender` and drops pooled transactions it
    /// has made stale. Returns their hashes.
    fn set_account_nonce(&mut self, sender: Address, nonce: u64) -> Vec<H256> {
        let queue = self.senders.entry(sender).or_default();
        queue.nonce = nonce;
        let kept = queue.txs.split_off(&nonce);
        let stale = std::mem::replace(&mut queue.txs, kept);
        let removed: Vec<H256> = stale.values().map(|tx| tx.hash).collect();
        for hash in &removed {
            self.by_hash.remove(hash);
        }
        removed
    }

    /// Returns the hash of the transaction replaced at the same nonce.
    fn insert(
        &mut self,
        tx: Transaction,
        sender: Address,
        hash: H256,
        skip_balance: bool,
    ) -> Option<H256> {
        let nonce = tx.nonce();
        let seq = self.next_seq;
        self.next_seq += 1;
        let pooled = MempoolTransaction {
            transaction: tx,
            sender,
            hash,
            seq,
            added: Instant::now(),
            skip_balance,
        };
        let replaced = self
            .senders
            .entry(sender)
            .or_default()
            .txs
            .insert(nonce, pooled)
            .map(|old| old.hash);
        if let Some(old) = replaced {
            self.by_hash.remove(&old);
            self.handled.remove(&old);
        }
        self.by_hash.insert(hash, (sender, nonce));
        self.handled.insert(hash, Instant::now());
        replaced
    }

    fn take(&mut self, hash: &H256) -> Option<MempoolTransaction> {
        let (sender, nonce) = self.by_hash.remove(hash)?;
        let queue = self.senders.get_mut(&sender)?;
        let tx = queue.txs.remove(&nonce);
        if queue.txs.is_empty() {
            self.senders.remove(&sender);
        }
        tx
    }

    /// Removes a transaction. Queued transactions behind it are not promoted.
    pub fn remove(&mut self, hash: &H256) -> Option<MempoolTransaction> {
        let tx = self.take(hash)?;
        self.handled.remove(hash);
        trace!(tx_hash = %hash, "Removed transaction from the pool");
        self.observers.emit(TxPoolEvent::TxRemoved(*hash));
        Some(tx)
    }

    pub fn get_by_hash(&self, hash: &H256) -> Option<&MempoolTransaction> {
        let (sender, nonce) = self.by_hash.get(hash)?;
        self.senders.get(sender)?.txs.get(nonce)
    }

    /// Pooled transactions of `sender` in nonce order.
    pub fn get_by_sender(&self, sender: &Address) -> Vec<&MempoolTransaction> {
        self.senders
            .get(sender)
            .map(|queue| queue.txs.values().collect())
            .unwrap_or_default()
    }

    pub fn transaction_status(&self, hash: &H256) -> TxStatus {
        if self.by_hash.contains_key(hash) {
            TxStatus::Pending
        } else if self.handled.contains_key(hash) {
            TxStatus::Mined
        } else {
            TxStatus::Unknown
        }
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.senders.values().map(|queue| queue.pending().count()).sum()
    }

    pub fn queued_len(&self) -> usize {
        self.len() - self.pending_len()
    }

    /// Executable transactions grouped by sender in nonce order. With a base
    /// fee, a sender's transactions stop at the first one that cannot pay it.
    fn executable(&self, base_fee: Option<u64>) -> Vec<(Address, Vec<MempoolTransaction>)> {
        let mut by_sender: Vec<_> = self
            .senders
            .iter()
            .map(|(sender, queue)| {
                let txs: Vec<_> = queue
                    .pending()
                    .take_while(|tx| base_fee.is_none_or(|base_fee| tx.gas_price() >= base_fee))
                    .cloned()
                    .collect();
                (*sender, txs)
            })
            .filter(|(_, txs)| !txs.is_empty())
            .collect();
        by_sender.sort_by_key(|(sender, _)| *sender);
        by_sender
    }

    /// Block building queue over the executable transactions.
    pub fn transaction_queue(&self, base_fee: Option<u64>) -> TransactionQueue {
        TransactionQueue::new(self.executable(base_fee), base_fee)
    }

    /// Pending transactions of every sender as a single sequence: highest
    /// tip first, nonce order within a sender, insertion order among equal
    /// tips.
    pub fn txs_by_price_and_nonce(&self, opts: TxsByPriceOpts) -> Vec<MempoolTransaction> {
        let mut queue = self.transaction_queue(opts.base_fee);
        let mut txs = Vec::new();
        let mut blobs = 0;
        while let Some(head) = queue.peek() {
            let tx_blobs = head.blob_versioned_hashes().len();
            if tx_blobs > 0 && opts.allowed_blobs.is_some_and(|max| blobs + tx_blobs > max) {
                // No later transaction of the sender can be included either
                queue.pop();
                continue;
            }
            blobs += tx_blobs;
            txs.push(head.tx);
            queue.shift();
        }
        txs
    }

    /// Drops the transactions included in `block` and advances the nonces of
    /// their senders.
    pub fn on_block_added(&mut self, block: &Block) {
        self.block_gas_limit = block.header.gas_limit;
        let mut removed = Vec::new();
        let mut senders: FxHashMap<Address, u64> = FxHashMap::default();
        for tx in &block.body.transactions {
            let hash = tx.hash();
            let sender = match self.take(&hash) {
                Some(pooled) => {
                    removed.push(hash);
                    Some(pooled.sender)
                }
                None => tx.sender().ok(),
            };
            self.handled.insert(hash, Instant::now());
            if let Some(sender) = sender {
                let next = senders.entry(sender).or_default();
                *next = (*next).max(tx.nonce() + 1);
            }
        }
        for (sender, nonce) in senders {
            if !self.senders.contains_key(&sender) {
                continue;
            }
            let current = self.senders.get(&sender).map(|queue| queue.nonce).unwrap_or_default();
            removed.extend(self.set_account_nonce(sender, current.max(nonce)));
        }
        self.senders.retain(|_, queue| !queue.txs.is_empty());
        debug!(
            block_number = block.header.number,
            removed = removed.len(),
            "Updated pool after new block"
        );
        for hash in removed {
            self.observers.emit(TxPoolEvent::TxRemoved(hash));
        }
    }

    /// Re-admits the transactions of `removed` blocks that are not included
    /// again in `added`, then applies the `added` blocks.
    pub fn on_chain_reorganization(&mut self, removed: &[Block], added: &[Block]) {
        let included: FxHashSet<H256> = added
            .iter()
            .flat_map(|block| block.body.transactions.iter().map(Transaction::hash))
            .collect();
        for tx in removed.iter().flat_map(|block| &block.body.transactions) {
            if included.contains(&tx.hash()) {
                continue;
            }
            match tx.sender() {
                Ok(sender) => {
                    self.add_unverified(tx.clone(), sender);
                }
                Err(err) => trace!(%err, "Skipping unrecoverable transaction of reorged block"),
            }
        }
        for block in added {
            self.on_block_added(block);
        }
    }

    /// Evicts transactions older than the configured lifetime and forgets
    /// old handled hashes.
    pub fn cleanup(&mut self) {
        let now = Instant::now();
        let expired = |added: Instant, lifetime: u64| {
            now.saturating_duration_since(added) >= Duration::from_secs(lifetime)
        };
        let stale: Vec<H256> = self
            .senders
            .values()
            .flat_map(|queue| queue.txs.values())
            .filter(|tx| expired(tx.added, self.config.tx_lifetime_secs))
            .map(|tx| tx.hash)
            .collect();
        for hash in &stale {
            self.remove(hash);
        }
        let handled_lifetime = self.config.handled_lifetime_secs;
        self.handled
            .retain(|_, added| !expired(*added, handled_lifetime));
        if !stale.is_empty() {
            debug!(evicted = stale.len(), "Evicted expired pool transactions");
        }
    }

    /// Removes every pooled transaction.
    pub fn clear(&mut self) {
        let hashes: Vec<H256> = self.by_hash.keys().copied().collect();
        self.senders.clear();
        self.by_hash.clear();
        for hash in hashes {
            self.handled.remove(&hash);
            self.observers.emit(TxPoolEvent::TxRemoved(hash));
        }
    }

    /// Independent copy of the pool contents, without subscribers.
    pub fn deep_copy(&self) -> Self {
        Self {
            config: self.config.clone(),
            chain: self.chain,
            block_gas_limit: self.block_gas_limit,
            senders: self.senders.clone(),
            by_hash: self.by_hash.clone(),
            handled: self.handled.clone(),
            next_seq: self.next_seq,
            observers: Observers::default(),
        }
    }
}

/// `(tip, fee cap)` of a transaction; legacy prices count as both.
fn fee_caps(tx: &Transaction) -> (u64, u64) {
    (
        tx.max_priority_fee().unwrap_or_else(|| tx.gas_price()),
        tx.gas_price(),
    )
}
