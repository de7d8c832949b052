use std::{cmp::Ordering, collections::VecDeque};

use rustc_hash::FxHashMap;
use tevm_common::{Address, types::Transaction};

use crate::mempool::MempoolTransaction;

/// Executable pool transactions waiting to be included in a block.
#[derive(Debug, Default)]
pub struct TransactionQueue {
    // The first transaction of each sender along with its tip, sorted by highest tip
    heads: Vec<HeadTransaction>,
    // The remaining txs grouped by sender and sorted by nonce
    txs: FxHashMap<Address, VecDeque<MempoolTransaction>>,
    base_fee: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadTransaction {
    pub tx: MempoolTransaction,
    pub tip: u64,
}

impl HeadTransaction {
    /// `None` when the transaction cannot pay `base_fee`.
    fn new(tx: MempoolTransaction, base_fee: Option<u64>) -> Option<Self> {
        let tip = tx.effective_gas_tip(base_fee)?;
        Some(Self { tx, tip })
    }
}

impl std::ops::Deref for HeadTransaction {
    type Target = Transaction;

    fn deref(&self) -> &Self::Target {
        &self.tx
    }
}

impl From<HeadTransaction> for Transaction {
    fn from(val: HeadTransaction) -> Self {
        val.tx.transaction().clone()
    }
}

impl TransactionQueue {
    /// Creates a queue from transactions grouped by sender and sorted by nonce.
    pub(crate) fn new(
        txs: impl IntoIterator<Item = (Address, Vec<MempoolTransaction>)>,
        base_fee: Option<u64>,
    ) -> Self {
        let mut heads = Vec::new();
        let mut remaining = FxHashMap::default();
        for (sender, txs) in txs {
            let mut txs = VecDeque::from(txs);
            let Some(head) = txs
                .pop_front()
                .and_then(|tx| HeadTransaction::new(tx, base_fee))
            else {
                continue;
            };
            heads.push(head);
            remaining.insert(sender, txs);
        }
        // Highest tip first, oldest first among equal tips
        heads.sort();
        Self {
            heads,
            txs: remaining,
            base_fee,
        }
    }

    pub fn clear(&mut self) {
        self.heads.clear();
        self.txs.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// Returns the head transaction with the highest tip.
    pub fn peek(&self) -> Option<HeadTransaction> {
        self.heads.first().cloned()
    }

    /// Removes the current head and every other transaction of its sender.
    pub fn pop(&mut self) {
        if !self.is_empty() {
            let sender = self.heads.remove(0).tx.sender();
            self.txs.remove(&sender);
        }
    }

    /// Removes the current head and replaces it with the next transaction of
    /// the same sender.
    pub fn shift(&mut self) {
        if self.is_empty() {
            return;
        }
        let sender = self.heads.remove(0).tx.sender();
        let Some(txs) = self.txs.get_mut(&sender) else {
            return;
        };
        let next = txs
            .pop_front()
            .and_then(|tx| HeadTransaction::new(tx, self.base_fee));
        match next {
            Some(head) => {
                // Sequence numbers are unique so the search never hits an equal element
                let index = self.heads.binary_search(&head).unwrap_or_else(|index| index);
                self.heads.insert(index, head);
            }
            None => {
                self.txs.remove(&sender);
            }
        }
    }
}

// Orders transactions by highest tip, if tip is equal, orders by insertion order
impl Ord for HeadTransaction {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.tip.cmp(&self.tip) {
            Ordering::Equal => self.tx.seq().cmp(&other.tx.seq()),
            ordering => ordering,
        }
    }
}

impl PartialOrd for HeadTransaction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
