use rustc_hash::FxHashMap;
use tevm_common::{
    Address, H256,
    types::{Block, BlockHeader, Receipt},
};
use tevm_vm::RunTxResult;

use crate::error::ChainError;

/// Receipt of an included transaction together with where it was included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReceipt {
    pub receipt: Receipt,
    pub tx_hash: H256,
    pub block_hash: H256,
    pub block_number: u64,
    pub index: usize,
    pub sender: Address,
    pub gas_used: u64,
    pub effective_gas_price: u64,
    pub created_address: Option<Address>,
}

/// Canonical blocks of the node in memory, starting at its genesis (or the
/// forked block).
#[derive(Debug, Clone)]
pub struct ChainStore {
    first_number: u64,
    blocks: Vec<Block>,
    by_hash: FxHashMap<H256, u64>,
    receipts: FxHashMap<H256, StoredReceipt>,
}

impl ChainStore {
    pub fn new(genesis: Block) -> Self {
        let mut by_hash = FxHashMap::default();
        by_hash.insert(genesis.hash(), genesis.header.number);
        Self {
            first_number: genesis.header.number,
            blocks: vec![genesis],
            by_hash,
            receipts: FxHashMap::default(),
        }
    }

    pub fn head(&self) -> &Block {
        // The genesis block is never removed
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn get_block_by_number(&self, number: u64) -> Option<&Block> {
        let index = number.checked_sub(self.first_number)?;
        self.blocks.get(usize::try_from(index).ok()?)
    }

    pub fn get_block_by_hash(&self, hash: &H256) -> Option<&Block> {
        self.get_block_by_number(*self.by_hash.get(hash)?)
    }

    pub fn get_header(&self, number: u64) -> Option<&BlockHeader> {
        self.get_block_by_number(number).map(|block| &block.header)
    }

    pub fn get_receipt(&self, tx_hash: &H256) -> Option<&StoredReceipt> {
        self.receipts.get(tx_hash)
    }

    /// Appends `block` on top of the head.
    pub fn push(&mut self, block: Block, results: &[RunTxResult]) -> Result<(), ChainError> {
        let head = self.head();
        if block.header.number != head.header.number + 1 {
            return Err(ChainError::NonSequentialBlock(block.header.number));
        }
        if block.header.parent_hash != head.hash() {
            return Err(ChainError::ParentNotFound);
        }
        let block_hash = block.hash();
        for (index, result) in results.iter().enumerate() {
            self.receipts.insert(
                result.tx_hash,
                StoredReceipt {
                    receipt: result.receipt.clone(),
                    tx_hash: result.tx_hash,
                    block_hash,
                    block_number: block.header.number,
                    index,
                    sender: result.sender,
                    gas_used: result.total_gas_spent,
                    effective_gas_price: result.effective_gas_price,
                    created_address: result.created_address,
                },
            );
        }
        self.by_hash.insert(block_hash, block.header.number);
        self.blocks.push(block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(parent: &Block) -> Block {
        Block {
            header: BlockHeader {
                number: parent.header.number + 1,
                parent_hash: parent.hash(),
                ..BlockHeader::empty()
            },
            ..Default::default()
        }
    }

    #[test]
    fn indexes_blocks_from_the_first_number() {
        let genesis = Block {
            header: BlockHeader {
                number: 100,
                ..BlockHeader::empty()
            },
            ..Default::default()
        };
        let mut store = ChainStore::new(genesis.clone());
        let next = child(&genesis);
        store.push(next.clone(), &[]).unwrap();

        assert_eq!(store.head().hash(), next.hash());
        assert_eq!(store.get_block_by_number(100), Some(&genesis));
        assert_eq!(store.get_block_by_hash(&next.hash()), Some(&next));
        assert!(store.get_block_by_number(99).is_none());
        assert!(store.get_block_by_number(102).is_none());
    }

    #[test]
    fn rejects_blocks_that_do_not_extend_the_head() {
        let genesis = Block::default();
        let mut store = ChainStore::new(genesis.clone());
        let mut orphan = child(&genesis);
        orphan.header.parent_hash = H256::repeat_byte(1);
        assert!(matches!(
            store.push(orphan, &[]),
            Err(ChainError::ParentNotFound)
        ));
        let mut skipped = child(&genesis);
        skipped.header.number = 5;
        assert!(matches!(
            store.push(skipped, &[]),
            Err(ChainError::NonSequentialBlock(5))
        ));
    }
}
