use bytes::{BufMut, Bytes};
use ethereum_types::{Address, Bloom, H256, U256};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{
        BASE_FEE_MAX_CHANGE_DENOMINATOR, DEFAULT_OMMERS_HASH, ELASTICITY_MULTIPLIER,
        EMPTY_TRIE_HASH, GWEI_TO_WEI, INITIAL_BASE_FEE,
    },
    rlp::{Encoder, RLPEncode},
    trie::compute_ordered_trie_root,
    types::{Receipt, Transaction},
    utils::keccak,
};

pub type BlockNumber = u64;
pub type BlockHash = H256;

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

impl Block {
    pub fn new(header: BlockHeader, body: BlockBody) -> Block {
        Block { header, body }
    }

    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }
}

impl RLPEncode for Block {
    fn encode(&self, buf: &mut dyn BufMut) {
        let transactions: Vec<u8> = {
            let mut payload = Vec::new();
            for tx in &self.body.transactions {
                match tx {
                    Transaction::LegacyTransaction(legacy) => legacy.encode(&mut payload),
                    // Typed transactions are wrapped as byte strings inside block bodies.
                    typed => typed.encode_canonical_to_vec().as_slice().encode(&mut payload),
                }
            }
            let mut list = Vec::new();
            crate::rlp::encode_length(payload.len(), &mut list);
            list.extend_from_slice(&payload);
            list
        };
        Encoder::new(buf)
            .encode_field(&self.header)
            .encode_raw(&transactions)
            .encode_field(&self.body.ommers)
            .encode_optional_field(&self.body.withdrawals)
            .finish();
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub parent_hash: H256,
    #[serde(rename = "sha3Uncles")]
    pub ommers_hash: H256,
    #[serde(rename = "miner")]
    pub coinbase: Address,
    pub state_root: H256,
    pub transactions_root: H256,
    pub receipts_root: H256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    #[serde(with = "crate::serde_utils::u64::hex_str")]
    pub number: BlockNumber,
    #[serde(with = "crate::serde_utils::u64::hex_str")]
    pub gas_limit: u64,
    #[serde(with = "crate::serde_utils::u64::hex_str")]
    pub gas_used: u64,
    #[serde(with = "crate::serde_utils::u64::hex_str")]
    pub timestamp: u64,
    #[serde(with = "crate::serde_utils::bytes")]
    pub extra_data: Bytes,
    #[serde(rename = "mixHash")]
    pub prev_randao: H256,
    #[serde(with = "crate::serde_utils::u64::hex_str")]
    pub nonce: u64,
    #[serde(default, with = "crate::serde_utils::u64::hex_str_opt")]
    pub base_fee_per_gas: Option<u64>,
    #[serde(default)]
    pub withdrawals_root: Option<H256>,
    #[serde(default, with = "crate::serde_utils::u64::hex_str_opt")]
    pub blob_gas_used: Option<u64>,
    #[serde(default, with = "crate::serde_utils::u64::hex_str_opt")]
    pub excess_blob_gas: Option<u64>,
    #[serde(default)]
    pub parent_beacon_block_root: Option<H256>,
}

impl RLPEncode for BlockHeader {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.parent_hash)
            .encode_field(&self.ommers_hash)
            .encode_field(&self.coinbase)
            .encode_field(&self.state_root)
            .encode_field(&self.transactions_root)
            .encode_field(&self.receipts_root)
            .encode_field(&self.logs_bloom)
            .encode_field(&self.difficulty)
            .encode_field(&self.number)
            .encode_field(&self.gas_limit)
            .encode_field(&self.gas_used)
            .encode_field(&self.timestamp)
            .encode_field(&self.extra_data)
            .encode_field(&self.prev_randao)
            .encode_field(&self.nonce.to_be_bytes())
            .encode_optional_field(&self.base_fee_per_gas)
            .encode_optional_field(&self.withdrawals_root)
            .encode_optional_field(&self.blob_gas_used)
            .encode_optional_field(&self.excess_blob_gas)
            .encode_optional_field(&self.parent_beacon_block_root)
            .finish();
    }
}

impl BlockHeader {
    pub fn hash(&self) -> BlockHash {
        keccak(self.encode_to_vec())
    }

    /// Empty header with the roots of an empty block.
    pub fn empty() -> Self {
        Self {
            ommers_hash: *DEFAULT_OMMERS_HASH,
            state_root: *EMPTY_TRIE_HASH,
            transactions_root: *EMPTY_TRIE_HASH,
            receipts_root: *EMPTY_TRIE_HASH,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BlockBody {
    pub transactions: Vec<Transaction>,
    pub ommers: Vec<BlockHeader>,
    pub withdrawals: Option<Vec<Withdrawal>>,
}

impl BlockBody {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    #[serde(with = "crate::serde_utils::u64::hex_str")]
    pub index: u64,
    #[serde(with = "crate::serde_utils::u64::hex_str")]
    pub validator_index: u64,
    pub address: Address,
    /// Amount in gwei
    #[serde(with = "crate::serde_utils::u64::hex_str")]
    pub amount: u64,
}

impl Withdrawal {
    pub fn amount_in_wei(&self) -> U256 {
        U256::from(self.amount) * U256::from(GWEI_TO_WEI)
    }
}

impl RLPEncode for Withdrawal {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.index)
            .encode_field(&self.validator_index)
            .encode_field(&self.address)
            .encode_field(&self.amount)
            .finish();
    }
}

pub fn compute_transactions_root(transactions: &[Transaction]) -> H256 {
    compute_ordered_trie_root(transactions.iter().map(|tx| tx.encode_canonical_to_vec()))
}

pub fn compute_receipts_root(receipts: &[Receipt]) -> H256 {
    compute_ordered_trie_root(receipts.iter().map(|receipt| receipt.encode_inner()))
}

pub fn compute_withdrawals_root(withdrawals: &[Withdrawal]) -> H256 {
    compute_ordered_trie_root(withdrawals.iter().map(|w| w.encode_to_vec()))
}

/// EIP-1559 base fee of the block following `parent`.
///
/// A parent without a base fee is the last pre-London block, so the child
/// starts at the initial base fee.
pub fn calculate_base_fee_per_gas(parent: &BlockHeader) -> u64 {
    let Some(parent_base_fee) = parent.base_fee_per_gas else {
        return INITIAL_BASE_FEE;
    };
    let parent_gas_target = parent.gas_limit / ELASTICITY_MULTIPLIER;
    if parent_gas_target == 0 {
        return parent_base_fee;
    }

    match parent.gas_used.cmp(&parent_gas_target) {
        std::cmp::Ordering::Equal => parent_base_fee,
        std::cmp::Ordering::Greater => {
            let gas_used_delta = parent.gas_used - parent_gas_target;
            let base_fee_delta = (parent_base_fee as u128 * gas_used_delta as u128
                / parent_gas_target as u128
                / BASE_FEE_MAX_CHANGE_DENOMINATOR as u128)
                .max(1) as u64;
            parent_base_fee.saturating_add(base_fee_delta)
        }
        std::cmp::Ordering::Less => {
            let gas_used_delta = parent_gas_target - parent.gas_used;
            let base_fee_delta = (parent_base_fee as u128 * gas_used_delta as u128
                / parent_gas_target as u128
                / BASE_FEE_MAX_CHANGE_DENOMINATOR as u128) as u64;
            parent_base_fee.saturating_sub(base_fee_delta)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(gas_used: u64) -> BlockHeader {
        BlockHeader {
            gas_limit: 30_000_000,
            gas_used,
            base_fee_per_gas: Some(1_000_000_000),
            ..Default::default()
        }
    }

    #[test]
    fn base_fee_moves_with_gas_used() {
        assert_eq!(
            calculate_base_fee_per_gas(&parent(15_000_000)),
            1_000_000_000
        );
        assert_eq!(
            calculate_base_fee_per_gas(&parent(30_000_000)),
            1_125_000_000
        );
        assert_eq!(calculate_base_fee_per_gas(&parent(0)), 875_000_000);
        let pre_london = BlockHeader::default();
        assert_eq!(calculate_base_fee_per_gas(&pre_london), INITIAL_BASE_FEE);
    }

    #[test]
    fn empty_block_roots() {
        assert_eq!(compute_transactions_root(&[]), *EMPTY_TRIE_HASH);
        assert_eq!(compute_withdrawals_root(&[]), *EMPTY_TRIE_HASH);
        let header = BlockHeader::empty();
        assert_eq!(header.receipts_root, *EMPTY_TRIE_HASH);
        assert_ne!(header.hash(), H256::zero());
    }
}
