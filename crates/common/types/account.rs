use bytes::Bytes;
use ethereum_types::{H256, U256};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{EMPTY_KECCACK_HASH, EMPTY_TRIE_HASH},
    rlp::{Encoder, RLPEncode},
    utils::keccak,
};

/// The consensus representation of an account, as stored in the state trie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: H256,
    pub code_hash: H256,
}

impl Default for AccountState {
    fn default() -> Self {
        Self {
            nonce: Default::default(),
            balance: Default::default(),
            storage_root: *EMPTY_TRIE_HASH,
            code_hash: *EMPTY_KECCACK_HASH,
        }
    }
}

impl AccountState {
    pub fn with_balance(balance: U256) -> Self {
        Self {
            balance,
            ..Default::default()
        }
    }

    pub fn has_code(&self) -> bool {
        self.code_hash != *EMPTY_KECCACK_HASH
    }

    /// EIP-161 emptiness: no nonce, no balance and no code.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && !self.has_code()
    }
}

impl RLPEncode for AccountState {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.nonce)
            .encode_field(&self.balance)
            .encode_field(&self.storage_root)
            .encode_field(&self.code_hash)
            .finish();
    }
}

pub fn code_hash(code: &Bytes) -> H256 {
    keccak(code.as_ref())
}
