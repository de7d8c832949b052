use ethereum_types::{H256, U256};
use lazy_static::lazy_static;

use crate::utils::keccak;

pub const RLP_NULL: u8 = 0x80;
pub const RLP_EMPTY_LIST: u8 = 0xc0;

pub const GWEI_TO_WEI: u64 = 1_000_000_000;
pub const ETHER_TO_WEI: u128 = 1_000_000_000_000_000_000;

// === Transaction gas costs ===

pub const TX_GAS_COST: u64 = 21000;
pub const TX_CREATE_GAS_COST: u64 = 53000;
pub const TX_DATA_ZERO_GAS_COST: u64 = 4;
pub const TX_DATA_NON_ZERO_GAS: u64 = 68;
pub const TX_DATA_NON_ZERO_GAS_EIP2028: u64 = 16;
pub const TX_INIT_CODE_WORD_GAS_COST: u64 = 2;
pub const TX_ACCESS_LIST_ADDRESS_GAS: u64 = 2400;
pub const TX_ACCESS_LIST_STORAGE_KEY_GAS: u64 = 1900;
pub const MAX_INITCODE_SIZE: usize = 2 * 24 * 1024;

// === EIP-1559 constants ===

pub const INITIAL_BASE_FEE: u64 = 1_000_000_000;
pub const BASE_FEE_MAX_CHANGE_DENOMINATOR: u64 = 8;
pub const ELASTICITY_MULTIPLIER: u64 = 2;
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;
pub const MIN_GAS_LIMIT: u64 = 5000;

// === EIP-4844 constants ===

/// Gas consumption of a single data blob (== blob byte size).
pub const GAS_PER_BLOB: u64 = 1 << 17;

// Minimum base fee per blob
pub const MIN_BASE_FEE_PER_BLOB_GAS: u64 = 1;

// === Ommer rewards ===

/// Distance past which an ommer no longer earns anything.
pub const MAX_OMMER_DEPTH: u64 = 8;
/// Divisor applied to the block reward for each ommer included.
pub const OMMER_INCLUSION_REWARD_DIVISOR: u64 = 32;

lazy_static! {
    /// keccak256(rlp("")), the root of a trie with no entries.
    pub static ref EMPTY_TRIE_HASH: H256 = keccak([RLP_NULL]);
    /// keccak256(""), the code hash of an account without code.
    pub static ref EMPTY_KECCACK_HASH: H256 = keccak(b"");
    /// keccak256(rlp([])), the ommers hash of a block without ommers.
    pub static ref DEFAULT_OMMERS_HASH: H256 = keccak([RLP_EMPTY_LIST]);
}

pub fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::from(ETHER_TO_WEI)
}

pub fn gwei(amount: u64) -> U256 {
    U256::from(amount) * U256::from(GWEI_TO_WEI)
}
