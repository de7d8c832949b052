use ethereum_types::{H256, U256};
use sha3::{Digest, Keccak256};

/// Keccak-256 of arbitrary bytes.
pub fn keccak(data: impl AsRef<[u8]>) -> H256 {
    H256(Keccak256::new_with_prefix(data).finalize().into())
}

/// Converts a U256 to a big endian slice.
#[inline(always)]
pub fn u256_to_big_endian(value: U256) -> [u8; 32] {
    let mut bytes = [0u8; 32];

    for i in 0..4 {
        let u64_be = value.0[4 - i - 1].to_be_bytes();
        bytes[8 * i..(8 * i + 8)].copy_from_slice(&u64_be);
    }

    bytes
}

/// Converts a big endian slice of at most 32 bytes to a U256.
pub fn u256_from_big_endian(slice: &[u8]) -> U256 {
    let mut padded = [0u8; 32];
    let start = 32usize.saturating_sub(slice.len());
    padded[start..].copy_from_slice(&slice[slice.len().saturating_sub(32)..]);

    let mut ret = [0; 4];
    let mut u64_bytes = [0u8; 8];
    for i in 0..4 {
        u64_bytes.copy_from_slice(&padded[8 * i..(8 * i + 8)]);
        ret[4 - i - 1] = u64::from_be_bytes(u64_bytes);
    }

    U256(ret)
}

#[inline(always)]
pub fn u256_to_h256(value: U256) -> H256 {
    H256(u256_to_big_endian(value))
}

#[inline(always)]
pub fn h256_to_u256(value: H256) -> U256 {
    u256_from_big_endian(value.as_bytes())
}

pub fn decode_hex(hex: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let trimmed = hex.trim_start_matches("0x");
    if trimmed.len() % 2 != 0 {
        return hex::decode(format!("0{trimmed}"));
    }
    hex::decode(trimmed)
}
