//! Merkle Patricia Trie root computation.
//!
//! Tries are built in memory from a complete set of `(path, value)` pairs and
//! only the root hash is kept. Node encodings follow the yellow paper: leaves and
//! extensions carry hex-prefix encoded partial paths, and any child whose RLP is
//! shorter than 32 bytes is inlined into its parent instead of being hashed.

use std::collections::BTreeMap;

use ethereum_types::H256;

use crate::{
    constants::{EMPTY_TRIE_HASH, RLP_NULL},
    rlp::{Encoder, RLPEncode, encode_bytes, encode_length},
    utils::keccak,
};

/// A nibble path, one nibble per byte.
type Nibbles = Vec<u8>;

fn to_nibbles(bytes: &[u8]) -> Nibbles {
    let mut nibbles = Vec::with_capacity(bytes.len() * 2);
    for byte in bytes {
        nibbles.push(byte >> 4 & 0x0F);
        nibbles.push(byte & 0x0F);
    }
    nibbles
}

/// Hex-prefix encoding of a partial path (yellow paper, appendix C).
fn compact_encode(nibbles: &[u8], is_leaf: bool) -> Vec<u8> {
    let odd = nibbles.len() % 2 == 1;
    let flag = (if is_leaf { 2 } else { 0 }) + u8::from(odd);
    let mut compact = Vec::with_capacity(nibbles.len() / 2 + 1);
    let rest = if odd {
        compact.push(flag << 4 | nibbles[0]);
        &nibbles[1..]
    } else {
        compact.push(flag << 4);
        nibbles
    };
    for pair in rest.chunks(2) {
        compact.push(pair[0] << 4 | pair[1]);
    }
    compact
}

/// Reference to a child node: the raw encoding when short enough, else its hash.
fn encode_child(encoded: &[u8], buf: &mut Vec<u8>) {
    if encoded.len() < 32 {
        buf.extend_from_slice(encoded);
    } else {
        keccak(encoded).encode(buf);
    }
}

fn common_prefix_len(items: &[(Nibbles, Vec<u8>)], depth: usize) -> usize {
    let first = &items[0].0[depth..];
    let mut len = first.len();
    for (path, _) in &items[1..] {
        len = len.min(
            first
                .iter()
                .zip(&path[depth..])
                .take_while(|(a, b)| a == b)
                .count(),
        );
    }
    len
}

/// Returns the RLP encoding of the node rooted at `depth` over `items`.
/// `items` must be sorted by path and free of duplicates.
fn encode_node(items: &[(Nibbles, Vec<u8>)], depth: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    if let [(path, value)] = items {
        Encoder::new(&mut buf)
            .encode_field(compact_encode(&path[depth..], true).as_slice())
            .encode_field(value.as_slice())
            .finish();
        return buf;
    }

    let prefix_len = common_prefix_len(items, depth);
    if prefix_len > 0 {
        let child = encode_node(items, depth + prefix_len);
        let mut payload = Vec::new();
        compact_encode(&items[0].0[depth..depth + prefix_len], false)
            .as_slice()
            .encode(&mut payload);
        encode_child(&child, &mut payload);
        encode_length(payload.len(), &mut buf);
        buf.extend_from_slice(&payload);
        return buf;
    }

    // Branch node: 16 children plus the value of a path ending exactly here.
    let mut payload = Vec::new();
    let mut value: Option<&[u8]> = None;
    let mut start = 0;
    if items[0].0.len() == depth {
        value = Some(&items[0].1);
        start = 1;
    }
    for nibble in 0..16u8 {
        let end = start
            + items[start..]
                .iter()
                .take_while(|(path, _)| path[depth] == nibble)
                .count();
        if end == start {
            payload.push(RLP_NULL);
        } else {
            let child = encode_node(&items[start..end], depth + 1);
            encode_child(&child, &mut payload);
        }
        start = end;
    }
    match value {
        Some(value) => encode_bytes(value, &mut payload),
        None => payload.push(RLP_NULL),
    }
    encode_length(payload.len(), &mut buf);
    buf.extend_from_slice(&payload);
    buf
}

/// Computes the root hash of the trie holding the given key/value pairs.
/// Later duplicates of a key overwrite earlier ones.
pub fn compute_trie_root<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> H256
where
    K: AsRef<[u8]>,
    V: Into<Vec<u8>>,
{
    let sorted: BTreeMap<Nibbles, Vec<u8>> = entries
        .into_iter()
        .map(|(key, value)| (to_nibbles(key.as_ref()), value.into()))
        .collect();
    if sorted.is_empty() {
        return *EMPTY_TRIE_HASH;
    }
    let items: Vec<(Nibbles, Vec<u8>)> = sorted.into_iter().collect();
    keccak(encode_node(&items, 0))
}

/// Root of a "secure" trie, where every key is hashed before insertion.
pub fn compute_secure_trie_root<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> H256
where
    K: AsRef<[u8]>,
    V: Into<Vec<u8>>,
{
    compute_trie_root(
        entries
            .into_iter()
            .map(|(key, value)| (keccak(key.as_ref()), value)),
    )
}

/// Root of a trie keyed by `rlp(index)`, as used for transactions, receipts
/// and withdrawals.
pub fn compute_ordered_trie_root<V: Into<Vec<u8>>>(values: impl IntoIterator<Item = V>) -> H256 {
    compute_trie_root(
        values
            .into_iter()
            .enumerate()
            .map(|(index, value)| (index.encode_to_vec(), value)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn empty_trie_root() {
        assert_eq!(
            compute_trie_root(Vec::<(Vec<u8>, Vec<u8>)>::new()),
            H256(hex!(
                "56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
            ))
        );
        assert_eq!(
            compute_ordered_trie_root(Vec::<Vec<u8>>::new()),
            *EMPTY_TRIE_HASH
        );
    }

    #[test]
    fn single_entry_root() {
        // Leaf [0x20 || "a", "b"], reference value from the ethereum trie tests.
        let root = compute_trie_root([(b"a".to_vec(), b"b".to_vec())]);
        let expected = keccak(hex!("c482206162"));
        assert_eq!(root, expected);
    }

    #[test]
    fn dogs_trie_root() {
        // "dogs" fixture of the ethereum/tests trie suite.
        let root = compute_trie_root([
            (b"doe".to_vec(), b"reindeer".to_vec()),
            (b"dog".to_vec(), b"puppy".to_vec()),
            (b"dogglesworth".to_vec(), b"cat".to_vec()),
        ]);
        assert_eq!(
            root,
            H256(hex!(
                "8aad789dff2f538bca5d8ea56e8abe10f4c7ba3a5dea95fea4cd6e7c3a1168d3"
            ))
        );
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let entries = [
            (b"do".to_vec(), b"verb".to_vec()),
            (b"horse".to_vec(), b"stallion".to_vec()),
            (b"doge".to_vec(), b"coin".to_vec()),
            (b"dog".to_vec(), b"puppy".to_vec()),
        ];
        let mut reversed = entries.clone();
        reversed.reverse();
        let root = compute_trie_root(entries);
        assert_eq!(root, compute_trie_root(reversed));
        assert_eq!(
            root,
            H256(hex!(
                "5991bb8c6514148a29db676a14ac506cd2cd5775ace63c30a4fe457715e9ac84"
            ))
        );
    }
}
