pub use ethereum_types::*;
pub mod constants;
pub mod rlp;
pub mod serde_utils;
pub mod trie;
pub mod types;
pub mod utils;
pub use bytes::Bytes;
