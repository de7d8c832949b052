use bytes::{BufMut, Bytes};
use ethereum_types::{Address, Bloom, BloomInput, H256};
use serde::{Deserialize, Serialize};

use crate::{
    rlp::{Encoder, RLPEncode},
    types::TxType,
};

/// First field of a receipt: the post-transaction state root before
/// Byzantium, the execution status since.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReceiptOutcome {
    StateRoot(H256),
    Status(bool),
}

/// Result of a transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_type: TxType,
    pub outcome: ReceiptOutcome,
    pub cumulative_gas_used: u64,
    pub bloom: Bloom,
    pub logs: Vec<Log>,
    /// Only present for blob transactions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_gas_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_gas_price: Option<u64>,
}

impl Receipt {
    pub fn new(
        tx_type: TxType,
        outcome: ReceiptOutcome,
        cumulative_gas_used: u64,
        logs: Vec<Log>,
    ) -> Self {
        Self {
            tx_type,
            outcome,
            cumulative_gas_used,
            bloom: bloom_from_logs(&logs),
            logs,
            blob_gas_used: None,
            blob_gas_price: None,
        }
    }

    /// `None` for pre-Byzantium receipts, which carry a state root instead.
    pub fn status(&self) -> Option<bool> {
        match self.outcome {
            ReceiptOutcome::Status(succeeded) => Some(succeeded),
            ReceiptOutcome::StateRoot(_) => None,
        }
    }

    pub fn state_root(&self) -> Option<H256> {
        match self.outcome {
            ReceiptOutcome::StateRoot(root) => Some(root),
            ReceiptOutcome::Status(_) => None,
        }
    }

    /// Consensus encoding, as hashed into the receipts root:
    /// `rlp([status_or_root, cumulative_gas_used, bloom, logs])`, prefixed by
    /// the transaction type byte for typed receipts. Blob gas fields are not
    /// part of the consensus encoding.
    pub fn encode_inner(&self) -> Vec<u8> {
        // Bloom is already 256 bytes, so we preallocate at least that much plus some,
        // to avoid multiple small allocations.
        let mut encode_buf = Vec::with_capacity(512);
        if self.tx_type != TxType::Legacy {
            encode_buf.push(self.tx_type as u8);
        }
        let encoder = Encoder::new(&mut encode_buf);
        let encoder = match self.outcome {
            ReceiptOutcome::StateRoot(root) => encoder.encode_field(&root),
            ReceiptOutcome::Status(succeeded) => encoder.encode_field(&succeeded),
        };
        encoder
            .encode_field(&self.cumulative_gas_used)
            .encode_field(&self.bloom)
            .encode_field(&self.logs)
            .finish();
        encode_buf
    }
}

impl RLPEncode for Receipt {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_slice(&self.encode_inner());
    }
}

/// Bloom over the addresses and topics of every log (3 bits each).
pub fn bloom_from_logs(logs: &[Log]) -> Bloom {
    let mut bloom = Bloom::zero();
    for log in logs {
        bloom.accrue(BloomInput::Raw(log.address.as_bytes()));
        for topic in log.topics.iter() {
            bloom.accrue(BloomInput::Raw(topic.as_bytes()));
        }
    }
    bloom
}

/// Data record produced during the execution of a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<H256>,
    #[serde(with = "crate::serde_utils::bytes")]
    pub data: Bytes,
}

impl RLPEncode for Log {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.address)
            .encode_field(&self.topics)
            .encode_field(&self.data)
            .finish();
    }
}
