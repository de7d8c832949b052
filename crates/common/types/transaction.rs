use bytes::{BufMut, Bytes};
use ethereum_types::{Address, H256, U256};
use secp256k1::{
    Message, SECP256K1, SecretKey,
    ecdsa::{RecoverableSignature, RecoveryId},
};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{
        GAS_PER_BLOB, TX_ACCESS_LIST_ADDRESS_GAS, TX_ACCESS_LIST_STORAGE_KEY_GAS,
        TX_CREATE_GAS_COST, TX_DATA_NON_ZERO_GAS, TX_DATA_NON_ZERO_GAS_EIP2028,
        TX_DATA_ZERO_GAS_COST, TX_GAS_COST, TX_INIT_CODE_WORD_GAS_COST,
    },
    rlp::{Encoder, RLPEncode},
    types::ChainConfig,
    utils::{keccak, u256_from_big_endian, u256_to_big_endian},
};

pub type AccessList = Vec<AccessListItem>;
pub type AccessListItem = (Address, Vec<H256>);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxType {
    Legacy = 0x00,
    EIP2930 = 0x01,
    EIP1559 = 0x02,
    EIP4844 = 0x03,
}

impl From<TxType> for u8 {
    fn from(val: TxType) -> Self {
        val as u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub enum TxKind {
    Call(Address),
    #[default]
    Create,
}

impl RLPEncode for TxKind {
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            Self::Call(address) => address.encode(buf),
            Self::Create => buf.put_u8(crate::constants::RLP_NULL),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u64,
    pub gas: u64,
    pub to: TxKind,
    pub value: U256,
    pub data: Bytes,
    pub v: U256,
    pub r: U256,
    pub s: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct EIP2930Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u64,
    pub gas_limit: u64,
    pub to: TxKind,
    pub value: U256,
    pub data: Bytes,
    pub access_list: AccessList,
    pub signature_y_parity: bool,
    pub signature_r: U256,
    pub signature_s: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct EIP1559Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: u64,
    pub max_fee_per_gas: u64,
    pub gas_limit: u64,
    pub to: TxKind,
    pub value: U256,
    pub data: Bytes,
    pub access_list: AccessList,
    pub signature_y_parity: bool,
    pub signature_r: U256,
    pub signature_s: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct EIP4844Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: u64,
    pub max_fee_per_gas: u64,
    pub gas: u64,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub access_list: AccessList,
    pub max_fee_per_blob_gas: U256,
    pub blob_versioned_hashes: Vec<H256>,
    pub signature_y_parity: bool,
    pub signature_r: U256,
    pub signature_s: U256,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transaction {
    LegacyTransaction(LegacyTransaction),
    EIP2930Transaction(EIP2930Transaction),
    EIP1559Transaction(EIP1559Transaction),
    EIP4844Transaction(EIP4844Transaction),
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction::LegacyTransaction(Default::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcdsaError {
    #[error("Invalid signature: {0}")]
    Secp256k1(#[from] secp256k1::Error),
    #[error("Invalid signature recovery value {0}")]
    InvalidRecoveryValue(U256),
}

impl RLPEncode for LegacyTransaction {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.nonce)
            .encode_field(&self.gas_price)
            .encode_field(&self.gas)
            .encode_field(&self.to)
            .encode_field(&self.value)
            .encode_field(&self.data)
            .encode_field(&self.v)
            .encode_field(&self.r)
            .encode_field(&self.s)
            .finish();
    }
}

impl RLPEncode for EIP2930Transaction {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.payload_encoder(buf)
            .encode_field(&self.signature_y_parity)
            .encode_field(&self.signature_r)
            .encode_field(&self.signature_s)
            .finish();
    }
}

impl RLPEncode for EIP1559Transaction {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.payload_encoder(buf)
            .encode_field(&self.signature_y_parity)
            .encode_field(&self.signature_r)
            .encode_field(&self.signature_s)
            .finish();
    }
}

impl RLPEncode for EIP4844Transaction {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.payload_encoder(buf)
            .encode_field(&self.signature_y_parity)
            .encode_field(&self.signature_r)
            .encode_field(&self.signature_s)
            .finish();
    }
}

impl EIP2930Transaction {
    fn payload_encoder<'a>(&self, buf: &'a mut dyn BufMut) -> Encoder<'a> {
        Encoder::new(buf)
            .encode_field(&self.chain_id)
            .encode_field(&self.nonce)
            .encode_field(&self.gas_price)
            .encode_field(&self.gas_limit)
            .encode_field(&self.to)
            .encode_field(&self.value)
            .encode_field(&self.data)
            .encode_field(&self.access_list)
    }
}

impl EIP1559Transaction {
    fn payload_encoder<'a>(&self, buf: &'a mut dyn BufMut) -> Encoder<'a> {
        Encoder::new(buf)
            .encode_field(&self.chain_id)
            .encode_field(&self.nonce)
            .encode_field(&self.max_priority_fee_per_gas)
            .encode_field(&self.max_fee_per_gas)
            .encode_field(&self.gas_limit)
            .encode_field(&self.to)
            .encode_field(&self.value)
            .encode_field(&self.data)
            .encode_field(&self.access_list)
    }
}

impl EIP4844Transaction {
    fn payload_encoder<'a>(&self, buf: &'a mut dyn BufMut) -> Encoder<'a> {
        Encoder::new(buf)
            .encode_field(&self.chain_id)
            .encode_field(&self.nonce)
            .encode_field(&self.max_priority_fee_per_gas)
            .encode_field(&self.max_fee_per_gas)
            .encode_field(&self.gas)
            .encode_field(&self.to)
            .encode_field(&self.value)
            .encode_field(&self.data)
            .encode_field(&self.access_list)
            .encode_field(&self.max_fee_per_blob_gas)
            .encode_field(&self.blob_versioned_hashes)
    }
}

impl Transaction {
    pub fn tx_type(&self) -> TxType {
        match self {
            Transaction::LegacyTransaction(_) => TxType::Legacy,
            Transaction::EIP2930Transaction(_) => TxType::EIP2930,
            Transaction::EIP1559Transaction(_) => TxType::EIP1559,
            Transaction::EIP4844Transaction(_) => TxType::EIP4844,
        }
    }

    /// Canonical encoding: `rlp(tx)` for legacy, `type || rlp(tx)` otherwise.
    pub fn encode_canonical(&self, buf: &mut dyn BufMut) {
        match self {
            Transaction::LegacyTransaction(t) => t.encode(buf),
            Transaction::EIP2930Transaction(t) => {
                buf.put_u8(TxType::EIP2930.into());
                t.encode(buf)
            }
            Transaction::EIP1559Transaction(t) => {
                buf.put_u8(TxType::EIP1559.into());
                t.encode(buf)
            }
            Transaction::EIP4844Transaction(t) => {
                buf.put_u8(TxType::EIP4844.into());
                t.encode(buf)
            }
        }
    }

    pub fn encode_canonical_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_canonical(&mut buf);
        buf
    }

    pub fn hash(&self) -> H256 {
        keccak(self.encode_canonical_to_vec())
    }

    /// Hash the sender signs over.
    pub fn signing_hash(&self) -> H256 {
        let mut buf = Vec::new();
        match self {
            Transaction::LegacyTransaction(t) => {
                let encoder = Encoder::new(&mut buf)
                    .encode_field(&t.nonce)
                    .encode_field(&t.gas_price)
                    .encode_field(&t.gas)
                    .encode_field(&t.to)
                    .encode_field(&t.value)
                    .encode_field(&t.data);
                match self.chain_id() {
                    // EIP-155
                    Some(chain_id) => encoder
                        .encode_field(&chain_id)
                        .encode_field(&0u64)
                        .encode_field(&0u64)
                        .finish(),
                    None => encoder.finish(),
                }
            }
            Transaction::EIP2930Transaction(t) => {
                buf.put_u8(TxType::EIP2930.into());
                t.payload_encoder(&mut buf).finish();
            }
            Transaction::EIP1559Transaction(t) => {
                buf.put_u8(TxType::EIP1559.into());
                t.payload_encoder(&mut buf).finish();
            }
            Transaction::EIP4844Transaction(t) => {
                buf.put_u8(TxType::EIP4844.into());
                t.payload_encoder(&mut buf).finish();
            }
        }
        keccak(buf)
    }

    /// Signs the transaction in place.
    ///
    /// A legacy transaction is replay protected (EIP-155) when `chain_id` is
    /// given; typed transactions always sign over their own chain id.
    pub fn sign(&mut self, secret_key: &SecretKey, chain_id: Option<u64>) {
        if let (Transaction::LegacyTransaction(tx), Some(chain_id)) = (&mut *self, chain_id) {
            // Only the chain id encoded in `v` matters for the signing hash.
            tx.v = U256::from(chain_id) * 2 + 35;
        } else if let Transaction::LegacyTransaction(tx) = self {
            tx.v = U256::from(27);
        }
        let message = Message::from_digest(self.signing_hash().0);
        let (recovery_id, signature) = SECP256K1
            .sign_ecdsa_recoverable(&message, secret_key)
            .serialize_compact();
        let parity = recovery_id.to_i32() == 1;
        let r = u256_from_big_endian(&signature[..32]);
        let s = u256_from_big_endian(&signature[32..]);
        match self {
            Transaction::LegacyTransaction(tx) => {
                tx.v = match chain_id {
                    Some(chain_id) => U256::from(chain_id) * 2 + 35 + u64::from(parity),
                    None => U256::from(27 + u64::from(parity)),
                };
                tx.r = r;
                tx.s = s;
            }
            Transaction::EIP2930Transaction(tx) => {
                (tx.signature_y_parity, tx.signature_r, tx.signature_s) = (parity, r, s)
            }
            Transaction::EIP1559Transaction(tx) => {
                (tx.signature_y_parity, tx.signature_r, tx.signature_s) = (parity, r, s)
            }
            Transaction::EIP4844Transaction(tx) => {
                (tx.signature_y_parity, tx.signature_r, tx.signature_s) = (parity, r, s)
            }
        }
    }

    fn signature(&self) -> Result<(bool, U256, U256), EcdsaError> {
        match self {
            Transaction::LegacyTransaction(tx) => {
                let parity = match self.chain_id() {
                    Some(chain_id) => tx.v - U256::from(chain_id) * 2 - 35,
                    None if tx.v == U256::from(27) || tx.v == U256::from(28) => {
                        tx.v - U256::from(27)
                    }
                    None => return Err(EcdsaError::InvalidRecoveryValue(tx.v)),
                };
                if parity > U256::one() {
                    return Err(EcdsaError::InvalidRecoveryValue(tx.v));
                }
                Ok((parity == U256::one(), tx.r, tx.s))
            }
            Transaction::EIP2930Transaction(tx) => {
                Ok((tx.signature_y_parity, tx.signature_r, tx.signature_s))
            }
            Transaction::EIP1559Transaction(tx) => {
                Ok((tx.signature_y_parity, tx.signature_r, tx.signature_s))
            }
            Transaction::EIP4844Transaction(tx) => {
                Ok((tx.signature_y_parity, tx.signature_r, tx.signature_s))
            }
        }
    }

    /// Recovers the address that signed the transaction.
    pub fn sender(&self) -> Result<Address, EcdsaError> {
        let (parity, r, s) = self.signature()?;
        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&u256_to_big_endian(r));
        compact[32..].copy_from_slice(&u256_to_big_endian(s));
        let signature =
            RecoverableSignature::from_compact(&compact, RecoveryId::from_i32(parity as i32)?)?;
        let message = Message::from_digest(self.signing_hash().0);
        let public_key = SECP256K1.recover_ecdsa(&message, &signature)?;
        let hash = keccak(&public_key.serialize_uncompressed()[1..]);
        Ok(Address::from_slice(&hash.0[12..]))
    }

    pub fn chain_id(&self) -> Option<u64> {
        match self {
            Transaction::LegacyTransaction(tx) => {
                if tx.v >= U256::from(35) {
                    Some(((tx.v - 35) / 2).low_u64())
                } else {
                    None
                }
            }
            Transaction::EIP2930Transaction(tx) => Some(tx.chain_id),
            Transaction::EIP1559Transaction(tx) => Some(tx.chain_id),
            Transaction::EIP4844Transaction(tx) => Some(tx.chain_id),
        }
    }

    /// Whether the signature commits to a chain id.
    pub fn protected(&self) -> bool {
        match self {
            Transaction::LegacyTransaction(tx) => tx.v != U256::from(27) && tx.v != U256::from(28),
            _ => true,
        }
    }

    pub fn nonce(&self) -> u64 {
        match self {
            Transaction::LegacyTransaction(tx) => tx.nonce,
            Transaction::EIP2930Transaction(tx) => tx.nonce,
            Transaction::EIP1559Transaction(tx) => tx.nonce,
            Transaction::EIP4844Transaction(tx) => tx.nonce,
        }
    }

    pub fn gas_limit(&self) -> u64 {
        match self {
            Transaction::LegacyTransaction(tx) => tx.gas,
            Transaction::EIP2930Transaction(tx) => tx.gas_limit,
            Transaction::EIP1559Transaction(tx) => tx.gas_limit,
            Transaction::EIP4844Transaction(tx) => tx.gas,
        }
    }

    /// Gas price for legacy style transactions, max fee per gas otherwise.
    pub fn gas_price(&self) -> u64 {
        match self {
            Transaction::LegacyTransaction(tx) => tx.gas_price,
            Transaction::EIP2930Transaction(tx) => tx.gas_price,
            Transaction::EIP1559Transaction(tx) => tx.max_fee_per_gas,
            Transaction::EIP4844Transaction(tx) => tx.max_fee_per_gas,
        }
    }

    pub fn max_fee_per_gas(&self) -> Option<u64> {
        match self {
            Transaction::LegacyTransaction(_) | Transaction::EIP2930Transaction(_) => None,
            Transaction::EIP1559Transaction(tx) => Some(tx.max_fee_per_gas),
            Transaction::EIP4844Transaction(tx) => Some(tx.max_fee_per_gas),
        }
    }

    pub fn max_priority_fee(&self) -> Option<u64> {
        match self {
            Transaction::LegacyTransaction(_) | Transaction::EIP2930Transaction(_) => None,
            Transaction::EIP1559Transaction(tx) => Some(tx.max_priority_fee_per_gas),
            Transaction::EIP4844Transaction(tx) => Some(tx.max_priority_fee_per_gas),
        }
    }

    pub fn max_fee_per_blob_gas(&self) -> Option<U256> {
        match self {
            Transaction::EIP4844Transaction(tx) => Some(tx.max_fee_per_blob_gas),
            _ => None,
        }
    }

    pub fn to(&self) -> TxKind {
        match self {
            Transaction::LegacyTransaction(tx) => tx.to,
            Transaction::EIP2930Transaction(tx) => tx.to,
            Transaction::EIP1559Transaction(tx) => tx.to,
            Transaction::EIP4844Transaction(tx) => TxKind::Call(tx.to),
        }
    }

    pub fn value(&self) -> U256 {
        match self {
            Transaction::LegacyTransaction(tx) => tx.value,
            Transaction::EIP2930Transaction(tx) => tx.value,
            Transaction::EIP1559Transaction(tx) => tx.value,
            Transaction::EIP4844Transaction(tx) => tx.value,
        }
    }

    pub fn data(&self) -> &Bytes {
        match self {
            Transaction::LegacyTransaction(tx) => &tx.data,
            Transaction::EIP2930Transaction(tx) => &tx.data,
            Transaction::EIP1559Transaction(tx) => &tx.data,
            Transaction::EIP4844Transaction(tx) => &tx.data,
        }
    }

    pub fn access_list(&self) -> &[AccessListItem] {
        match self {
            Transaction::LegacyTransaction(_) => &[],
            Transaction::EIP2930Transaction(tx) => &tx.access_list,
            Transaction::EIP1559Transaction(tx) => &tx.access_list,
            Transaction::EIP4844Transaction(tx) => &tx.access_list,
        }
    }

    pub fn blob_versioned_hashes(&self) -> &[H256] {
        match self {
            Transaction::EIP4844Transaction(tx) => &tx.blob_versioned_hashes,
            _ => &[],
        }
    }

    pub fn blob_gas(&self) -> u64 {
        self.blob_versioned_hashes().len() as u64 * GAS_PER_BLOB
    }

    pub fn is_contract_creation(&self) -> bool {
        matches!(self.to(), TxKind::Create)
    }

    /// Price per gas actually paid given a block base fee.
    pub fn effective_gas_price(&self, base_fee_per_gas: Option<u64>) -> u64 {
        match (self.max_fee_per_gas(), self.max_priority_fee()) {
            (Some(max_fee), Some(tip)) => {
                max_fee.min(tip.saturating_add(base_fee_per_gas.unwrap_or_default()))
            }
            _ => self.gas_price(),
        }
    }

    /// Priority fee per gas paid to the block producer, `None` when the
    /// transaction cannot pay the base fee.
    pub fn effective_gas_tip(&self, base_fee: Option<u64>) -> Option<u64> {
        let base_fee = base_fee.unwrap_or_default();
        let max_fee = self.gas_price();
        if max_fee < base_fee {
            return None;
        }
        match self.max_priority_fee() {
            Some(tip) => Some(tip.min(max_fee - base_fee)),
            None => Some(max_fee - base_fee),
        }
    }

    /// Upper bound on what executing the transaction can cost its sender,
    /// without blob fees: `value + gas_limit * max_fee`. `None` when it does
    /// not fit in 256 bits.
    pub fn cost_without_base_fee(&self) -> Option<U256> {
        U256::from(self.gas_limit())
            .checked_mul(U256::from(self.gas_price()))?
            .checked_add(self.value())
    }

    /// [`Self::cost_without_base_fee`] plus `blob_gas * max_fee_per_blob_gas`.
    pub fn max_cost(&self) -> Option<U256> {
        let blob_cost = U256::from(self.blob_gas())
            .checked_mul(self.max_fee_per_blob_gas().unwrap_or_default())?;
        self.cost_without_base_fee()?.checked_add(blob_cost)
    }

    /// Gas charged before any execution starts, `None` on overflow.
    pub fn intrinsic_gas(&self, config: &ChainConfig) -> Option<u64> {
        let is_create = self.is_contract_creation();
        let mut gas = if is_create && config.fork >= crate::types::Fork::Homestead {
            TX_CREATE_GAS_COST
        } else {
            TX_GAS_COST
        };

        let data = self.data();
        let zero_bytes = data.iter().filter(|byte| **byte == 0).count() as u64;
        let non_zero_bytes = data.len() as u64 - zero_bytes;
        let non_zero_cost = if config.is_istanbul_activated() {
            TX_DATA_NON_ZERO_GAS_EIP2028
        } else {
            TX_DATA_NON_ZERO_GAS
        };
        gas = gas.checked_add(non_zero_bytes.checked_mul(non_zero_cost)?)?;
        gas = gas.checked_add(zero_bytes.checked_mul(TX_DATA_ZERO_GAS_COST)?)?;

        if is_create && config.is_shanghai_activated() {
            let words = (data.len() as u64).div_ceil(32);
            gas = gas.checked_add(words.checked_mul(TX_INIT_CODE_WORD_GAS_COST)?)?;
        }

        for (_, keys) in self.access_list() {
            gas = gas.checked_add(TX_ACCESS_LIST_ADDRESS_GAS)?;
            gas = gas.checked_add(
                (keys.len() as u64).checked_mul(TX_ACCESS_LIST_STORAGE_KEY_GAS)?,
            )?;
        }
        Some(gas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Fork;
    use hex_literal::hex;

    fn secret_key() -> SecretKey {
        SecretKey::from_slice(&hex!(
            "4646464646464646464646464646464646464646464646464646464646464646"
        ))
        .unwrap()
    }

    #[test]
    fn eip155_example_signature() {
        // Worked example from EIP-155.
        let mut tx = Transaction::LegacyTransaction(LegacyTransaction {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas: 21000,
            to: TxKind::Call(Address::from(hex!("3535353535353535353535353535353535353535"))),
            value: U256::from(1_000_000_000_000_000_000u64),
            ..Default::default()
        });
        tx.sign(&secret_key(), Some(1));
        assert_eq!(
            tx.signing_hash(),
            H256(hex!(
                "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
            ))
        );
        let Transaction::LegacyTransaction(signed) = &tx else {
            unreachable!()
        };
        assert_eq!(signed.v, U256::from(37));
        assert_eq!(
            tx.encode_canonical_to_vec(),
            hex!("f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83")
                .to_vec()
        );
        assert_eq!(
            tx.sender().unwrap(),
            Address::from(hex!("9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f"))
        );
    }

    #[test]
    fn typed_transaction_sender_roundtrip() {
        let mut tx = Transaction::EIP1559Transaction(EIP1559Transaction {
            chain_id: 1,
            nonce: 0,
            max_priority_fee_per_gas: 1,
            max_fee_per_gas: 10,
            gas_limit: 21000,
            to: TxKind::Call(Address::repeat_byte(1)),
            value: U256::one(),
            ..Default::default()
        });
        tx.sign(&secret_key(), None);
        assert_eq!(
            tx.sender().unwrap(),
            Address::from(hex!("9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f"))
        );
        assert_eq!(tx.encode_canonical_to_vec()[0], 0x02);
    }

    #[test]
    fn effective_tip_and_price() {
        let tx = Transaction::EIP1559Transaction(EIP1559Transaction {
            max_priority_fee_per_gas: 3,
            max_fee_per_gas: 10,
            ..Default::default()
        });
        assert_eq!(tx.effective_gas_tip(Some(5)), Some(3));
        assert_eq!(tx.effective_gas_tip(Some(8)), Some(2));
        assert_eq!(tx.effective_gas_tip(Some(11)), None);
        assert_eq!(tx.effective_gas_price(Some(5)), 8);
        assert_eq!(tx.effective_gas_price(Some(9)), 10);

        let legacy = Transaction::LegacyTransaction(LegacyTransaction {
            gas_price: 7,
            ..Default::default()
        });
        assert_eq!(legacy.effective_gas_tip(Some(5)), Some(2));
        assert_eq!(legacy.effective_gas_price(Some(5)), 7);
    }

    #[test]
    fn intrinsic_gas_by_fork() {
        let tx = Transaction::EIP1559Transaction(EIP1559Transaction {
            data: Bytes::from_static(&[0, 1, 2]),
            access_list: vec![(Address::zero(), vec![H256::zero()])],
            ..Default::default()
        });
        // Contract creation with 3 bytes of init code, one word.
        let cancun = ChainConfig::new(1, Fork::Cancun);
        assert_eq!(
            tx.intrinsic_gas(&cancun),
            Some(53000 + 4 + 2 * 16 + 2 + 2400 + 1900)
        );
        let petersburg = ChainConfig::new(1, Fork::Petersburg);
        assert_eq!(
            tx.intrinsic_gas(&petersburg),
            Some(53000 + 4 + 2 * 68 + 2400 + 1900)
        );
    }
}
