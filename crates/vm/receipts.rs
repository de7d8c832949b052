use tevm_common::{
    H256,
    types::{ChainConfig, Receipt, ReceiptOutcome, Transaction, TxType},
};

use crate::interpreter::ExecResult;

/// Builds the receipt of an executed transaction.
///
/// Before Byzantium legacy receipts commit to the intermediate state root
/// instead of a status flag, which the caller provides through `state_root`.
/// Typed transactions always carry a status.
pub fn generate_tx_receipt(
    tx: &Transaction,
    result: &ExecResult,
    cumulative_gas_used: u64,
    blob_gas_used: Option<u64>,
    blob_gas_price: Option<u64>,
    config: &ChainConfig,
    state_root: Option<H256>,
) -> Receipt {
    let outcome = if tx.tx_type() == TxType::Legacy && !config.is_byzantium_activated() {
        ReceiptOutcome::StateRoot(state_root.unwrap_or_default())
    } else {
        ReceiptOutcome::Status(result.is_success())
    };
    let mut receipt = Receipt::new(
        tx.tx_type(),
        outcome,
        cumulative_gas_used,
        result.logs.clone(),
    );
    if matches!(tx, Transaction::EIP4844Transaction(_)) {
        receipt.blob_gas_used = blob_gas_used;
        receipt.blob_gas_price = blob_gas_price;
    }
    receipt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExceptionError;
    use tevm_common::{
        Address, Bytes,
        types::{EIP1559Transaction, EIP4844Transaction, Fork, LegacyTransaction, Log},
    };

    fn legacy() -> Transaction {
        Transaction::LegacyTransaction(LegacyTransaction::default())
    }

    #[test]
    fn status_follows_exception() {
        let config = ChainConfig::new(1, Fork::London);
        let ok = generate_tx_receipt(
            &legacy(),
            &ExecResult::default(),
            21000,
            None,
            None,
            &config,
            None,
        );
        assert_eq!(ok.status(), Some(true));
        let failed = ExecResult {
            exception_error: Some(ExceptionError::Revert),
            ..Default::default()
        };
        let receipt = generate_tx_receipt(&legacy(), &failed, 42000, None, None, &config, None);
        assert_eq!(receipt.status(), Some(false));
        assert_eq!(receipt.cumulative_gas_used, 42000);
    }

    #[test]
    fn pre_byzantium_uses_state_root() {
        let config = ChainConfig::new(1, Fork::SpuriousDragon);
        let root = H256::repeat_byte(7);
        let receipt = generate_tx_receipt(
            &legacy(),
            &ExecResult::default(),
            21000,
            None,
            None,
            &config,
            Some(root),
        );
        assert_eq!(receipt.state_root(), Some(root));
        assert_eq!(receipt.status(), None);
    }

    #[test]
    fn typed_transactions_carry_status_before_byzantium() {
        let config = ChainConfig::new(1, Fork::SpuriousDragon);
        let typed = Transaction::EIP1559Transaction(EIP1559Transaction::default());
        let receipt = generate_tx_receipt(
            &typed,
            &ExecResult::default(),
            21000,
            None,
            None,
            &config,
            Some(H256::repeat_byte(7)),
        );
        assert_eq!(receipt.state_root(), None);
        assert_eq!(receipt.status(), Some(true));
    }

    #[test]
    fn blob_fields_only_for_blob_transactions() {
        let config = ChainConfig::new(1, Fork::Cancun);
        let blob_tx = Transaction::EIP4844Transaction(EIP4844Transaction::default());
        let receipt = generate_tx_receipt(
            &blob_tx,
            &ExecResult::default(),
            21000,
            Some(131072),
            Some(1),
            &config,
            None,
        );
        assert_eq!(receipt.blob_gas_used, Some(131072));
        assert_eq!(receipt.blob_gas_price, Some(1));

        let receipt = generate_tx_receipt(
            &legacy(),
            &ExecResult::default(),
            21000,
            Some(1),
            Some(1),
            &config,
            None,
        );
        assert_eq!(receipt.blob_gas_used, None);
    }

    #[test]
    fn bloom_covers_logs() {
        let config = ChainConfig::new(1, Fork::Cancun);
        let log = Log {
            address: Address::repeat_byte(0x42),
            topics: vec![H256::repeat_byte(1)],
            data: Bytes::new(),
        };
        let result = ExecResult {
            logs: vec![log.clone()],
            ..Default::default()
        };
        let receipt = generate_tx_receipt(&legacy(), &result, 21000, None, None, &config, None);
        assert!(
            receipt
                .bloom
                .contains_input(tevm_common::BloomInput::Raw(log.address.as_bytes()))
        );
        assert_eq!(receipt.logs, vec![log]);
    }
}
