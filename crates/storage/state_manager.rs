use std::{collections::BTreeMap, sync::Arc};

use bytes::Bytes;
use tevm_common::{
    Address, H256, U256,
    constants::EMPTY_TRIE_HASH,
    rlp::RLPEncode,
    trie::compute_secure_trie_root,
    types::{AccountState, code_hash},
    utils::{h256_to_u256, u256_to_h256},
};
use tracing::{debug, trace};

use crate::{
    cache::{CodeCache, StateCache},
    error::StateError,
    fork::{BlockTag, ForkCoordinator},
    snapshot::{AccountSnapshot, SerializableState, StatePersister},
};

/// World state seen by the VM: accounts, storage and code, with nested
/// checkpoints and an optional remote fork behind the caches.
///
/// Reads are async since a cache miss may go to the fork. Writes only ever
/// touch the caches.
#[derive(Debug, Default)]
pub struct StateManager {
    cache: StateCache,
    code: CodeCache,
    fork: Option<Arc<ForkCoordinator>>,
    persister: Option<Arc<dyn StatePersister>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// State that falls back to `fork` for anything it has not seen yet.
    pub fn forked(fork: Arc<ForkCoordinator>) -> Self {
        Self {
            cache: StateCache::new(true),
            code: CodeCache::default(),
            fork: Some(fork),
            persister: None,
        }
    }

    pub fn with_persister(mut self, persister: Arc<dyn StatePersister>) -> Self {
        self.persister = Some(persister);
        self
    }

    pub fn fork(&self) -> Option<&Arc<ForkCoordinator>> {
        self.fork.as_ref()
    }

    pub fn fork_block(&self) -> Option<BlockTag> {
        self.fork.as_ref().map(|fork| fork.block())
    }

    /// Loads whatever the persister has stored. Returns whether anything was loaded.
    pub fn restore(&mut self) -> Result<bool, StateError> {
        let Some(persister) = self.persister.clone() else {
            return Ok(false);
        };
        match persister.restore()? {
            Some(state) => {
                debug!(accounts = state.len(), "Restoring persisted state");
                self.load_state(&state);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get_account(
        &mut self,
        address: Address,
    ) -> Result<Option<AccountState>, StateError> {
        if let Some(account) = self.cache.get_account(&address) {
            return Ok(account);
        }
        let Some(fork) = self.fork.clone() else {
            return Ok(None);
        };
        let account = fork.fetch_account(address).await?;
        self.cache.insert_fetched_account(address, account);
        Ok(account)
    }

    /// Missing accounts read as empty.
    pub async fn get_account_or_default(
        &mut self,
        address: Address,
    ) -> Result<AccountState, StateError> {
        Ok(self.get_account(address).await?.unwrap_or_default())
    }

    pub async fn account_exists(&mut self, address: Address) -> Result<bool, StateError> {
        Ok(self.get_account(address).await?.is_some())
    }

    /// Missing accounts count as empty.
    pub async fn account_is_empty(&mut self, address: Address) -> Result<bool, StateError> {
        Ok(self
            .get_account(address)
            .await?
            .is_none_or(|account| account.is_empty()))
    }

    pub fn put_account(&mut self, address: Address, account: AccountState) {
        trace!(%address, nonce = account.nonce, balance = %account.balance, "Writing account");
        self.cache.put_account(address, account);
    }

    /// Removes the account along with its storage and code.
    pub fn delete_account(&mut self, address: Address) {
        trace!(%address, "Deleting account");
        self.cache.delete_account(address);
        self.code.put(address, Bytes::new());
    }

    pub async fn add_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        let mut account = self.get_account_or_default(address).await?;
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or(StateError::BalanceOverflow(address))?;
        self.put_account(address, account);
        Ok(())
    }

    pub async fn sub_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        let mut account = self.get_account_or_default(address).await?;
        account.balance =
            account
                .balance
                .checked_sub(amount)
                .ok_or(StateError::InsufficientBalance {
                    address,
                    balance: account.balance,
                    required: amount,
                })?;
        self.put_account(address, account);
        Ok(())
    }

    pub async fn increment_nonce(&mut self, address: Address) -> Result<u64, StateError> {
        let mut account = self.get_account_or_default(address).await?;
        account.nonce = account
            .nonce
            .checked_add(1)
            .ok_or(StateError::NonceOverflow(address))?;
        self.put_account(address, account);
        Ok(account.nonce)
    }

    pub async fn get_storage(&mut self, address: Address, key: H256) -> Result<H256, StateError> {
        if let Some(value) = self.cache.get_storage(&address, &key) {
            return Ok(value);
        }
        let Some(fork) = self.fork.clone() else {
            return Ok(H256::zero());
        };
        let value = fork.fetch_storage(address, key).await?;
        self.cache.insert_fetched_storage(address, key, value);
        Ok(value)
    }

    /// Writing zero clears the slot.
    pub fn put_storage(&mut self, address: Address, key: H256, value: H256) {
        trace!(%address, %key, %value, "Writing storage");
        self.cache.put_storage(address, key, value);
    }

    pub fn clear_storage(&mut self, address: Address) {
        self.cache.clear_storage(address);
    }

    pub async fn get_code(&mut self, address: Address) -> Result<Bytes, StateError> {
        if let Some(code) = self.code.get(&address) {
            return Ok(code);
        }
        let Some(fork) = self.fork.clone() else {
            return Ok(Bytes::new());
        };
        if !self
            .get_account(address)
            .await?
            .is_some_and(|account| account.has_code())
        {
            return Ok(Bytes::new());
        }
        let code = fork.fetch_code(address).await?;
        self.code.insert_fetched(address, code.clone());
        Ok(code)
    }

    /// Stores `code` and points the account's code hash at it.
    pub async fn put_code(&mut self, address: Address, code: Bytes) -> Result<(), StateError> {
        let mut account = self.get_account_or_default(address).await?;
        account.code_hash = code_hash(&code);
        self.put_account(address, account);
        self.code.put(address, code);
        Ok(())
    }

    pub fn checkpoint_depth(&self) -> usize {
        self.cache.depth()
    }

    fn ensure_caches_in_sync(&self) -> Result<(), StateError> {
        let (accounts, code) = (self.cache.depth(), self.code.depth());
        if accounts != code {
            return Err(StateError::CacheDepthDesync { accounts, code });
        }
        Ok(())
    }

    pub fn checkpoint(&mut self) {
        self.cache.checkpoint();
        self.code.checkpoint();
        trace!(depth = self.checkpoint_depth(), "Checkpoint");
    }

    /// Folds the latest checkpoint into its parent. Closing the outermost one
    /// hands the resulting state to the persister.
    pub fn commit(&mut self) -> Result<(), StateError> {
        self.ensure_caches_in_sync()?;
        self.cache.commit()?;
        self.code.commit()?;
        trace!(depth = self.checkpoint_depth(), "Commit");
        if self.checkpoint_depth() == 0 {
            if let Some(persister) = &self.persister {
                persister.persist(&self.dump_state())?;
            }
        }
        Ok(())
    }

    /// Discards everything written since the latest checkpoint.
    pub fn revert(&mut self) -> Result<(), StateError> {
        self.ensure_caches_in_sync()?;
        self.cache.revert()?;
        self.code.revert()?;
        trace!(depth = self.checkpoint_depth(), "Revert");
        Ok(())
    }

    /// Non-zero storage of `address` as far as this state knows it.
    pub fn dump_storage(&self, address: &Address) -> BTreeMap<H256, U256> {
        self.cache
            .storage(address)
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, h256_to_u256(value)))
            .collect()
    }

    /// Root of the account's storage trie. Accounts whose storage was never
    /// touched locally keep the root they were loaded or fetched with.
    pub fn storage_root(&self, address: &Address, account: &AccountState) -> H256 {
        match self.cache.storage(address) {
            Some(slots) if slots.is_empty() => *EMPTY_TRIE_HASH,
            Some(slots) => compute_secure_trie_root(
                slots
                    .into_iter()
                    .map(|(key, value)| (key, h256_to_u256(value).encode_to_vec())),
            ),
            None => account.storage_root,
        }
    }

    /// Every known account with its storage root brought up to date.
    fn accounts(&self) -> BTreeMap<Address, AccountState> {
        let mut accounts = self.cache.accounts();
        for (address, account) in accounts.iter_mut() {
            account.storage_root = self.storage_root(address, account);
        }
        accounts
    }

    /// Merkle-Patricia root over the accounts this state knows about.
    pub fn state_root(&self) -> H256 {
        compute_secure_trie_root(
            self.accounts()
                .into_iter()
                .map(|(address, account)| (address, account.encode_to_vec())),
        )
    }

    pub fn dump_state(&self) -> SerializableState {
        self.accounts()
            .into_iter()
            .map(|(address, account)| {
                let deployed_bytecode = account
                    .has_code()
                    .then(|| self.code.get(&address))
                    .flatten()
                    .filter(|code| !code.is_empty());
                let snapshot = AccountSnapshot {
                    nonce: account.nonce,
                    balance: account.balance,
                    storage_root: account.storage_root,
                    code_hash: account.code_hash,
                    storage: self.dump_storage(&address),
                    deployed_bytecode,
                };
                (address, snapshot)
            })
            .collect()
    }

    /// Writes every account of `state` into the current checkpoint.
    pub fn load_state(&mut self, state: &SerializableState) {
        for (address, snapshot) in state {
            let code_hash = snapshot
                .deployed_bytecode
                .as_ref()
                .map(code_hash)
                .unwrap_or(snapshot.code_hash);
            self.put_account(
                *address,
                AccountState {
                    nonce: snapshot.nonce,
                    balance: snapshot.balance,
                    storage_root: snapshot.storage_root,
                    code_hash,
                },
            );
            if let Some(code) = &snapshot.deployed_bytecode {
                self.code.put(*address, code.clone());
            }
            for (key, value) in &snapshot.storage {
                self.put_storage(*address, *key, u256_to_h256(*value));
            }
        }
    }

    /// Copy sharing the committed layers with `self`. Open checkpoints are not
    /// carried over and both sides copy on their first write.
    pub fn shallow_copy(&self) -> Self {
        Self {
            cache: self.cache.shallow_copy(),
            code: self.code.shallow_copy(),
            fork: self.fork.clone(),
            persister: None,
        }
    }

    /// Independent copy including open checkpoints. Only the fork coordinator
    /// is shared.
    pub fn deep_copy(&self) -> Self {
        Self {
            cache: self.cache.deep_copy(),
            code: self.code.deep_copy(),
            fork: self.fork.clone(),
            persister: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        error::ForkError,
        fork::{BlockTag, test_utils::MockTransport},
    };
    use tevm_common::constants::EMPTY_KECCACK_HASH;

    fn address(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn forked(transport: MockTransport) -> (Arc<MockTransport>, StateManager) {
        let transport = Arc::new(transport);
        let fork = ForkCoordinator::new(transport.clone(), BlockTag::Number(1));
        (transport, StateManager::forked(Arc::new(fork)))
    }

    #[tokio::test]
    async fn balance_and_nonce_updates() {
        let mut state = StateManager::new();
        state.add_balance(address(1), U256::from(100)).await.unwrap();
        state.sub_balance(address(1), U256::from(30)).await.unwrap();
        assert_eq!(state.increment_nonce(address(1)).await.unwrap(), 1);
        let account = state.get_account(address(1)).await.unwrap().unwrap();
        assert_eq!(account.balance, U256::from(70));
        assert_eq!(account.nonce, 1);

        let err = state.sub_balance(address(1), U256::from(71)).await.unwrap_err();
        assert!(matches!(err, StateError::InsufficientBalance { .. }));
    }

    #[tokio::test]
    async fn code_updates_code_hash() {
        let mut state = StateManager::new();
        let code = Bytes::from_static(&[0x60, 0x01, 0x60, 0x00, 0x55]);
        state.put_code(address(1), code.clone()).await.unwrap();
        let account = state.get_account(address(1)).await.unwrap().unwrap();
        assert_eq!(account.code_hash, code_hash(&code));
        assert_eq!(state.get_code(address(1)).await.unwrap(), code);
        assert_eq!(state.get_code(address(2)).await.unwrap(), Bytes::new());
    }

    #[tokio::test]
    async fn revert_restores_previous_state() {
        let mut state = StateManager::new();
        state.put_account(address(1), AccountState::with_balance(U256::from(5)));
        let root = state.state_root();

        state.checkpoint();
        state.add_balance(address(1), U256::from(5)).await.unwrap();
        state.put_storage(address(1), H256::repeat_byte(1), H256::repeat_byte(2));
        state
            .put_code(address(1), Bytes::from_static(&[0x00]))
            .await
            .unwrap();
        assert_ne!(state.state_root(), root);
        state.revert().unwrap();

        assert_eq!(state.state_root(), root);
        assert_eq!(state.get_code(address(1)).await.unwrap(), Bytes::new());
        assert_eq!(
            state.get_storage(address(1), H256::repeat_byte(1)).await.unwrap(),
            H256::zero()
        );
        assert!(matches!(state.revert(), Err(StateError::NoCheckpoint)));
    }

    #[tokio::test]
    async fn zero_slots_are_not_dumped() {
        let mut state = StateManager::new();
        state.put_account(address(1), AccountState::default());
        state.put_storage(address(1), H256::repeat_byte(1), H256::repeat_byte(2));
        state.put_storage(address(1), H256::repeat_byte(3), H256::repeat_byte(4));
        state.checkpoint();
        state.put_storage(address(1), H256::repeat_byte(3), H256::zero());
        state.commit().unwrap();

        let storage = state.dump_storage(&address(1));
        assert_eq!(storage.len(), 1);
        assert_eq!(
            storage[&H256::repeat_byte(1)],
            h256_to_u256(H256::repeat_byte(2))
        );
    }

    #[test]
    fn empty_state_root() {
        assert_eq!(StateManager::new().state_root(), *EMPTY_TRIE_HASH);
    }

    #[tokio::test]
    async fn dump_and_load_preserve_state_root() {
        let mut state = StateManager::new();
        state.put_account(address(1), AccountState::with_balance(U256::from(1_000)));
        state.put_storage(address(1), H256::repeat_byte(1), H256::repeat_byte(2));
        state
            .put_code(address(2), Bytes::from_static(&[0x60, 0x00, 0xf3]))
            .await
            .unwrap();
        state.increment_nonce(address(2)).await.unwrap();

        // A contract with both code and storage, one slot cleared again
        let contract = address(3);
        state
            .put_code(contract, Bytes::from_static(&[0x60, 0x01, 0x55]))
            .await
            .unwrap();
        state.checkpoint();
        for slot in 1..=3u8 {
            let value = H256::from_low_u64_be(u64::from(slot));
            state.put_storage(contract, H256::repeat_byte(slot), value);
        }
        state.put_storage(contract, H256::repeat_byte(2), H256::zero());
        state.commit().unwrap();

        let dump = state.dump_state();
        assert_eq!(
            dump[&address(2)].deployed_bytecode.as_deref(),
            Some(&[0x60, 0x00, 0xf3][..])
        );
        assert_ne!(dump[&address(1)].storage_root, *EMPTY_TRIE_HASH);
        let contract_dump = &dump[&contract];
        assert_ne!(contract_dump.code_hash, *EMPTY_KECCACK_HASH);
        assert_ne!(contract_dump.storage_root, *EMPTY_TRIE_HASH);
        assert_eq!(
            contract_dump.storage.keys().copied().collect::<Vec<_>>(),
            vec![H256::repeat_byte(1), H256::repeat_byte(3)]
        );

        let mut loaded = StateManager::new();
        loaded.load_state(&dump);
        assert_eq!(loaded.state_root(), state.state_root());
        assert_eq!(loaded.dump_state(), dump);
        assert_eq!(
            loaded.get_code(address(2)).await.unwrap(),
            Bytes::from_static(&[0x60, 0x00, 0xf3])
        );
        assert_eq!(
            loaded.get_storage(contract, H256::repeat_byte(3)).await.unwrap(),
            H256::from_low_u64_be(3)
        );
        assert_eq!(
            loaded.get_storage(contract, H256::repeat_byte(2)).await.unwrap(),
            H256::zero()
        );
    }

    #[tokio::test]
    async fn state_root_ignores_write_order() {
        let mut a = StateManager::new();
        let mut b = StateManager::new();
        a.add_balance(address(1), U256::from(1)).await.unwrap();
        a.add_balance(address(2), U256::from(2)).await.unwrap();
        b.add_balance(address(2), U256::from(2)).await.unwrap();
        b.add_balance(address(1), U256::from(1)).await.unwrap();
        assert_eq!(a.state_root(), b.state_root());
    }

    #[tokio::test]
    async fn fork_reads_are_cached() {
        let (transport, mut state) = forked(
            MockTransport::default()
                .with_account(address(1), U256::from(50), 2)
                .with_storage(address(1), H256::zero(), H256::repeat_byte(9)),
        );
        let account = state.get_account(address(1)).await.unwrap().unwrap();
        assert_eq!(account.balance, U256::from(50));
        state.get_account(address(1)).await.unwrap();
        assert_eq!(
            state.get_storage(address(1), H256::zero()).await.unwrap(),
            H256::repeat_byte(9)
        );
        state.get_storage(address(1), H256::zero()).await.unwrap();
        assert_eq!(transport.calls(), 2);
        assert_eq!(state.fork_block(), Some(BlockTag::Number(1)));
    }

    #[tokio::test]
    async fn local_writes_shadow_fork() {
        let (transport, mut state) = forked(
            MockTransport::default()
                .with_account(address(1), U256::from(50), 0)
                .with_storage(address(1), H256::zero(), H256::repeat_byte(9)),
        );
        state.checkpoint();
        state.put_storage(address(1), H256::zero(), H256::zero());
        state.delete_account(address(1));
        state.commit().unwrap();

        assert_eq!(state.get_account(address(1)).await.unwrap(), None);
        assert_eq!(
            state.get_storage(address(1), H256::zero()).await.unwrap(),
            H256::zero()
        );
        assert_eq!(state.get_code(address(1)).await.unwrap(), Bytes::new());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn fork_errors_are_reported_and_not_cached() {
        let (transport, mut state) = forked(MockTransport {
            failing: true,
            ..Default::default()
        });
        let err = state.get_account(address(1)).await.unwrap_err();
        assert!(matches!(err, StateError::Fork(ForkError::Transport(_))));
        assert!(state.get_account(address(1)).await.is_err());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn copies_are_isolated() {
        let mut state = StateManager::new();
        state.put_account(address(1), AccountState::with_balance(U256::from(1)));
        state.checkpoint();
        state.put_account(address(2), AccountState::with_balance(U256::from(2)));

        let mut shallow = state.shallow_copy();
        assert_eq!(shallow.checkpoint_depth(), 0);
        assert!(shallow.get_account(address(2)).await.unwrap().is_none());
        shallow.add_balance(address(1), U256::from(10)).await.unwrap();

        let mut deep = state.deep_copy();
        assert_eq!(deep.checkpoint_depth(), 1);
        deep.revert().unwrap();
        assert!(deep.get_account(address(2)).await.unwrap().is_none());

        assert_eq!(
            state.get_account(address(1)).await.unwrap().unwrap().balance,
            U256::from(1)
        );
        assert!(state.get_account(address(2)).await.unwrap().is_some());
    }

    #[derive(Debug, Default)]
    struct RecordingPersister {
        persisted: Mutex<Vec<SerializableState>>,
    }

    impl StatePersister for RecordingPersister {
        fn persist(&self, state: &SerializableState) -> Result<(), StateError> {
            self.persisted.lock().unwrap().push(state.clone());
            Ok(())
        }

        fn restore(&self) -> Result<Option<SerializableState>, StateError> {
            Ok(self.persisted.lock().unwrap().last().cloned())
        }
    }

    #[tokio::test]
    async fn outermost_commit_is_persisted() {
        let persister = Arc::new(RecordingPersister::default());
        let mut state = StateManager::new().with_persister(persister.clone());
        state.checkpoint();
        state.checkpoint();
        state.add_balance(address(1), U256::from(3)).await.unwrap();
        state.commit().unwrap();
        assert!(persister.persisted.lock().unwrap().is_empty());
        state.commit().unwrap();
        assert_eq!(persister.persisted.lock().unwrap().len(), 1);

        let mut restored = StateManager::new().with_persister(persister);
        assert!(restored.restore().unwrap());
        let account = restored.get_account(address(1)).await.unwrap().unwrap();
        assert_eq!(account.balance, U256::from(3));
        assert_eq!(account.code_hash, *EMPTY_KECCACK_HASH);
    }
}
