//! Layered in-memory caches.
//!
//! Every cache is a committed base layer plus a stack of checkpoint frames.
//! Writes always land in the top frame, reads walk the frames top-down and end
//! at the base. The base is reference counted so a shallow copy can share it;
//! it is copied on first write.

use std::{
    collections::{BTreeMap, btree_map::Entry},
    sync::Arc,
};

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tevm_common::{Address, H256, types::AccountState};

use crate::error::StateError;

#[derive(Debug, Clone)]
struct Layers<F> {
    base: Arc<F>,
    frames: Vec<F>,
}

impl<F: Default + Clone> Default for Layers<F> {
    fn default() -> Self {
        Self {
            base: Arc::default(),
            frames: Vec::new(),
        }
    }
}

impl<F: Default + Clone> Layers<F> {
    fn depth(&self) -> usize {
        self.frames.len()
    }

    fn checkpoint(&mut self) {
        self.frames.push(F::default());
    }

    fn top_mut(&mut self) -> &mut F {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => Arc::make_mut(&mut self.base),
        }
    }

    fn base_mut(&mut self) -> &mut F {
        Arc::make_mut(&mut self.base)
    }

    /// Frames from the most recent checkpoint down to the base.
    fn top_down(&self) -> impl Iterator<Item = &F> {
        self.frames.iter().rev().chain(std::iter::once(self.base.as_ref()))
    }

    /// Frames from the base up to the most recent checkpoint.
    fn bottom_up(&self) -> impl Iterator<Item = &F> {
        std::iter::once(self.base.as_ref()).chain(self.frames.iter())
    }

    /// Pops the top frame. The returned flag is true when the frame below is
    /// the base layer.
    fn pop(&mut self) -> Result<(F, bool), StateError> {
        let frame = self.frames.pop().ok_or(StateError::NoCheckpoint)?;
        Ok((frame, self.frames.is_empty()))
    }

    fn shallow_copy(&self) -> Self {
        Self {
            base: Arc::clone(&self.base),
            frames: Vec::new(),
        }
    }

    fn deep_copy(&self) -> Self {
        Self {
            base: Arc::new(self.base.as_ref().clone()),
            frames: self.frames.clone(),
        }
    }
}

/// Storage writes of one account within one frame.
#[derive(Debug, Clone, Default)]
struct StorageFrame {
    /// Every slot written before this frame is gone (account deleted or storage cleared).
    wiped: bool,
    /// A zero value marks a cleared slot; it shadows lower frames but is never
    /// reported as stored.
    slots: FxHashMap<H256, H256>,
}

#[derive(Debug, Clone, Default)]
struct StateFrame {
    /// `None` is a tombstone, distinct from a missing entry.
    accounts: FxHashMap<Address, Option<AccountState>>,
    storage: FxHashMap<Address, StorageFrame>,
}

/// Account and storage cache with checkpoint/commit/revert.
#[derive(Debug, Clone, Default)]
pub struct StateCache {
    layers: Layers<StateFrame>,
    /// Keep tombstones and cleared slots in the base layer so they keep
    /// shadowing a remote fork.
    retain_cleared: bool,
}

impl StateCache {
    pub fn new(retain_cleared: bool) -> Self {
        Self {
            layers: Layers::default(),
            retain_cleared,
        }
    }

    pub fn depth(&self) -> usize {
        self.layers.depth()
    }

    /// `Some(None)` when the account is known to not exist, `None` when no
    /// layer knows anything about it.
    pub fn get_account(&self, address: &Address) -> Option<Option<AccountState>> {
        self.layers
            .top_down()
            .find_map(|frame| frame.accounts.get(address).copied())
    }

    pub fn put_account(&mut self, address: Address, account: AccountState) {
        self.layers.top_mut().accounts.insert(address, Some(account));
    }

    /// Writes a tombstone for the account and wipes its storage.
    pub fn delete_account(&mut self, address: Address) {
        let top = self.layers.top_mut();
        top.accounts.insert(address, None);
        top.storage.insert(
            address,
            StorageFrame {
                wiped: true,
                slots: FxHashMap::default(),
            },
        );
    }

    /// `None` when no layer knows the slot.
    pub fn get_storage(&self, address: &Address, key: &H256) -> Option<H256> {
        for frame in self.layers.top_down() {
            if let Some(storage) = frame.storage.get(address) {
                if let Some(value) = storage.slots.get(key) {
                    return Some(*value);
                }
                if storage.wiped {
                    return Some(H256::zero());
                }
            }
            // A tombstone without a storage entry still hides everything below it.
            if let Some(None) = frame.accounts.get(address) {
                return Some(H256::zero());
            }
        }
        None
    }

    /// A zero value clears the slot.
    pub fn put_storage(&mut self, address: Address, key: H256, value: H256) {
        let retain_cleared = self.retain_cleared;
        let at_base = self.layers.depth() == 0;
        let slots = &mut self.layers.top_mut().storage.entry(address).or_default().slots;
        if value.is_zero() && at_base && !retain_cleared {
            slots.remove(&key);
        } else {
            slots.insert(key, value);
        }
    }

    pub fn clear_storage(&mut self, address: Address) {
        self.layers.top_mut().storage.insert(
            address,
            StorageFrame {
                wiped: true,
                slots: FxHashMap::default(),
            },
        );
    }

    /// Records an account read from a fork. Goes to the base layer, it is
    /// remote truth and survives reverts.
    pub fn insert_fetched_account(&mut self, address: Address, account: Option<AccountState>) {
        self.layers
            .base_mut()
            .accounts
            .entry(address)
            .or_insert(account);
    }

    pub fn insert_fetched_storage(&mut self, address: Address, key: H256, value: H256) {
        self.layers
            .base_mut()
            .storage
            .entry(address)
            .or_default()
            .slots
            .entry(key)
            .or_insert(value);
    }

    pub fn checkpoint(&mut self) {
        self.layers.checkpoint();
    }

    /// Merges the top frame into the one below it.
    pub fn commit(&mut self) -> Result<(), StateError> {
        let (frame, into_base) = self.layers.pop()?;
        let prune = into_base && !self.retain_cleared;
        let below = self.layers.top_mut();

        for (address, account) in frame.accounts {
            if account.is_none() && prune {
                below.accounts.remove(&address);
            } else {
                below.accounts.insert(address, account);
            }
        }
        for (address, storage) in frame.storage {
            let target = below.storage.entry(address).or_default();
            if storage.wiped {
                target.slots.clear();
                target.wiped = !prune;
            }
            for (key, value) in storage.slots {
                if value.is_zero() && prune {
                    target.slots.remove(&key);
                } else {
                    target.slots.insert(key, value);
                }
            }
            if prune && target.slots.is_empty() && !target.wiped {
                below.storage.remove(&address);
            }
        }
        Ok(())
    }

    /// Drops every write made since the last checkpoint.
    pub fn revert(&mut self) -> Result<(), StateError> {
        self.layers.pop().map(|_| ())
    }

    /// Effective view of every account known to the cache.
    pub fn accounts(&self) -> BTreeMap<Address, AccountState> {
        let mut accounts = BTreeMap::new();
        for frame in self.layers.bottom_up() {
            for (address, account) in &frame.accounts {
                match account {
                    Some(account) => {
                        accounts.insert(*address, *account);
                    }
                    None => {
                        accounts.remove(address);
                    }
                }
            }
        }
        accounts
    }

    /// Effective non-zero storage of an account, `None` when no layer ever
    /// touched its storage.
    pub fn storage(&self, address: &Address) -> Option<BTreeMap<H256, H256>> {
        let mut touched = false;
        let mut slots = BTreeMap::new();
        for frame in self.layers.bottom_up() {
            if let Some(None) = frame.accounts.get(address) {
                touched = true;
                slots.clear();
            }
            let Some(storage) = frame.storage.get(address) else {
                continue;
            };
            touched = true;
            if storage.wiped {
                slots.clear();
            }
            for (key, value) in &storage.slots {
                match slots.entry(*key) {
                    Entry::Occupied(mut entry) if !value.is_zero() => {
                        entry.insert(*value);
                    }
                    Entry::Occupied(entry) => {
                        entry.remove();
                    }
                    Entry::Vacant(entry) if !value.is_zero() => {
                        entry.insert(*value);
                    }
                    Entry::Vacant(_) => {}
                }
            }
        }
        touched.then_some(slots)
    }

    pub fn shallow_copy(&self) -> Self {
        Self {
            layers: self.layers.shallow_copy(),
            retain_cleared: self.retain_cleared,
        }
    }

    pub fn deep_copy(&self) -> Self {
        Self {
            layers: self.layers.deep_copy(),
            retain_cleared: self.retain_cleared,
        }
    }
}

/// Contract code by address, checkpointed together with [`StateCache`].
/// An empty entry shadows code of a deleted account.
#[derive(Debug, Clone, Default)]
pub struct CodeCache {
    layers: Layers<FxHashMap<Address, Bytes>>,
}

impl CodeCache {
    pub fn depth(&self) -> usize {
        self.layers.depth()
    }

    pub fn get(&self, address: &Address) -> Option<Bytes> {
        self.layers
            .top_down()
            .find_map(|frame| frame.get(address).cloned())
    }

    pub fn put(&mut self, address: Address, code: Bytes) {
        self.layers.top_mut().insert(address, code);
    }

    pub fn insert_fetched(&mut self, address: Address, code: Bytes) {
        self.layers.base_mut().entry(address).or_insert(code);
    }

    pub fn checkpoint(&mut self) {
        self.layers.checkpoint();
    }

    pub fn commit(&mut self) -> Result<(), StateError> {
        let (frame, _) = self.layers.pop()?;
        self.layers.top_mut().extend(frame);
        Ok(())
    }

    pub fn revert(&mut self) -> Result<(), StateError> {
        self.layers.pop().map(|_| ())
    }

    pub fn shallow_copy(&self) -> Self {
        Self {
            layers: self.layers.shallow_copy(),
        }
    }

    pub fn deep_copy(&self) -> Self {
        Self {
            layers: self.layers.deep_copy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tevm_common::U256;

    fn account(balance: u64) -> AccountState {
        AccountState::with_balance(U256::from(balance))
    }

    fn slot(n: u8) -> H256 {
        H256::repeat_byte(n)
    }

    #[test]
    fn revert_discards_writes() {
        let mut cache = StateCache::default();
        let address = Address::repeat_byte(1);
        cache.put_account(address, account(10));
        cache.checkpoint();
        cache.put_account(address, account(20));
        cache.put_storage(address, slot(1), slot(2));
        assert_eq!(cache.get_account(&address), Some(Some(account(20))));
        cache.revert().unwrap();
        assert_eq!(cache.get_account(&address), Some(Some(account(10))));
        assert_eq!(cache.get_storage(&address, &slot(1)), None);
        assert_eq!(cache.depth(), 0);
    }

    #[test]
    fn nested_commit_then_revert() {
        let mut cache = StateCache::default();
        let address = Address::repeat_byte(1);
        cache.checkpoint();
        cache.put_account(address, account(1));
        cache.checkpoint();
        cache.put_account(address, account(2));
        cache.commit().unwrap();
        // The inner write now belongs to the outer frame, and goes with it.
        assert_eq!(cache.get_account(&address), Some(Some(account(2))));
        cache.revert().unwrap();
        assert_eq!(cache.get_account(&address), None);
    }

    #[test]
    fn committed_writes_match_sequential_application() {
        let mut cache = StateCache::default();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        cache.checkpoint();
        cache.put_account(a, account(1));
        cache.checkpoint();
        cache.put_account(b, account(5));
        cache.revert().unwrap();
        cache.checkpoint();
        cache.put_account(a, account(3));
        cache.commit().unwrap();
        cache.commit().unwrap();
        let accounts = cache.accounts();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[&a], account(3));
    }

    #[test]
    fn tombstone_shadows_lower_layers() {
        let mut cache = StateCache::default();
        let address = Address::repeat_byte(1);
        cache.put_account(address, account(10));
        cache.put_storage(address, slot(1), slot(9));
        cache.checkpoint();
        cache.delete_account(address);
        assert_eq!(cache.get_account(&address), Some(None));
        assert_eq!(cache.get_storage(&address, &slot(1)), Some(H256::zero()));
        assert!(cache.accounts().is_empty());
        cache.commit().unwrap();
        // Without a fork there is nothing left to shadow.
        assert_eq!(cache.get_account(&address), None);
        assert_eq!(cache.storage(&address), None);
    }

    #[test]
    fn fork_backed_base_keeps_tombstones() {
        let mut cache = StateCache::new(true);
        let address = Address::repeat_byte(1);
        cache.insert_fetched_account(address, Some(account(10)));
        cache.insert_fetched_storage(address, slot(1), slot(3));
        cache.checkpoint();
        cache.delete_account(address);
        cache.commit().unwrap();
        assert_eq!(cache.get_account(&address), Some(None));
        assert_eq!(cache.get_storage(&address, &slot(1)), Some(H256::zero()));
    }

    #[test]
    fn zero_value_clears_slot() {
        let mut cache = StateCache::default();
        let address = Address::repeat_byte(1);
        cache.put_storage(address, slot(1), slot(7));
        cache.checkpoint();
        cache.put_storage(address, slot(1), H256::zero());
        assert_eq!(cache.get_storage(&address, &slot(1)), Some(H256::zero()));
        assert_eq!(cache.storage(&address), Some(BTreeMap::new()));
        cache.commit().unwrap();
        assert_eq!(cache.get_storage(&address, &slot(1)), None);
        assert_eq!(cache.storage(&address), None);

        cache.put_storage(address, slot(2), H256::zero());
        assert_eq!(cache.get_storage(&address, &slot(2)), None);
    }

    #[test]
    fn commit_without_checkpoint_fails() {
        let mut cache = StateCache::default();
        assert!(matches!(cache.commit(), Err(StateError::NoCheckpoint)));
        assert!(matches!(cache.revert(), Err(StateError::NoCheckpoint)));
        let mut code = CodeCache::default();
        assert!(matches!(code.commit(), Err(StateError::NoCheckpoint)));
    }

    #[test]
    fn shallow_copy_is_copy_on_write() {
        let mut cache = StateCache::default();
        let address = Address::repeat_byte(1);
        cache.put_account(address, account(1));
        cache.checkpoint();
        cache.put_account(address, account(2));

        let mut copy = cache.shallow_copy();
        assert_eq!(copy.depth(), 0);
        assert_eq!(copy.get_account(&address), Some(Some(account(1))));
        copy.put_account(address, account(3));
        assert_eq!(cache.get_account(&address), Some(Some(account(2))));
        cache.revert().unwrap();
        assert_eq!(cache.get_account(&address), Some(Some(account(1))));
    }

    #[test]
    fn code_cache_follows_checkpoints() {
        let mut code = CodeCache::default();
        let address = Address::repeat_byte(1);
        code.checkpoint();
        code.put(address, Bytes::from_static(&[0x60, 0x00]));
        code.commit().unwrap();
        assert_eq!(code.get(&address), Some(Bytes::from_static(&[0x60, 0x00])));
        code.checkpoint();
        code.put(address, Bytes::new());
        code.revert().unwrap();
        assert_eq!(code.get(&address), Some(Bytes::from_static(&[0x60, 0x00])));
    }
}
