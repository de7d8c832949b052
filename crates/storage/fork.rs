//! Read-through access to a remote chain.
//!
//! A [`ForkTransport`] answers raw JSON-RPC style queries pinned at a block.
//! The [`ForkCoordinator`] sits in front of it and collapses concurrent
//! requests for the same key into a single remote fetch.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    hash::Hash,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use serde::{Deserialize, Serialize};
use tevm_common::{
    Address, H256, U256,
    constants::{EMPTY_KECCACK_HASH, EMPTY_TRIE_HASH},
    types::{AccountState, code_hash},
};
use tracing::{debug, trace};

use crate::error::ForkError;

/// Block a fork reads its state at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockTag {
    #[default]
    Latest,
    Earliest,
    Pending,
    Number(u64),
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTag::Latest => f.write_str("latest"),
            BlockTag::Earliest => f.write_str("earliest"),
            BlockTag::Pending => f.write_str("pending"),
            BlockTag::Number(number) => write!(f, "{number:#x}"),
        }
    }
}

/// Account fields returned by `eth_getProof`. Merkle proofs themselves are
/// not verified and not kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProof {
    pub address: Address,
    pub balance: U256,
    #[serde(with = "tevm_common::serde_utils::u64::hex_str")]
    pub nonce: u64,
    pub code_hash: H256,
    pub storage_hash: H256,
}

impl AccountProof {
    /// Providers answer with an all-empty proof for accounts that do not exist.
    pub fn into_account(self) -> Option<AccountState> {
        let code_hash = if self.code_hash.is_zero() {
            *EMPTY_KECCACK_HASH
        } else {
            self.code_hash
        };
        let storage_root = if self.storage_hash.is_zero() {
            *EMPTY_TRIE_HASH
        } else {
            self.storage_hash
        };
        let account = AccountState {
            nonce: self.nonce,
            balance: self.balance,
            storage_root,
            code_hash,
        };
        let absent = account.is_empty() && storage_root == *EMPTY_TRIE_HASH;
        (!absent).then_some(account)
    }
}

#[async_trait]
pub trait ForkTransport: fmt::Debug + Send + Sync {
    async fn get_balance(&self, address: Address, block: BlockTag) -> Result<U256, ForkError>;

    async fn get_transaction_count(
        &self,
        address: Address,
        block: BlockTag,
    ) -> Result<u64, ForkError>;

    async fn get_code(&self, address: Address, block: BlockTag) -> Result<Bytes, ForkError>;

    async fn get_storage_at(
        &self,
        address: Address,
        slot: H256,
        block: BlockTag,
    ) -> Result<H256, ForkError>;

    async fn get_proof(
        &self,
        address: Address,
        slots: &[H256],
        block: BlockTag,
    ) -> Result<AccountProof, ForkError>;
}

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, ForkError>>>;

/// Fetches currently in flight, keyed by what they fetch.
struct InFlight<K, T> {
    fetches: Mutex<HashMap<K, SharedFetch<T>>>,
}

impl<K, T> Default for InFlight<K, T> {
    fn default() -> Self {
        Self {
            fetches: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T> InFlight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    /// Joins the fetch for `key` if one is running, otherwise starts it.
    ///
    /// The shared future stays in the map until it completes, so a waiter that
    /// is dropped halfway does not cancel the fetch for anyone else.
    async fn join<F>(&self, key: K, fetch: impl FnOnce() -> F) -> Result<T, ForkError>
    where
        F: Future<Output = Result<T, ForkError>> + Send + 'static,
    {
        let shared = {
            let mut fetches = self.fetches.lock().map_err(|_| ForkError::LockPoisoned)?;
            fetches
                .entry(key.clone())
                .or_insert_with(|| fetch().boxed().shared())
                .clone()
        };
        let result = shared.clone().await;
        // Failures are not remembered; the next caller tries again.
        if let Ok(mut fetches) = self.fetches.lock() {
            if fetches
                .get(&key)
                .is_some_and(|current| current.ptr_eq(&shared))
            {
                fetches.remove(&key);
            }
        }
        result
    }

    fn len(&self) -> usize {
        self.fetches.lock().map(|fetches| fetches.len()).unwrap_or(0)
    }
}

/// Remote reads shared by every state manager forked from the same chain.
pub struct ForkCoordinator {
    transport: Arc<dyn ForkTransport>,
    block: BlockTag,
    accounts: InFlight<Address, Option<AccountState>>,
    code: InFlight<Address, Bytes>,
    storage: InFlight<(Address, H256), H256>,
}

impl fmt::Debug for ForkCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForkCoordinator")
            .field("transport", &self.transport)
            .field("block", &self.block)
            .finish_non_exhaustive()
    }
}

impl ForkCoordinator {
    pub fn new(transport: Arc<dyn ForkTransport>, block: BlockTag) -> Self {
        Self {
            transport,
            block,
            accounts: InFlight::default(),
            code: InFlight::default(),
            storage: InFlight::default(),
        }
    }

    pub fn block(&self) -> BlockTag {
        self.block
    }

    pub async fn fetch_account(&self, address: Address) -> Result<Option<AccountState>, ForkError> {
        let transport = Arc::clone(&self.transport);
        let block = self.block;
        self.accounts
            .join(address, move || async move {
                trace!(%address, %block, "Fetching account from fork");
                match transport.get_proof(address, &[], block).await {
                    Ok(proof) => Ok(proof.into_account()),
                    Err(err) if err.is_method_not_found() => {
                        debug!(%address, "Fork does not serve eth_getProof, querying fields one by one");
                        fetch_account_fields(transport.as_ref(), address, block).await
                    }
                    Err(err) => Err(err),
                }
            })
            .await
    }

    pub async fn fetch_code(&self, address: Address) -> Result<Bytes, ForkError> {
        let transport = Arc::clone(&self.transport);
        let block = self.block;
        self.code
            .join(address, move || async move {
                trace!(%address, %block, "Fetching code from fork");
                transport.get_code(address, block).await
            })
            .await
    }

    pub async fn fetch_storage(&self, address: Address, slot: H256) -> Result<H256, ForkError> {
        let transport = Arc::clone(&self.transport);
        let block = self.block;
        self.storage
            .join((address, slot), move || async move {
                trace!(%address, %slot, %block, "Fetching storage slot from fork");
                transport.get_storage_at(address, slot, block).await
            })
            .await
    }

    /// Number of fetches currently in flight.
    pub fn pending_fetches(&self) -> usize {
        self.accounts.len() + self.code.len() + self.storage.len()
    }
}

/// Fallback for providers without `eth_getProof`. The storage root is unknown
/// this way, so storage is read slot by slot.
async fn fetch_account_fields(
    transport: &dyn ForkTransport,
    address: Address,
    block: BlockTag,
) -> Result<Option<AccountState>, ForkError> {
    let balance = transport.get_balance(address, block).await?;
    let nonce = transport.get_transaction_count(address, block).await?;
    let code = transport.get_code(address, block).await?;
    let account = AccountState {
        nonce,
        balance,
        storage_root: *EMPTY_TRIE_HASH,
        code_hash: code_hash(&code),
    };
    Ok((!account.is_empty()).then_some(account))
}
