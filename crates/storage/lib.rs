mod cache;
pub mod error;
pub mod fork;
pub mod rpc;
pub mod snapshot;
mod state_manager;

pub use cache::{CodeCache, StateCache};
pub use error::{ForkError, StateError};
pub use fork::{AccountProof, BlockTag, ForkCoordinator, ForkTransport};
pub use rpc::HttpForkTransport;
pub use snapshot::{AccountSnapshot, FileStatePersister, SerializableState, StatePersister};
pub use state_manager::StateManager;

