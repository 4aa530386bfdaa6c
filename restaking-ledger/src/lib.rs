//! Restaking Ledger
//!
//! Keyed state store and per-asset balances shared by the delegation and
//! operator-AVS modules.
//!
//! # Architecture
//!
//! - **Injected store**: every operation receives a `&mut dyn KvStore`
//! - **Namespaced keys**: one prefix byte per entity type, length-prefixed segments
//! - **Signed deltas**: balances are never overwritten, only adjusted
//! - **Cache overlay**: writes are buffered and committed only on success
//!
//! # Invariants
//!
//! - Non-negativity: every stored balance is ≥ 0 after any update
//! - Deterministic replay: same operations → same store bytes
//! - Atomicity: a failed operation leaves no partial writes behind

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod assets;
pub mod config;
pub mod error;
pub mod keys;
pub mod numeric;
pub mod rocks;
pub mod store;
pub mod types;

// Re-exports
pub use assets::{AssetLedger, OperatorAssetDelta, OperatorAssetState, StakerAssetDelta, StakerAssetState};
pub use config::{StoreBackend, StoreConfig};
pub use error::{Error, Result};
pub use keys::{Namespace, StoreKey};
pub use rocks::RocksStore;
pub use store::{state_digest, CacheStore, KvStore, KvStoreExt, MemoryStore};
pub use types::{Amount, AssetId, OperatorAddress, StakerId};
