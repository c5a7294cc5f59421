//! State persistence for cairn.
//!
//! Every scope is bound to one [`StateStore`] holding a [`StateRecord`] per
//! resource id. The engine only talks to the trait; backends decide where
//! records live.
//!
//! # Contract
//!
//! - `init()` and `deinit()` are idempotent
//! - `get()` of an unknown id is `Ok(None)`, `delete()` of an unknown id is `Ok(())`
//! - ids may contain `/` and must round-trip through `list()`
//! - every other I/O failure is an error
//!
//! # Submodules
//!
//! - [`fs`] - one JSON file per resource, directory per scope
//! - [`memory`] - in-process maps for tests and ephemeral runs

pub mod fs;
pub mod memory;
mod types;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

pub use fs::FileSystemStateStore;
pub use memory::{MemoryStateBackend, MemoryStateStore};
pub use types::*;

/// Persistence contract every state backend satisfies.
#[async_trait]
pub trait StateStore: Send + Sync + Debug {
  /// Prepare the backend (create directories, tables, ...).
  async fn init(&self) -> Result<(), StateError>;

  /// Release the backend once it holds nothing (e.g. remove an empty directory).
  async fn deinit(&self) -> Result<(), StateError>;

  async fn get(&self, id: &str) -> Result<Option<StateRecord>, StateError>;

  async fn set(&self, id: &str, record: &StateRecord) -> Result<(), StateError>;

  async fn delete(&self, id: &str) -> Result<(), StateError>;

  /// Ids of every record, sorted.
  async fn list(&self) -> Result<Vec<String>, StateError>;

  async fn all(&self) -> Result<BTreeMap<String, StateRecord>, StateError> {
    let mut records = BTreeMap::new();
    for id in self.list().await? {
      if let Some(record) = self.get(&id).await? {
        records.insert(id, record);
      }
    }
    Ok(records)
  }

  async fn count(&self) -> Result<usize, StateError> {
    Ok(self.list().await?.len())
  }
}

/// Builds the store for a scope from its location.
pub type StateStoreFactory = Arc<dyn Fn(&StoreLocation) -> Arc<dyn StateStore> + Send + Sync>;
