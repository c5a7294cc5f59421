//! In-memory state backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use super::{StateError, StateRecord, StateStore, StateStoreFactory, StoreLocation};

/// Keeps records in a map. Lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
  records: RwLock<BTreeMap<String, StateRecord>>,
}

impl MemoryStateStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl StateStore for MemoryStateStore {
  async fn init(&self) -> Result<(), StateError> {
    Ok(())
  }

  async fn deinit(&self) -> Result<(), StateError> {
    Ok(())
  }

  async fn get(&self, id: &str) -> Result<Option<StateRecord>, StateError> {
    let records = self.records.read().unwrap_or_else(|e| e.into_inner());
    Ok(records.get(id).cloned())
  }

  async fn set(&self, id: &str, record: &StateRecord) -> Result<(), StateError> {
    let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
    records.insert(id.to_string(), record.clone());
    Ok(())
  }

  async fn delete(&self, id: &str) -> Result<(), StateError> {
    let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
    records.remove(id);
    Ok(())
  }

  async fn list(&self) -> Result<Vec<String>, StateError> {
    let records = self.records.read().unwrap_or_else(|e| e.into_inner());
    Ok(records.keys().cloned().collect())
  }
}

/// Hands out one [`MemoryStateStore`] per location, so state survives across
/// runs that share the backend.
#[derive(Debug, Default, Clone)]
pub struct MemoryStateBackend {
  stores: Arc<Mutex<HashMap<StoreLocation, Arc<MemoryStateStore>>>>,
}

impl MemoryStateBackend {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn store_for(&self, location: &StoreLocation) -> Arc<MemoryStateStore> {
    let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
    Arc::clone(stores.entry(location.clone()).or_default())
  }

  pub fn factory(&self) -> StateStoreFactory {
    let backend = self.clone();
    Arc::new(move |location: &StoreLocation| backend.store_for(location) as Arc<dyn StateStore>)
  }

  /// Locations that currently hold at least one record.
  pub fn locations(&self) -> Vec<StoreLocation> {
    let stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
    let mut locations: Vec<_> = stores
      .iter()
      .filter(|(_, store)| !store.records.read().unwrap_or_else(|e| e.into_inner()).is_empty())
      .map(|(location, _)| location.clone())
      .collect();
    locations.sort_by_key(|l| l.relative_dir());
    locations
  }
}
