//! The context handed to providers.

use std::fmt;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::codec::{self, CodecError, DeserializeOptions, SerializeOptions};
use crate::scope::ScopeRef;
use crate::state::{PendingDeletion, StateError, StateRecord, StateStore};
use crate::value::Value;

/// What the provider is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
  Create,
  Update,
  Delete,
}

impl Event {
  pub fn as_str(self) -> &'static str {
    match self {
      Event::Create => "create",
      Event::Update => "update",
      Event::Delete => "delete",
    }
  }
}

impl fmt::Display for Event {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum ContextError {
  #[error(transparent)]
  Codec(#[from] CodecError),

  #[error(transparent)]
  State(#[from] StateError),
}

/// Persists the record after every scratch-data mutation.
pub(crate) struct Journal {
  pub store: Arc<dyn StateStore>,
  pub serialize: SerializeOptions,
}

pub(crate) struct ContextInit {
  pub stage: String,
  pub id: String,
  pub fqn: String,
  pub event: Event,
  pub output: Value,
  pub record: StateRecord,
  pub journal: Option<Journal>,
  pub deserialize: DeserializeOptions,
}

struct ContextInner {
  stage: String,
  id: String,
  fqn: String,
  event: Event,
  output: Value,
  record: AsyncMutex<StateRecord>,
  journal: Option<Journal>,
  deserialize: DeserializeOptions,
  replaced: Mutex<Option<PendingDeletion>>,
}

/// Per-invocation view of one resource.
///
/// Scratch data written with [`Context::set`] is persisted before the call
/// returns, so it survives a provider failing halfway.
#[derive(Clone)]
pub struct Context {
  inner: Arc<ContextInner>,
}

impl Context {
  pub(crate) fn new(init: ContextInit) -> Self {
    Self {
      inner: Arc::new(ContextInner {
        stage: init.stage,
        id: init.id,
        fqn: init.fqn,
        event: init.event,
        output: init.output,
        record: AsyncMutex::new(init.record),
        journal: init.journal,
        deserialize: init.deserialize,
        replaced: Mutex::new(None),
      }),
    }
  }

  /// A context not backed by any store, for exercising providers directly.
  pub fn detached(stage: impl Into<String>, id: impl Into<String>, event: Event) -> Self {
    let id = id.into();
    Self::new(ContextInit {
      stage: stage.into(),
      fqn: id.clone(),
      id,
      event,
      output: Value::Null,
      record: StateRecord::new("detached", 0),
      journal: None,
      deserialize: DeserializeOptions::default(),
    })
  }

  pub fn stage(&self) -> &str {
    &self.inner.stage
  }

  pub fn id(&self) -> &str {
    &self.inner.id
  }

  pub fn fqn(&self) -> &str {
    &self.inner.fqn
  }

  pub fn event(&self) -> Event {
    self.inner.event
  }

  /// Output of the previous successful apply; `Null` on create.
  pub fn output(&self) -> &Value {
    &self.inner.output
  }

  /// Scope the resource belongs to, if it is still alive.
  pub fn scope(&self) -> Option<ScopeRef> {
    self.inner.deserialize.scope.clone()
  }

  /// Read a scratch-data entry.
  pub async fn get(&self, key: &str) -> Result<Option<Value>, ContextError> {
    let record = self.inner.record.lock().await;
    match record.data.get(key) {
      Some(json) => Ok(Some(codec::deserialize(json, &self.inner.deserialize)?)),
      None => Ok(None),
    }
  }

  /// Write a scratch-data entry and persist it.
  pub async fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), ContextError> {
    let value = value.into();
    let mut record = self.inner.record.lock().await;
    let json = match &self.inner.journal {
      Some(journal) => codec::serialize(&value, &journal.serialize)?,
      None => codec::serialize(&value, &SerializeOptions::default())?,
    };
    record.data.insert(key.to_string(), json);
    self.persist(&record).await
  }

  /// Remove a scratch-data entry and persist the change.
  pub async fn delete(&self, key: &str) -> Result<(), ContextError> {
    let mut record = self.inner.record.lock().await;
    if record.data.remove(key).is_some() {
      self.persist(&record).await?;
    }
    Ok(())
  }

  async fn persist(&self, record: &StateRecord) -> Result<(), ContextError> {
    if let Some(journal) = &self.inner.journal {
      journal.store.set(&self.inner.id, record).await?;
      debug!(fqn = %self.inner.fqn, "scratch data persisted");
    }
    Ok(())
  }

  /// Mark the existing external resource as replaced.
  ///
  /// The predecessor (its scratch data, previous inputs and previous output)
  /// is deleted once the rest of the scope has been applied. Only the first
  /// call counts.
  pub async fn replace(&self) {
    let record = self.inner.record.lock().await;
    let mut replaced = self.inner.replaced.lock().unwrap_or_else(|e| e.into_inner());
    if replaced.is_some() {
      warn!(fqn = %self.inner.fqn, "resource is already being replaced");
      return;
    }
    *replaced = Some(PendingDeletion {
      data: record.data.clone(),
      inputs: record.old_inputs.clone(),
      output: record.output.clone(),
    });
    debug!(fqn = %self.inner.fqn, "replacement requested");
  }

  pub fn is_replaced(&self) -> bool {
    self.inner.replaced.lock().unwrap_or_else(|e| e.into_inner()).is_some()
  }

  /// Record as left by the provider, plus the replaced predecessor if any.
  pub(crate) async fn finish(&self) -> (StateRecord, Option<PendingDeletion>) {
    let record = self.inner.record.lock().await.clone();
    let replaced = self.inner.replaced.lock().unwrap_or_else(|e| e.into_inner()).take();
    (record, replaced)
  }
}

impl fmt::Debug for Context {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Context")
      .field("fqn", &self.inner.fqn)
      .field("event", &self.inner.event)
      .field("stage", &self.inner.stage)
      .finish()
  }
}
