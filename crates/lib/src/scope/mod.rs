//! Scopes: the tree of execution contexts resources are declared in.
//!
//! A root scope owns the provider and secret registries and the sequence
//! counter shared by the whole tree. Every scope binds one state store and
//! keeps a registry of the resources and nested scopes touched by the current
//! run; whatever its store holds beyond that is an orphan and gets deleted
//! when the scope finalizes cleanly.
//!
//! # Run lifecycle
//!
//! 1. initialize the store (and record nested scopes in their parent's store)
//! 2. run the body with the scope as the ambient current scope
//! 3. wait for every reconciliation task started in the scope
//! 4. on success finalize: process pending deletions, then sweep orphans
//!    (phase `up`), or tear everything down (phase `destroy`, root only)

mod context;
mod options;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::codec::{DeserializeOptions, Passphrase, SecretMode, SerializeOptions, Transform};
use crate::consts::SCOPE_KIND;
use crate::execute::{self, DestroyError, DestroyTarget};
use crate::resource::{BoxError, Output, ProviderRegistry, ResourceError};
use crate::state::{StateError, StateRecord, StateStore, StateStoreFactory, Status, StoreLocation};
use crate::util::lock;
use crate::value::{Secret, SecretError, SecretRegistry};

pub use context::{current, enter};
pub use options::*;

#[derive(Debug, Error)]
pub enum ScopeError {
  /// `run` was called outside of any scope.
  #[error("no active scope: nested scopes must run inside a root scope")]
  NoActiveScope,

  #[error("scope '{0}' already ran in this parent")]
  DuplicateScope(String),

  #[error(transparent)]
  Resource(#[from] ResourceError),

  #[error("scope {scope} failed: {source}")]
  Body {
    scope: String,
    #[source]
    source: BoxError,
  },

  #[error("{} resource(s) failed in scope {scope}: {}", .failures.len(), .failures.join("; "))]
  ResourceFailed { scope: String, failures: Vec<String> },

  #[error(transparent)]
  State(#[from] StateError),

  #[error(transparent)]
  Destroy(#[from] DestroyError),
}

/// Weak back-reference to a [`Scope`], as held by values and handles.
#[derive(Clone)]
pub struct ScopeRef(Weak<Scope>);

impl ScopeRef {
  pub fn upgrade(&self) -> Option<Arc<Scope>> {
    self.0.upgrade()
  }

  pub fn ptr_eq(&self, other: &ScopeRef) -> bool {
    self.0.ptr_eq(&other.0)
  }
}

impl fmt::Debug for ScopeRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.upgrade() {
      Some(scope) => write!(f, "ScopeRef({})", scope.path()),
      None => write!(f, "ScopeRef(<dropped>)"),
    }
  }
}

/// State shared by every scope of one tree.
struct Shared {
  providers: Arc<ProviderRegistry>,
  secrets: Arc<SecretRegistry>,
  seq: AtomicU64,
  phase: Phase,
  work_factor: Option<u8>,
  transform: Option<Transform>,
  store_factory: StateStoreFactory,
}

pub struct Scope {
  name: Option<String>,
  parent: Option<Weak<Scope>>,
  shared: Arc<Shared>,
  stage: String,
  location: StoreLocation,
  passphrase: Option<Passphrase>,
  destroy_strategy: DestroyStrategy,
  quiet: bool,
  /// Creation sequence number of this scope within its parent.
  seq: u64,
  store: Arc<dyn StateStore>,
  resources: Mutex<BTreeMap<String, Output>>,
  children: Mutex<BTreeMap<String, Arc<Scope>>>,
  tasks: Mutex<Vec<JoinHandle<()>>>,
  errored: AtomicBool,
  failures: Mutex<Vec<String>>,
  self_ref: Weak<Scope>,
}

impl Scope {
  /// Create a root scope.
  pub fn root(options: RootOptions) -> Arc<Scope> {
    let location = StoreLocation::new(options.app.clone(), options.stage.clone(), Vec::new());
    let store = (options.state_store)(&location);
    let shared = Arc::new(Shared {
      providers: options.providers,
      secrets: options.secrets,
      seq: AtomicU64::new(0),
      phase: options.phase,
      work_factor: options.work_factor,
      transform: options.transform,
      store_factory: options.state_store,
    });

    Arc::new_cyclic(|self_ref| Scope {
      name: options.app,
      parent: None,
      shared,
      stage: options.stage,
      location,
      passphrase: options.passphrase,
      destroy_strategy: options.destroy_strategy,
      quiet: options.quiet,
      seq: 0,
      store,
      resources: Mutex::new(BTreeMap::new()),
      children: Mutex::new(BTreeMap::new()),
      tasks: Mutex::new(Vec::new()),
      errored: AtomicBool::new(false),
      failures: Mutex::new(Vec::new()),
      self_ref: self_ref.clone(),
    })
  }

  fn nested(self: &Arc<Self>, name: &str, options: ScopeOptions, seq: u64) -> Arc<Scope> {
    let location = self.location.child(name);
    let store = (self.shared.store_factory)(&location);
    Arc::new_cyclic(|self_ref| Scope {
      name: Some(name.to_string()),
      parent: Some(Arc::downgrade(self)),
      shared: Arc::clone(&self.shared),
      stage: options.stage.unwrap_or_else(|| self.stage.clone()),
      location,
      passphrase: options.passphrase.or_else(|| self.passphrase.clone()),
      destroy_strategy: options.destroy_strategy.unwrap_or(self.destroy_strategy),
      quiet: options.quiet.unwrap_or(self.quiet),
      seq,
      store,
      resources: Mutex::new(BTreeMap::new()),
      children: Mutex::new(BTreeMap::new()),
      tasks: Mutex::new(Vec::new()),
      errored: AtomicBool::new(false),
      failures: Mutex::new(Vec::new()),
      self_ref: self_ref.clone(),
    })
  }

  /// Open a nested scope called `name` and register it with this one.
  pub fn child(self: &Arc<Self>, name: &str, options: ScopeOptions) -> Result<Arc<Scope>, ScopeError> {
    // Same lock order as `declare`: resources, then children.
    let resources = lock(&self.resources);
    if resources.contains_key(name) {
      return Err(ResourceError::IdConflict {
        scope: self.path(),
        id: name.to_string(),
      }
      .into());
    }

    let mut children = lock(&self.children);
    if children.contains_key(name) {
      return Err(ScopeError::DuplicateScope(self.fqn(name)));
    }
    let child = self.nested(name, options, self.next_seq());
    children.insert(name.to_string(), Arc::clone(&child));
    Ok(child)
  }

  /// A handle on the nested scope `name` as recorded in this scope's store,
  /// without registering it as touched.
  pub(crate) fn detached_child(self: &Arc<Self>, name: &str) -> Arc<Scope> {
    self.nested(name, ScopeOptions::default(), 0)
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  pub fn parent(&self) -> Option<Arc<Scope>> {
    self.parent.as_ref().and_then(Weak::upgrade)
  }

  pub fn stage(&self) -> &str {
    &self.stage
  }

  pub fn phase(&self) -> Phase {
    self.shared.phase
  }

  pub fn location(&self) -> &StoreLocation {
    &self.location
  }

  pub fn store(&self) -> &Arc<dyn StateStore> {
    &self.store
  }

  pub fn providers(&self) -> &Arc<ProviderRegistry> {
    &self.shared.providers
  }

  pub fn secrets(&self) -> &Arc<SecretRegistry> {
    &self.shared.secrets
  }

  pub fn destroy_strategy(&self) -> DestroyStrategy {
    self.destroy_strategy
  }

  pub fn is_quiet(&self) -> bool {
    self.quiet
  }

  pub fn scope_ref(&self) -> ScopeRef {
    ScopeRef(self.self_ref.clone())
  }

  /// Scope chain joined with `/`: root name, stage, nested scope names.
  pub fn path(&self) -> String {
    let mut segments: Vec<&str> = Vec::new();
    if let Some(root) = &self.location.root {
      segments.push(root);
    }
    segments.push(&self.location.stage);
    segments.extend(self.location.scopes.iter().map(String::as_str));
    segments.join("/")
  }

  /// Fully-qualified name of `id` declared in this scope.
  pub fn fqn(&self, id: &str) -> String {
    format!("{}/{}", self.path(), id)
  }

  /// Next creation sequence number of the tree; the root itself is 0.
  pub(crate) fn next_seq(&self) -> u64 {
    self.shared.seq.fetch_add(1, Ordering::SeqCst) + 1
  }

  /// Register a secret with the tree's registry.
  pub fn secret(&self, name: impl Into<String>, plaintext: impl Into<String>) -> Result<Secret, SecretError> {
    let secret = Secret::new(name, plaintext);
    self.shared.secrets.register(secret.clone())?;
    Ok(secret)
  }

  /// Options for persisting values of this scope.
  pub fn serialize_options(&self) -> SerializeOptions {
    SerializeOptions {
      passphrase: self.passphrase.clone(),
      secrets: SecretMode::Encrypt,
      work_factor: self.shared.work_factor,
    }
  }

  /// Options for reading back values of this scope.
  pub fn deserialize_options(&self) -> DeserializeOptions {
    DeserializeOptions {
      passphrase: self.passphrase.clone(),
      scope: Some(self.scope_ref()),
      transform: self.shared.transform.clone(),
    }
  }

  /// Live handle declared under `id` in this run.
  pub fn resource(&self, id: &str) -> Option<Output> {
    lock(&self.resources).get(id).cloned()
  }

  /// Ids of every resource declared in this run.
  pub fn resource_ids(&self) -> Vec<String> {
    lock(&self.resources).keys().cloned().collect()
  }

  pub(crate) fn resources(&self) -> &Mutex<BTreeMap<String, Output>> {
    &self.resources
  }

  pub(crate) fn children(&self) -> &Mutex<BTreeMap<String, Arc<Scope>>> {
    &self.children
  }

  pub(crate) fn track(&self, task: JoinHandle<()>) {
    lock(&self.tasks).push(task);
  }

  pub fn is_errored(&self) -> bool {
    self.errored.load(Ordering::SeqCst)
  }

  pub(crate) fn mark_errored(&self) {
    self.errored.store(true, Ordering::SeqCst);
  }

  /// Record a failed resource and mark the scope errored.
  pub(crate) fn record_failure(&self, message: String) {
    lock(&self.failures).push(message);
    self.mark_errored();
  }

  /// Run `body` in this scope, then wait for its resources and finalize.
  pub async fn run<F, Fut, T>(self: &Arc<Self>, body: F) -> Result<T, ScopeError>
  where
    F: FnOnce(Arc<Scope>) -> Fut,
    Fut: Future<Output = Result<T, BoxError>>,
  {
    self.store.init().await?;
    self.record_in_parent(Status::Creating).await?;
    info!(scope = %self.path(), phase = %self.phase(), "entering scope");

    let result = enter(Arc::clone(self), body(Arc::clone(self))).await;
    self.join_tasks().await;

    let outcome = match result {
      Err(source) => {
        self.mark_errored();
        Err(ScopeError::Body {
          scope: self.path(),
          source,
        })
      }
      Ok(_) if self.is_errored() => Err(ScopeError::ResourceFailed {
        scope: self.path(),
        failures: lock(&self.failures).clone(),
      }),
      Ok(value) => Ok(value),
    };

    match outcome {
      Ok(value) => {
        self.finalize().await?;
        self.record_in_parent(Status::Created).await?;
        info!(scope = %self.path(), "scope finished");
        Ok(value)
      }
      Err(err) => {
        if let Some(parent) = self.parent() {
          parent.mark_errored();
        }
        error!(scope = %self.path(), error = %err, "scope failed, skipping orphan cleanup");
        Err(err)
      }
    }
  }

  /// Persist this nested scope as a resource of its parent.
  async fn record_in_parent(&self, status: Status) -> Result<(), StateError> {
    let (Some(parent), Some(name)) = (self.parent(), self.name()) else {
      return Ok(());
    };
    if self.phase() != Phase::Up {
      return Ok(());
    }
    let mut record = parent.store.get(name).await?.unwrap_or_else(|| StateRecord::new(SCOPE_KIND, self.seq));
    record.status = status;
    record.seq = self.seq;
    parent.store.set(name, &record).await
  }

  async fn join_tasks(&self) {
    loop {
      let tasks = std::mem::take(&mut *lock(&self.tasks));
      if tasks.is_empty() {
        break;
      }
      for task in tasks {
        if let Err(err) = task.await {
          self.record_failure(format!("reconciliation task aborted: {err}"));
        }
      }
    }
  }

  async fn finalize(self: &Arc<Self>) -> Result<(), ScopeError> {
    match self.phase() {
      Phase::Up => {
        self.process_pending_deletions().await?;
        self.sweep_orphans().await?;
      }
      Phase::Read => {}
      Phase::Destroy if self.parent.is_none() => {
        info!(scope = %self.path(), "tearing down");
        self.teardown().await?;
      }
      // Nested scopes are torn down by the root, in creation order of the whole tree.
      Phase::Destroy => {}
    }
    Ok(())
  }

  async fn process_pending_deletions(self: &Arc<Self>) -> Result<(), ScopeError> {
    for (id, record) in self.store.all().await? {
      if record.pending_deletions.is_empty() || record.provider == SCOPE_KIND {
        continue;
      }
      execute::delete_pending(self, &id, record).await?;
    }
    Ok(())
  }

  async fn sweep_orphans(self: &Arc<Self>) -> Result<(), ScopeError> {
    let mut touched: BTreeSet<String> = lock(&self.resources).keys().cloned().collect();
    touched.extend(lock(&self.children).keys().cloned());

    let mut orphans = Vec::new();
    for (id, record) in self.store.all().await? {
      if !touched.contains(&id) {
        orphans.push(DestroyTarget::from_record(self, &id, &record));
      }
    }

    if orphans.is_empty() {
      debug!(scope = %self.path(), "no orphans");
      return Ok(());
    }
    info!(scope = %self.path(), count = orphans.len(), "deleting orphaned resources");
    execute::destroy_all(self, orphans, self.destroy_strategy).await?;
    Ok(())
  }

  /// Delete every recorded resource, newest first, then release the store.
  pub fn teardown(self: &Arc<Self>) -> Pin<Box<dyn Future<Output = Result<(), DestroyError>> + Send + 'static>> {
    let scope = Arc::clone(self);
    Box::pin(async move {
      let records = scope.store.all().await.map_err(|source| DestroyError::State {
        fqn: scope.path(),
        source,
      })?;
      let targets = records
        .iter()
        .map(|(id, record)| DestroyTarget::from_record(&scope, id, record))
        .collect();
      execute::destroy_all(&scope, targets, scope.destroy_strategy).await?;
      scope.store.deinit().await.map_err(|source| DestroyError::State {
        fqn: scope.path(),
        source,
      })?;
      debug!(scope = %scope.path(), "scope torn down");
      Ok(())
    })
  }
}

impl fmt::Debug for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Scope")
      .field("path", &self.path())
      .field("phase", &self.shared.phase)
      .field("errored", &self.is_errored())
      .finish_non_exhaustive()
  }
}

/// Run `body` in a nested scope of the current scope.
pub async fn run<F, Fut, T>(name: &str, options: ScopeOptions, body: F) -> Result<T, ScopeError>
where
  F: FnOnce(Arc<Scope>) -> Fut,
  Fut: Future<Output = Result<T, BoxError>>,
{
  let parent = current().ok_or(ScopeError::NoActiveScope)?;
  if parent.is_errored() {
    warn!(scope = %parent.path(), child = %name, "opening a nested scope in an errored scope");
  }
  parent.child(name, options)?.run(body).await
}
