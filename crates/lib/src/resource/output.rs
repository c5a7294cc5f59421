//! Output handles.
//!
//! An [`Output`] is created pending when a resource is declared and settles
//! exactly once, either with the provider's output or with an error. Anything
//! built from a handle (projections via [`Output::get`], [`Output::apply`])
//! is itself a handle that settles when its source does.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::scope::ScopeRef;
use crate::value::Value;

/// Errors carried by a failed [`Output`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OutputError {
  /// `provide` or `fail` was called on a handle that already settled.
  #[error("output {0} was already settled")]
  AlreadySettled(String),

  /// The resource's reconciliation failed.
  #[error("{fqn} failed: {message}")]
  Failed { fqn: String, message: String },

  /// The task responsible for settling the handle went away.
  #[error("output {0} was dropped before it resolved")]
  Dropped(String),
}

/// Identity of the resource an [`Output`] belongs to.
#[derive(Debug, Clone)]
pub struct ResourceMeta {
  pub id: String,
  pub fqn: String,
  pub kind: String,
  pub seq: u64,
  /// Inputs as declared, handles included.
  pub inputs: Value,
  pub scope: Option<ScopeRef>,
}

impl ResourceMeta {
  pub fn new(id: impl Into<String>, fqn: impl Into<String>, kind: impl Into<String>, seq: u64) -> Self {
    Self {
      id: id.into(),
      fqn: fqn.into(),
      kind: kind.into(),
      seq,
      inputs: Value::Null,
      scope: None,
    }
  }

  pub fn with_inputs(mut self, inputs: Value) -> Self {
    self.inputs = inputs;
    self
  }

  pub fn with_scope(mut self, scope: ScopeRef) -> Self {
    self.scope = Some(scope);
    self
  }
}

type Subscriber = Box<dyn FnOnce(Result<&Value, &OutputError>) + Send>;

enum OutputState {
  Pending(Vec<Subscriber>),
  Resolved(Value),
  Failed(OutputError),
}

struct OutputInner {
  meta: Option<Arc<ResourceMeta>>,
  /// Fully-qualified name of the resource a derived handle was built from.
  origin: Option<String>,
  label: String,
  state: Mutex<OutputState>,
}

/// Lazily-resolved value of a declared resource.
///
/// Cloning is cheap and every clone observes the same resolution.
#[derive(Clone)]
pub struct Output {
  inner: Arc<OutputInner>,
}

impl Output {
  fn with_state(meta: Option<Arc<ResourceMeta>>, label: String, state: OutputState) -> Self {
    let origin = meta.as_ref().map(|m| m.fqn.clone());
    Self {
      inner: Arc::new(OutputInner {
        meta,
        origin,
        label,
        state: Mutex::new(state),
      }),
    }
  }

  /// A pending handle without resource identity.
  pub fn pending(label: impl Into<String>) -> Self {
    Self::with_state(None, label.into(), OutputState::Pending(Vec::new()))
  }

  fn derived(&self, label: String) -> Self {
    Self {
      inner: Arc::new(OutputInner {
        meta: None,
        origin: self.inner.origin.clone(),
        label,
        state: Mutex::new(OutputState::Pending(Vec::new())),
      }),
    }
  }

  /// A pending handle for a freshly declared resource.
  pub fn for_resource(meta: ResourceMeta) -> Self {
    let label = meta.fqn.clone();
    Self::with_state(Some(Arc::new(meta)), label, OutputState::Pending(Vec::new()))
  }

  /// A resource handle that is already resolved, e.g. one read back from state.
  pub fn new_resolved(meta: ResourceMeta, value: Value) -> Self {
    let label = meta.fqn.clone();
    Self::with_state(Some(Arc::new(meta)), label, OutputState::Resolved(value))
  }

  /// An anonymous handle that is already resolved.
  pub fn ready(value: impl Into<Value>) -> Self {
    Self::with_state(None, "value".to_string(), OutputState::Resolved(value.into()))
  }

  pub fn meta(&self) -> Option<&ResourceMeta> {
    self.inner.meta.as_deref()
  }

  pub fn id(&self) -> Option<&str> {
    self.meta().map(|m| m.id.as_str())
  }

  pub fn fqn(&self) -> Option<&str> {
    self.meta().map(|m| m.fqn.as_str())
  }

  /// Provider kind that owns the resource.
  pub fn kind(&self) -> Option<&str> {
    self.meta().map(|m| m.kind.as_str())
  }

  pub fn seq(&self) -> Option<u64> {
    self.meta().map(|m| m.seq)
  }

  /// Raw declared inputs.
  pub fn inputs(&self) -> Option<&Value> {
    self.meta().map(|m| &m.inputs)
  }

  /// Fully-qualified name of the resource this handle is, or was derived from.
  pub fn origin(&self) -> Option<&str> {
    self.inner.origin.as_deref()
  }

  /// Human-readable name used in logs and errors.
  pub fn label(&self) -> &str {
    &self.inner.label
  }

  pub fn ptr_eq(&self, other: &Output) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, OutputState> {
    self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Current resolution, or `None` while pending.
  pub fn try_value(&self) -> Option<Result<Value, OutputError>> {
    match &*self.lock() {
      OutputState::Pending(_) => None,
      OutputState::Resolved(value) => Some(Ok(value.clone())),
      OutputState::Failed(err) => Some(Err(err.clone())),
    }
  }

  pub fn is_pending(&self) -> bool {
    matches!(&*self.lock(), OutputState::Pending(_))
  }

  /// Resolve the handle. Subscribers run in registration order, after the
  /// lock is released.
  pub fn provide(&self, value: impl Into<Value>) -> Result<(), OutputError> {
    let value = value.into();
    let subscribers = self.settle(OutputState::Resolved(value.clone()))?;
    for subscriber in subscribers {
      subscriber(Ok(&value));
    }
    Ok(())
  }

  /// Fail the handle. Every waiter observes `error`.
  pub fn fail(&self, error: OutputError) -> Result<(), OutputError> {
    let subscribers = self.settle(OutputState::Failed(error.clone()))?;
    for subscriber in subscribers {
      subscriber(Err(&error));
    }
    Ok(())
  }

  fn settle(&self, next: OutputState) -> Result<Vec<Subscriber>, OutputError> {
    let mut state = self.lock();
    match &mut *state {
      OutputState::Pending(subscribers) => {
        let subscribers = std::mem::take(subscribers);
        *state = next;
        Ok(subscribers)
      }
      _ => Err(OutputError::AlreadySettled(self.label().to_string())),
    }
  }

  /// Run `f` once the handle settles, immediately if it already has.
  pub fn on_resolve<F>(&self, f: F)
  where
    F: FnOnce(Result<&Value, &OutputError>) + Send + 'static,
  {
    let settled = {
      let mut state = self.lock();
      match &mut *state {
        OutputState::Pending(subscribers) => {
          subscribers.push(Box::new(f));
          return;
        }
        OutputState::Resolved(value) => Ok(value.clone()),
        OutputState::Failed(err) => Err(err.clone()),
      }
    };
    match settled {
      Ok(value) => f(Ok(&value)),
      Err(err) => f(Err(&err)),
    }
  }

  /// Derived handle holding the field at dotted `path` of this one's value.
  pub fn get(&self, path: &str) -> Output {
    let path = path.to_string();
    let derived = self.derived(format!("{}.{}", self.label(), path));
    let target = derived.clone();
    self.on_resolve(move |result| {
      // A fresh derived handle is only settled here.
      let _ = match result {
        Ok(value) => target.provide(value.project(&path)),
        Err(err) => target.fail(err.clone()),
      };
    });
    derived
  }

  /// Derived handle holding `f` applied to this one's value.
  pub fn apply<F>(&self, f: F) -> Output
  where
    F: FnOnce(&Value) -> Value + Send + 'static,
  {
    let derived = self.derived(format!("{}.apply", self.label()));
    let target = derived.clone();
    self.on_resolve(move |result| {
      let _ = match result {
        Ok(value) => target.provide(f(value)),
        Err(err) => target.fail(err.clone()),
      };
    });
    derived
  }

  /// Handle resolving to the array of every input's value, failing with the
  /// first failure.
  pub fn all(outputs: Vec<Output>) -> Output {
    let combined = Output::pending("all");
    if outputs.is_empty() {
      let _ = combined.provide(Value::Array(Vec::new()));
      return combined;
    }

    let slots = Arc::new(Mutex::new((vec![None; outputs.len()], outputs.len())));
    for (index, output) in outputs.iter().enumerate() {
      let slots = Arc::clone(&slots);
      let target = combined.clone();
      output.on_resolve(move |result| match result {
        Ok(value) => {
          let mut guard = slots.lock().unwrap_or_else(|e| e.into_inner());
          let (values, remaining) = &mut *guard;
          values[index] = Some(value.clone());
          *remaining -= 1;
          if *remaining == 0 {
            let values = values.iter_mut().map(|v| v.take().unwrap_or_default()).collect();
            drop(guard);
            let _ = target.provide(Value::Array(values));
          }
        }
        Err(err) => {
          let _ = target.fail(err.clone());
        }
      });
    }
    combined
  }

  /// Wait until the handle settles.
  pub async fn resolved(&self) -> Result<Value, OutputError> {
    if let Some(result) = self.try_value() {
      return result;
    }
    let (tx, rx) = oneshot::channel();
    self.on_resolve(move |result| {
      let _ = tx.send(result.cloned().map_err(Clone::clone));
    });
    rx.await
      .unwrap_or_else(|_| Err(OutputError::Dropped(self.label().to_string())))
  }

  /// Guard that fails this handle with [`OutputError::Dropped`] if it is
  /// still pending when the guard goes out of scope.
  pub fn drop_guard(&self) -> SettleGuard {
    SettleGuard { output: self.clone() }
  }
}

impl IntoFuture for Output {
  type Output = Result<Value, OutputError>;
  type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

  fn into_future(self) -> Self::IntoFuture {
    Box::pin(async move { self.resolved().await })
  }
}

impl fmt::Debug for Output {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = match &*self.lock() {
      OutputState::Pending(_) => "pending",
      OutputState::Resolved(_) => "resolved",
      OutputState::Failed(_) => "failed",
    };
    write!(f, "Output({}, {})", self.label(), state)
  }
}

/// See [`Output::drop_guard`].
pub struct SettleGuard {
  output: Output,
}

impl Drop for SettleGuard {
  fn drop(&mut self) {
    if self.output.is_pending() {
      let _ = self.output.fail(OutputError::Dropped(self.output.label().to_string()));
    }
  }
}
