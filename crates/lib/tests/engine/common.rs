//! Shared harness: a memory state backend plus recording providers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cairn_lib::resource::{BoxError, Context, Event, ProviderRegistry};
use cairn_lib::scope::{Phase, RootOptions, Scope};
use cairn_lib::state::{MemoryStateBackend, StateStoreFactory};
use cairn_lib::value::Value;

pub const WORK_FACTOR: u8 = 10;

#[derive(Debug, Clone)]
pub struct Call {
  pub kind: String,
  pub fqn: String,
  pub event: Event,
  pub inputs: Value,
  pub previous: Value,
}

#[derive(Clone, Default)]
pub struct Harness {
  pub backend: MemoryStateBackend,
  calls: Arc<Mutex<Vec<Call>>>,
  fail: Arc<AtomicBool>,
}

impl Harness {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make `test::flaky` fail until switched off again.
  pub fn set_failing(&self, failing: bool) {
    self.fail.store(failing, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }

  pub fn clear(&self) {
    self.calls.lock().unwrap().clear();
  }

  /// `(fqn, event)` in call order.
  pub fn events(&self) -> Vec<(String, Event)> {
    self.calls().into_iter().map(|c| (c.fqn, c.event)).collect()
  }

  pub fn options(&self, phase: Phase) -> RootOptions {
    self.options_with(phase, self.backend.factory())
  }

  pub fn options_with(&self, phase: Phase, store: StateStoreFactory) -> RootOptions {
    RootOptions::new("app")
      .with_stage("test")
      .with_phase(phase)
      .with_work_factor(WORK_FACTOR)
      .with_state_store(store)
      .with_providers(self.providers())
  }

  pub fn root(&self, phase: Phase) -> Arc<Scope> {
    Scope::root(self.options(phase))
  }

  fn record(&self, kind: &str, ctx: &Context, inputs: &Value) {
    self.calls.lock().unwrap().push(Call {
      kind: kind.to_string(),
      fqn: ctx.fqn().to_string(),
      event: ctx.event(),
      inputs: inputs.clone(),
      previous: ctx.output().clone(),
    });
  }

  /// Fresh registry wired to this harness:
  ///
  /// - `test::echo` returns its inputs
  /// - `test::counter` counts applies in scratch data
  /// - `test::flaky` writes scratch data, then fails while the harness says so
  /// - `test::slow` sleeps `ms` milliseconds before echoing
  /// - `test::replace` replaces itself whenever `name` changes
  pub fn providers(&self) -> Arc<ProviderRegistry> {
    let registry = ProviderRegistry::new();

    let h = self.clone();
    registry
      .register_fn("test::echo", move |ctx: Context, inputs: Value| {
        let h = h.clone();
        async move {
          h.record("test::echo", &ctx, &inputs);
          Ok::<_, BoxError>(inputs)
        }
      })
      .unwrap();

    let h = self.clone();
    registry
      .register_fn("test::counter", move |ctx: Context, inputs: Value| {
        let h = h.clone();
        async move {
          h.record("test::counter", &ctx, &inputs);
          if ctx.event() == Event::Delete {
            return Ok::<_, BoxError>(Value::Null);
          }
          let generation = ctx.get("generation").await?.and_then(|v| v.as_i64()).unwrap_or(0) + 1;
          ctx.set("generation", generation).await?;
          Ok::<_, BoxError>(Value::object([("generation", generation)]))
        }
      })
      .unwrap();

    let h = self.clone();
    registry
      .register_fn("test::flaky", move |ctx: Context, inputs: Value| {
        let h = h.clone();
        async move {
          h.record("test::flaky", &ctx, &inputs);
          if ctx.event() != Event::Delete {
            ctx.set("attempted", true).await?;
          }
          if h.fail.load(Ordering::SeqCst) {
            return Err::<Value, BoxError>("flaky provider failed".into());
          }
          Ok(inputs)
        }
      })
      .unwrap();

    let h = self.clone();
    registry
      .register_fn("test::slow", move |ctx: Context, inputs: Value| {
        let h = h.clone();
        async move {
          let ms = inputs.project("ms").as_i64().unwrap_or(0) as u64;
          tokio::time::sleep(Duration::from_millis(ms)).await;
          h.record("test::slow", &ctx, &inputs);
          Ok::<_, BoxError>(inputs)
        }
      })
      .unwrap();

    let h = self.clone();
    registry
      .register_fn("test::replace", move |ctx: Context, inputs: Value| {
        let h = h.clone();
        async move {
          h.record("test::replace", &ctx, &inputs);
          if ctx.event() == Event::Update && ctx.output().project("name") != inputs.project("name") {
            ctx.replace().await;
          }
          Ok::<_, BoxError>(inputs)
        }
      })
      .unwrap();

    Arc::new(registry)
  }
}
