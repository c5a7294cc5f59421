//! Create, update, skip and resume behaviour.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;

use cairn_lib::resource::{Event, ResourceOptions};
use cairn_lib::scope::{Phase, ScopeError};
use cairn_lib::state::Status;
use cairn_lib::value::{Schema, Value};
use cairn_lib::{declare, declare_with};

use super::common::Harness;

#[tokio::test]
async fn reapplying_unchanged_inputs_skips_the_provider() {
  let harness = Harness::new();

  for _ in 0..2 {
    let output = harness
      .root(Phase::Up)
      .run(|_| async {
        let site = declare("test::echo", "site", json!({"name": "docs", "ports": [80, 443]}))?;
        Ok(site.await?)
      })
      .await
      .unwrap();
    assert_eq!(output.project("name"), Value::from("docs"));
  }

  assert_eq!(harness.events(), vec![("app/test/site".to_string(), Event::Create)]);
}

#[tokio::test]
async fn key_order_does_not_count_as_a_change() {
  let harness = Harness::new();

  harness
    .root(Phase::Up)
    .run(|_| async {
      declare("test::echo", "site", json!({"a": 1, "b": {"c": 2, "d": 3}}))?.await?;
      Ok(())
    })
    .await
    .unwrap();
  harness
    .root(Phase::Up)
    .run(|_| async {
      let inputs = Value::object([("b", Value::object([("d", 3), ("c", 2)])), ("a", Value::from(1))]);
      declare("test::echo", "site", inputs)?.await?;
      Ok(())
    })
    .await
    .unwrap();

  assert_eq!(harness.calls().len(), 1);
}

#[derive(Debug)]
struct PortSchema;

impl Schema for PortSchema {
  fn to_schema(&self) -> serde_json::Value {
    json!({"type": "integer", "minimum": 1, "maximum": 65535})
  }
}

#[tokio::test]
async fn tagged_inputs_are_unchanged_after_a_reload() {
  let harness = Harness::new();
  let built = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap() + chrono::Duration::milliseconds(250);

  for _ in 0..2 {
    harness
      .root(Phase::Up)
      .run(|scope| async move {
        let inputs = Value::object([
          ("built", Value::from(built)),
          ("marker", Value::Symbol("cairn::pinned".to_string())),
          ("port", Value::Schema(Arc::new(PortSchema))),
          ("owner", Value::Scope(scope.scope_ref())),
        ]);
        declare("test::echo", "site", inputs)?.await?;
        Ok(())
      })
      .await
      .unwrap();
  }

  assert_eq!(harness.events(), vec![("app/test/site".to_string(), Event::Create)]);

  let root = harness.root(Phase::Up);
  let record = root.store().get("site").await.unwrap().unwrap();
  assert_eq!(record.inputs["built"], json!({"@date": "2024-05-01T12:30:00.250Z"}));
  assert_eq!(record.inputs["port"]["@schema"]["maximum"], 65535);
}

#[tokio::test]
async fn read_phase_returns_schema_values() {
  let harness = Harness::new();
  harness
    .root(Phase::Up)
    .run(|_| async {
      declare("test::echo", "form", Value::object([("port", Value::Schema(Arc::new(PortSchema)))]))?.await?;
      Ok(())
    })
    .await
    .unwrap();

  let output = harness
    .root(Phase::Read)
    .run(|_| async { Ok(declare("test::echo", "form", Value::Null)?.await?) })
    .await
    .unwrap();
  assert_eq!(output.project("port"), Value::Schema(Arc::new(PortSchema)));
}

#[tokio::test]
async fn changed_inputs_update_and_keep_old_inputs() {
  let harness = Harness::new();

  for name in ["v1", "v2"] {
    harness
      .root(Phase::Up)
      .run(|_| async move {
        declare("test::echo", "site", json!({ "name": name }))?.await?;
        Ok(())
      })
      .await
      .unwrap();
  }

  let calls = harness.calls();
  assert_eq!(calls.len(), 2);
  assert_eq!(calls[1].event, Event::Update);
  assert_eq!(calls[1].previous.project("name"), Value::from("v1"));

  let root = harness.root(Phase::Up);
  let record = root.store().get("site").await.unwrap().unwrap();
  assert_eq!(record.status, Status::Updated);
  assert_eq!(record.inputs, json!({"name": "v2"}));
  assert_eq!(record.old_inputs, json!({"name": "v1"}));
}

#[tokio::test]
async fn always_update_bypasses_the_skip_rule() {
  let harness = Harness::new();

  for _ in 0..3 {
    harness
      .root(Phase::Up)
      .run(|_| async {
        let counter = declare_with("test::counter", "hits", json!({}), ResourceOptions::always_update())?;
        Ok(counter.await?)
      })
      .await
      .unwrap();
  }

  let root = harness.root(Phase::Up);
  let record = root.store().get("hits").await.unwrap().unwrap();
  assert_eq!(record.data["generation"], json!(3));
  assert_eq!(record.output, json!({"generation": 3}));
  assert_eq!(harness.calls().len(), 3);
}

#[tokio::test]
async fn failed_create_resumes_as_create() {
  let harness = Harness::new();
  harness.set_failing(true);

  let result = harness
    .root(Phase::Up)
    .run(|_| async {
      declare("test::flaky", "queue", json!({"size": 1}))?;
      Ok(())
    })
    .await;
  assert!(matches!(result, Err(ScopeError::ResourceFailed { .. })));

  let root = harness.root(Phase::Up);
  let record = root.store().get("queue").await.unwrap().unwrap();
  assert_eq!(record.status, Status::Creating);
  // Scratch data written before the failure survives.
  assert_eq!(record.data["attempted"], json!(true));

  harness.set_failing(false);
  harness
    .root(Phase::Up)
    .run(|_| async {
      declare("test::flaky", "queue", json!({"size": 1}))?.await?;
      Ok(())
    })
    .await
    .unwrap();

  let events: Vec<_> = harness.events().into_iter().map(|(_, e)| e).collect();
  assert_eq!(events, vec![Event::Create, Event::Create]);
  let record = root.store().get("queue").await.unwrap().unwrap();
  assert_eq!(record.status, Status::Created);
}

#[tokio::test]
async fn failed_update_resumes_as_update() {
  let harness = Harness::new();

  harness
    .root(Phase::Up)
    .run(|_| async {
      declare("test::flaky", "queue", json!({"size": 1}))?.await?;
      Ok(())
    })
    .await
    .unwrap();

  harness.set_failing(true);
  let result = harness
    .root(Phase::Up)
    .run(|_| async {
      declare("test::flaky", "queue", json!({"size": 2}))?;
      Ok(())
    })
    .await;
  assert!(result.is_err());

  let root = harness.root(Phase::Up);
  assert_eq!(root.store().get("queue").await.unwrap().unwrap().status, Status::Updating);

  harness.set_failing(false);
  harness
    .root(Phase::Up)
    .run(|_| async {
      declare("test::flaky", "queue", json!({"size": 2}))?.await?;
      Ok(())
    })
    .await
    .unwrap();

  let events: Vec<_> = harness.events().into_iter().map(|(_, e)| e).collect();
  assert_eq!(events, vec![Event::Create, Event::Update, Event::Update]);
  let record = root.store().get("queue").await.unwrap().unwrap();
  assert_eq!(record.status, Status::Updated);
  assert_eq!(record.old_inputs, json!({"size": 1}));
}

#[tokio::test]
async fn referenced_outputs_order_execution() {
  let harness = Harness::new();
  let root = harness.root(Phase::Up);

  root
    .run(|_| async {
      let db = declare("test::slow", "db", json!({"ms": 50, "host": "db.internal"}))?;
      let api = declare("test::echo", "api", Value::object([("db_host", Value::from(db.get("host")))]))?;
      let api = api.await?;
      assert_eq!(api.project("db_host"), Value::from("db.internal"));
      Ok(())
    })
    .await
    .unwrap();

  let order: Vec<_> = harness.events().into_iter().map(|(fqn, _)| fqn).collect();
  assert_eq!(order, vec!["app/test/db".to_string(), "app/test/api".to_string()]);

  let record = root.store().get("api").await.unwrap().unwrap();
  assert_eq!(record.deps, vec!["app/test/db".to_string()]);
  assert_eq!(record.inputs, json!({"db_host": "db.internal"}));
}

#[tokio::test]
async fn independent_resources_run_concurrently() {
  let harness = Harness::new();

  harness
    .root(Phase::Up)
    .run(|_| async {
      declare("test::slow", "slow", json!({"ms": 100}))?;
      declare("test::slow", "fast", json!({"ms": 0}))?;
      Ok(())
    })
    .await
    .unwrap();

  let order: Vec<_> = harness.events().into_iter().map(|(fqn, _)| fqn).collect();
  assert_eq!(order, vec!["app/test/fast".to_string(), "app/test/slow".to_string()]);
}

#[tokio::test]
async fn failed_dependency_fails_dependents_without_calling_them() {
  let harness = Harness::new();
  harness.set_failing(true);

  let result = harness
    .root(Phase::Up)
    .run(|_| async {
      let upstream = declare("test::flaky", "upstream", json!({}))?;
      declare("test::echo", "downstream", Value::object([("x", Value::from(&upstream))]))?;
      Ok(())
    })
    .await;

  match result {
    Err(ScopeError::ResourceFailed { failures, .. }) => assert_eq!(failures.len(), 2),
    other => panic!("expected ResourceFailed, got {other:?}"),
  }
  assert!(harness.calls().iter().all(|c| c.kind == "test::flaky"));
}

#[tokio::test]
async fn unknown_provider_fails_the_scope() {
  let harness = Harness::new();

  let result = harness
    .root(Phase::Up)
    .run(|_| async {
      let missing = declare("test::nope", "ghost", json!({}))?;
      let err = missing.await.unwrap_err();
      assert!(err.to_string().contains("no provider registered"));
      Ok(())
    })
    .await;

  assert!(matches!(result, Err(ScopeError::ResourceFailed { .. })));
}
