//! Orphan cleanup, replacement and teardown.

use serde_json::json;
use tempfile::TempDir;

use cairn_lib::declare;
use cairn_lib::execute::{DestroyError, destroy_resource};
use cairn_lib::resource::{BoxError, Event};
use cairn_lib::scope::{self, DestroyStrategy, Phase, ScopeError, ScopeOptions};
use cairn_lib::state::FileSystemStateStore;
use cairn_lib::value::Value;

use super::common::Harness;

async fn declare_three(harness: &Harness) {
  harness
    .root(Phase::Up)
    .run(|_| async {
      declare("test::echo", "a", json!({"n": 1}))?;
      declare("test::echo", "b", json!({"n": 2}))?;
      declare("test::echo", "c", json!({"n": 3}))?;
      Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn orphans_are_deleted_newest_first() {
  let harness = Harness::new();
  declare_three(&harness).await;
  harness.clear();

  harness
    .root(Phase::Up)
    .run(|_| async {
      declare("test::echo", "b", json!({"n": 2}))?;
      Ok(())
    })
    .await
    .unwrap();

  assert_eq!(
    harness.events(),
    vec![
      ("app/test/c".to_string(), Event::Delete),
      ("app/test/a".to_string(), Event::Delete),
    ]
  );
  let root = harness.root(Phase::Up);
  assert_eq!(root.store().list().await.unwrap(), vec!["b".to_string()]);
}

#[tokio::test]
async fn delete_sees_last_inputs_and_output() {
  let harness = Harness::new();
  declare_three(&harness).await;
  harness.clear();

  harness.root(Phase::Up).run(|_| async { Ok(()) }).await.unwrap();

  let calls = harness.calls();
  assert_eq!(calls.len(), 3);
  let a = calls.iter().find(|c| c.fqn == "app/test/a").unwrap();
  assert_eq!(a.inputs, Value::from(json!({"n": 1})));
  assert_eq!(a.previous, Value::from(json!({"n": 1})));
}

#[tokio::test]
async fn errored_scope_keeps_its_orphans() {
  let harness = Harness::new();
  declare_three(&harness).await;
  harness.clear();
  harness.set_failing(true);

  let result = harness
    .root(Phase::Up)
    .run(|_| async {
      declare("test::flaky", "new", json!({}))?;
      Ok(())
    })
    .await;
  assert!(matches!(result, Err(ScopeError::ResourceFailed { .. })));

  assert!(harness.events().iter().all(|(_, event)| *event != Event::Delete));
  let root = harness.root(Phase::Up);
  assert_eq!(root.store().list().await.unwrap().len(), 4);
}

#[tokio::test]
async fn failing_body_keeps_its_orphans() {
  let harness = Harness::new();
  declare_three(&harness).await;
  harness.clear();

  let result = harness
    .root(Phase::Up)
    .run(|_| async { Err::<(), BoxError>("program bug".into()) })
    .await;
  assert!(matches!(result, Err(ScopeError::Body { .. })));
  assert!(harness.calls().is_empty());
}

#[tokio::test]
async fn destroy_phase_tears_down_the_whole_tree() {
  let harness = Harness::new();

  harness
    .root(Phase::Up)
    .run(|_| async {
      declare("test::echo", "db", json!({}))?;
      scope::run("api", ScopeOptions::default(), |_| async {
        declare("test::echo", "queue", json!({}))?;
        declare("test::echo", "worker", json!({}))?;
        Ok(())
      })
      .await?;
      declare("test::echo", "cdn", json!({}))?;
      Ok(())
    })
    .await
    .unwrap();
  assert_eq!(harness.backend.locations().len(), 2);
  harness.clear();

  harness.root(Phase::Destroy).run(|_| async { Ok(()) }).await.unwrap();

  let order: Vec<_> = harness
    .events()
    .into_iter()
    .map(|(fqn, event)| {
      assert_eq!(event, Event::Delete);
      fqn
    })
    .collect();
  assert_eq!(
    order,
    vec![
      "app/test/cdn".to_string(),
      "app/test/api/worker".to_string(),
      "app/test/api/queue".to_string(),
      "app/test/db".to_string(),
    ]
  );
  assert!(harness.backend.locations().is_empty());
}

#[tokio::test]
async fn ids_with_colons_are_not_swept_as_orphans() {
  let state = TempDir::new().unwrap();
  let harness = Harness::new();
  let factory = FileSystemStateStore::factory(state.path());

  for _ in 0..2 {
    cairn_lib::Scope::root(harness.options_with(Phase::Up, factory.clone()))
      .run(|_| async {
        declare("test::echo", "db:primary", json!({"size": 1}))?;
        declare("test::echo", "db/primary", json!({"size": 2}))?;
        Ok(())
      })
      .await
      .unwrap();
  }

  let mut events = harness.events();
  events.sort_by(|a, b| a.0.cmp(&b.0));
  assert_eq!(
    events,
    vec![
      ("app/test/db/primary".to_string(), Event::Create),
      ("app/test/db:primary".to_string(), Event::Create),
    ]
  );
  assert!(state.path().join("app/test/db%3Aprimary.json").is_file());
  assert!(state.path().join("app/test/db:primary.json").is_file());
}

#[tokio::test]
async fn destroy_phase_removes_state_directories() {
  let state = TempDir::new().unwrap();
  let harness = Harness::new();
  let factory = FileSystemStateStore::factory(state.path());

  cairn_lib::Scope::root(harness.options_with(Phase::Up, factory.clone()))
    .run(|_| async {
      declare("test::echo", "db", json!({}))?;
      scope::run("api", ScopeOptions::default(), |_| async {
        declare("test::echo", "queue", json!({}))?;
        Ok(())
      })
      .await?;
      Ok(())
    })
    .await
    .unwrap();
  assert!(state.path().join("app/test/db.json").is_file());
  assert!(state.path().join("app/test/api.json").is_file());
  assert!(state.path().join("app/test/api/queue.json").is_file());

  cairn_lib::Scope::root(harness.options_with(Phase::Destroy, factory))
    .run(|_| async { Ok(()) })
    .await
    .unwrap();

  assert!(!state.path().join("app/test").exists());
}

#[tokio::test]
async fn dropping_a_nested_scope_deletes_its_resources() {
  let harness = Harness::new();

  harness
    .root(Phase::Up)
    .run(|_| async {
      declare("test::echo", "db", json!({}))?;
      scope::run("api", ScopeOptions::default(), |_| async {
        declare("test::echo", "queue", json!({}))?;
        Ok(())
      })
      .await?;
      Ok(())
    })
    .await
    .unwrap();
  harness.clear();

  harness
    .root(Phase::Up)
    .run(|_| async {
      declare("test::echo", "db", json!({}))?;
      Ok(())
    })
    .await
    .unwrap();

  assert_eq!(harness.events(), vec![("app/test/api/queue".to_string(), Event::Delete)]);
  let root = harness.root(Phase::Up);
  assert_eq!(root.store().list().await.unwrap(), vec!["db".to_string()]);
  assert_eq!(harness.backend.locations().len(), 1);
}

#[tokio::test]
async fn deleting_twice_is_a_no_op() {
  let harness = Harness::new();
  declare_three(&harness).await;

  harness.root(Phase::Up).run(|_| async { Ok(()) }).await.unwrap();
  harness.clear();
  harness.root(Phase::Up).run(|_| async { Ok(()) }).await.unwrap();
  harness.root(Phase::Destroy).run(|_| async { Ok(()) }).await.unwrap();

  assert!(harness.calls().is_empty());
}

#[tokio::test]
async fn replaced_predecessor_is_deleted_after_the_scope() {
  let harness = Harness::new();

  for name in ["blue", "green"] {
    harness
      .root(Phase::Up)
      .run(|_| async move {
        declare("test::replace", "deploy", json!({ "name": name }))?.await?;
        Ok(())
      })
      .await
      .unwrap();
  }

  let calls = harness.calls();
  let events: Vec<_> = calls.iter().map(|c| c.event).collect();
  assert_eq!(events, vec![Event::Create, Event::Update, Event::Delete]);
  // The delete targets the predecessor, not the new deployment.
  assert_eq!(calls[2].inputs, Value::from(json!({"name": "blue"})));
  assert_eq!(calls[2].previous, Value::from(json!({"name": "blue"})));

  let root = harness.root(Phase::Up);
  let record = root.store().get("deploy").await.unwrap().unwrap();
  assert!(record.pending_deletions.is_empty());
  assert_eq!(record.output, json!({"name": "green"}));
}

#[tokio::test]
async fn parallel_strategy_deletes_every_orphan() {
  let harness = Harness::new();
  declare_three(&harness).await;
  harness.clear();

  let options = harness.options(Phase::Up).with_destroy_strategy(DestroyStrategy::Parallel);
  cairn_lib::Scope::root(options).run(|_| async { Ok(()) }).await.unwrap();

  let mut deleted: Vec<_> = harness.events().into_iter().map(|(fqn, _)| fqn).collect();
  deleted.sort();
  assert_eq!(deleted, vec!["app/test/a", "app/test/b", "app/test/c"]);
  assert!(harness.backend.locations().is_empty());
}

#[tokio::test]
async fn unknown_provider_blocks_deletion() {
  let harness = Harness::new();
  declare_three(&harness).await;

  let options = harness.options(Phase::Up).with_providers(Default::default());
  let result = cairn_lib::Scope::root(options).run(|_| async { Ok(()) }).await;

  assert!(matches!(
    result,
    Err(ScopeError::Destroy(DestroyError::UnknownProvider { .. }))
  ));
  let root = harness.root(Phase::Up);
  assert_eq!(root.store().list().await.unwrap().len(), 3);
}

#[tokio::test]
async fn destroy_resource_deletes_immediately() {
  let harness = Harness::new();

  harness
    .root(Phase::Up)
    .run(|_| async {
      let temp = declare("test::echo", "temp", json!({"keep": false}))?;
      temp.clone().await?;
      destroy_resource(&temp).await?;
      Ok(())
    })
    .await
    .unwrap();

  assert_eq!(
    harness.events(),
    vec![
      ("app/test/temp".to_string(), Event::Create),
      ("app/test/temp".to_string(), Event::Delete),
    ]
  );
  let root = harness.root(Phase::Up);
  assert!(root.store().list().await.unwrap().is_empty());
}
