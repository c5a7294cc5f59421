//! Read and destroy phases, and nested scope behaviour across runs.

use serde_json::json;

use cairn_lib::resource::Event;
use cairn_lib::scope::{self, Phase, ScopeError, ScopeOptions};
use cairn_lib::state::Status;
use cairn_lib::value::Value;
use cairn_lib::{Scope, declare};

use super::common::Harness;

async fn deploy(harness: &Harness) {
  harness
    .root(Phase::Up)
    .run(|_| async {
      let db = declare("test::echo", "db", json!({"host": "db.internal"}))?;
      scope::run("api", ScopeOptions::default(), |_| async move {
        declare("test::echo", "server", Value::object([("db", Value::from(db.get("host")))]))?;
        Ok(())
      })
      .await?;
      Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn read_phase_returns_recorded_outputs() {
  let harness = Harness::new();
  deploy(&harness).await;
  harness.clear();

  let server = harness
    .root(Phase::Read)
    .run(|_| async {
      declare("test::echo", "db", json!({"host": "ignored"}))?;
      let server = scope::run("api", ScopeOptions::default(), |_| async {
        Ok(declare("test::echo", "server", json!({}))?.await?)
      })
      .await?;
      Ok(server)
    })
    .await
    .unwrap();

  assert_eq!(server.project("db"), Value::from("db.internal"));
  assert!(harness.calls().is_empty());
}

#[tokio::test]
async fn read_phase_fails_for_unknown_resources() {
  let harness = Harness::new();

  let result = harness
    .root(Phase::Read)
    .run(|_| async {
      let err = declare("test::echo", "missing", json!({}))?.await.unwrap_err();
      assert!(err.to_string().contains("no state recorded"));
      Ok(())
    })
    .await;

  assert!(matches!(result, Err(ScopeError::ResourceFailed { .. })));
  assert!(harness.backend.locations().is_empty());
}

#[tokio::test]
async fn read_phase_never_sweeps() {
  let harness = Harness::new();
  deploy(&harness).await;
  harness.clear();

  harness.root(Phase::Read).run(|_| async { Ok(()) }).await.unwrap();

  assert!(harness.calls().is_empty());
  assert_eq!(harness.backend.locations().len(), 2);
}

#[tokio::test]
async fn destroy_phase_declarations_resolve_to_recorded_outputs() {
  let harness = Harness::new();
  deploy(&harness).await;
  harness.clear();

  let (db, unknown) = harness
    .root(Phase::Destroy)
    .run(|_| async {
      let db = declare("test::echo", "db", json!({}))?.await?;
      let unknown = declare("test::echo", "never-created", json!({}))?.await?;
      Ok((db, unknown))
    })
    .await
    .unwrap();

  assert_eq!(db.project("host"), Value::from("db.internal"));
  assert!(unknown.is_null());
  assert!(harness.events().iter().all(|(_, event)| *event == Event::Delete));
  assert!(harness.backend.locations().is_empty());
}

#[tokio::test]
async fn nested_scope_is_recorded_in_its_parent() {
  let harness = Harness::new();
  deploy(&harness).await;

  let root = harness.root(Phase::Up);
  let record = root.store().get("api").await.unwrap().unwrap();
  assert_eq!(record.provider, cairn_lib::consts::SCOPE_KIND);
  assert_eq!(record.status, Status::Created);
  assert_eq!(record.seq, 2);

  let api = root.child("api", ScopeOptions::default()).unwrap();
  let server = api.store().get("server").await.unwrap().unwrap();
  assert_eq!(server.deps, vec!["app/test/db".to_string()]);
}

#[tokio::test]
async fn failed_nested_scope_fails_its_parent() {
  let harness = Harness::new();
  deploy(&harness).await;
  harness.clear();
  harness.set_failing(true);

  let result = harness
    .root(Phase::Up)
    .run(|_| async {
      let nested = scope::run("api", ScopeOptions::default(), |_| async {
        declare("test::flaky", "broken", json!({}))?;
        Ok(())
      })
      .await;
      assert!(matches!(nested, Err(ScopeError::ResourceFailed { .. })));
      Ok(())
    })
    .await;

  assert!(result.is_err());
  // Neither the root's nor the nested scope's orphans were swept.
  assert!(harness.events().iter().all(|(_, event)| *event != Event::Delete));
  let root = harness.root(Phase::Up);
  assert!(root.store().get("db").await.unwrap().is_some());
  let api = root.child("api", ScopeOptions::default()).unwrap();
  assert!(api.store().get("server").await.unwrap().is_some());
}

#[tokio::test]
async fn nested_scope_names_are_unique_per_parent() {
  let harness = Harness::new();

  harness
    .root(Phase::Up)
    .run(|root| async move {
      scope::run("api", ScopeOptions::default(), |_| async { Ok(()) }).await?;
      let again = scope::run("api", ScopeOptions::default(), |_| async { Ok(()) }).await;
      assert!(matches!(again, Err(ScopeError::DuplicateScope(_))));
      assert!(!root.is_errored());
      Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn stage_override_is_visible_to_providers_only() {
  let harness = Harness::new();

  harness
    .root(Phase::Up)
    .run(|_| async {
      scope::run("preview", ScopeOptions::default().with_stage("pr-42"), |scope| async move {
        assert_eq!(scope.stage(), "pr-42");
        assert_eq!(scope.path(), "app/test/preview");
        declare("test::echo", "site", json!({}))?.await?;
        Ok(())
      })
      .await?;
      Ok(())
    })
    .await
    .unwrap();

  assert_eq!(harness.events(), vec![("app/test/preview/site".to_string(), Event::Create)]);
}

#[tokio::test]
async fn sequence_numbers_follow_the_latest_run() {
  let harness = Harness::new();

  for ids in [["a", "b"], ["b", "a"]] {
    harness
      .root(Phase::Up)
      .run(|_| async move {
        for id in ids {
          declare("test::echo", id, json!({}))?;
        }
        Ok(())
      })
      .await
      .unwrap();
  }

  let root = harness.root(Phase::Up);
  assert_eq!(root.store().get("b").await.unwrap().unwrap().seq, 1);
  assert_eq!(root.store().get("a").await.unwrap().unwrap().seq, 2);
  assert_eq!(harness.calls().len(), 2);
}

#[tokio::test]
async fn running_without_a_scope_is_an_error() {
  let result = scope::run("orphan", ScopeOptions::default(), |_| async { Ok(()) }).await;
  assert!(matches!(result, Err(ScopeError::NoActiveScope)));

  let harness = Harness::new();
  let root: std::sync::Arc<Scope> = harness.root(Phase::Up);
  assert_eq!(root.path(), "app/test");
}
