//! Secrets flowing through inputs and state.

use serde_json::json;
use serial_test::serial;

use cairn_lib::codec::{CodecError, Passphrase, env_secret_transform, reveal_secrets};
use cairn_lib::resource::Event;
use cairn_lib::scope::{Phase, ScopeError};
use cairn_lib::value::{Secret, Value};
use cairn_lib::{Scope, declare};

use super::common::Harness;

const PASSPHRASE: &str = "correct horse battery staple";

async fn apply_secret(harness: &Harness, passphrase: Option<&str>) -> Result<Value, ScopeError> {
  let mut options = harness.options(Phase::Up);
  if let Some(passphrase) = passphrase {
    options = options.with_passphrase(passphrase);
  }
  Scope::root(options)
    .run(|scope| async move {
      let password = scope.secret("db-password", "hunter2")?;
      let db = declare(
        "test::echo",
        "db",
        Value::object([("user", Value::from("admin")), ("password", Value::from(password))]),
      )?;
      Ok(db.await?)
    })
    .await
}

#[tokio::test]
async fn secrets_are_encrypted_at_rest_and_live_in_memory() {
  let harness = Harness::new();

  let output = apply_secret(&harness, Some(PASSPHRASE)).await.unwrap();
  assert_eq!(
    output.project("password").as_secret().map(Secret::expose),
    Some("hunter2")
  );
  assert_eq!(
    harness.calls()[0].inputs.project("password"),
    Value::from(Secret::new("db-password", "hunter2"))
  );

  let root = harness.root(Phase::Up);
  let record = root.store().get("db").await.unwrap().unwrap();
  let persisted = serde_json::to_string(&record).unwrap();
  assert!(!persisted.contains("hunter2"));
  assert_eq!(record.inputs["password"]["@secret"]["name"], json!("db-password"));

  let revealed = reveal_secrets(&record.inputs, &Passphrase::new(PASSPHRASE)).unwrap();
  assert_eq!(revealed, json!({"user": "admin", "password": "hunter2"}));
}

#[tokio::test]
async fn unchanged_secret_is_skipped_on_rerun() {
  let harness = Harness::new();

  apply_secret(&harness, Some(PASSPHRASE)).await.unwrap();
  let output = apply_secret(&harness, Some(PASSPHRASE)).await.unwrap();

  assert_eq!(harness.events(), vec![("app/test/db".to_string(), Event::Create)]);
  assert_eq!(
    output.project("password").as_secret().map(Secret::expose),
    Some("hunter2")
  );
}

#[tokio::test]
async fn wrong_passphrase_fails_without_calling_the_provider() {
  let harness = Harness::new();
  apply_secret(&harness, Some(PASSPHRASE)).await.unwrap();
  harness.clear();

  let result = apply_secret(&harness, Some("not the passphrase")).await;

  match result {
    Err(ScopeError::ResourceFailed { failures, .. }) => {
      assert!(failures[0].contains("db-password"), "{failures:?}");
    }
    other => panic!("expected ResourceFailed, got {other:?}"),
  }
  assert!(harness.calls().is_empty());
}

#[tokio::test]
async fn missing_passphrase_fails_before_the_provider_runs() {
  let harness = Harness::new();

  let result = apply_secret(&harness, None).await;

  assert!(matches!(result, Err(ScopeError::ResourceFailed { .. })));
  assert!(harness.calls().is_empty());
  let err = CodecError::MissingPassphrase("db-password".into()).to_string();
  match result {
    Err(ScopeError::ResourceFailed { failures, .. }) => assert!(failures[0].contains(&err), "{failures:?}"),
    _ => unreachable!(),
  }
}

fn runtime() -> tokio::runtime::Runtime {
  tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap()
}

async fn read_db_with_env_secrets(harness: &Harness) -> Result<Value, ScopeError> {
  let options = harness.options(Phase::Read).with_transform(env_secret_transform());
  Scope::root(options)
    .run(|_| async {
      let db = declare("test::echo", "db", json!({}))?;
      Ok(db.await?)
    })
    .await
}

#[test]
#[serial]
fn env_transform_reads_secrets_without_a_passphrase() {
  let harness = Harness::new();
  let rt = runtime();
  rt.block_on(apply_secret(&harness, Some(PASSPHRASE))).unwrap();

  let output = temp_env::with_var("CAIRN_SECRET_DB_PASSWORD", Some("from-env"), || {
    rt.block_on(read_db_with_env_secrets(&harness))
  })
  .unwrap();

  assert_eq!(
    output.project("password").as_secret().map(Secret::expose),
    Some("from-env")
  );
  assert_eq!(harness.calls().len(), 1);
}

#[test]
#[serial]
fn env_transform_requires_the_variable() {
  let harness = Harness::new();
  let rt = runtime();
  rt.block_on(apply_secret(&harness, Some(PASSPHRASE))).unwrap();

  let result = temp_env::with_var_unset("CAIRN_SECRET_DB_PASSWORD", || rt.block_on(read_db_with_env_secrets(&harness)));

  match result {
    Err(ScopeError::ResourceFailed { failures, .. }) => {
      assert!(failures[0].contains("CAIRN_SECRET_DB_PASSWORD"), "{failures:?}");
    }
    other => panic!("expected ResourceFailed, got {other:?}"),
  }
}
