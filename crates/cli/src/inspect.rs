//! Read-only access to a filesystem state directory.

use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use cairn_lib::state::{FileSystemStateStore, StateRecord, StateStore};

/// Records of one scope directory.
#[derive(Debug)]
pub struct ScopeState {
  /// `<app>/<stage>/<nested scopes...>`
  pub path: String,
  pub records: Vec<(String, StateRecord)>,
}

/// Every scope below `state_dir` that holds at least one record, in path order.
pub async fn load_scopes(state_dir: &Path) -> Result<Vec<ScopeState>> {
  if !state_dir.is_dir() {
    return Ok(Vec::new());
  }

  let mut scopes = Vec::new();
  for entry in WalkDir::new(state_dir).sort_by_file_name() {
    let entry = entry.with_context(|| format!("Failed to walk {}", state_dir.display()))?;
    if !entry.file_type().is_dir() {
      continue;
    }

    let store = FileSystemStateStore::new(entry.path());
    let records = store
      .all()
      .await
      .with_context(|| format!("Failed to read state in {}", entry.path().display()))?;
    if records.is_empty() {
      continue;
    }

    scopes.push(ScopeState {
      path: scope_path(state_dir, entry.path()),
      records: records.into_iter().collect(),
    });
  }
  Ok(scopes)
}

/// Locate the record behind a fully-qualified name.
///
/// Ids may themselves contain `/`, so every split point is tried from the
/// right until a scope directory holds a matching record.
pub async fn find_record(state_dir: &Path, fqn: &str) -> Result<Option<(String, String, StateRecord)>> {
  let fqn = fqn.trim_matches('/');
  for (split, _) in fqn.rmatch_indices('/') {
    let (scope, id) = (&fqn[..split], &fqn[split + 1..]);
    let dir = scope.split('/').fold(state_dir.to_path_buf(), |dir, segment| dir.join(segment));
    if !dir.is_dir() {
      continue;
    }
    let store = FileSystemStateStore::new(&dir);
    if let Some(record) = store
      .get(id)
      .await
      .with_context(|| format!("Failed to read state for {}", fqn))?
    {
      return Ok(Some((scope.to_string(), id.to_string(), record)));
    }
  }
  Ok(None)
}

fn scope_path(state_dir: &Path, dir: &Path) -> String {
  let relative = dir.strip_prefix(state_dir).unwrap_or(dir);
  relative
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}
