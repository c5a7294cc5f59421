//! Filesystem state backend.
//!
//! # Storage Layout
//!
//! ```text
//! <state dir>/<app>/<stage>/
//! ├── bucket.json          # one StateRecord per resource id
//! ├── api.json             # record of the nested scope "api"
//! └── api/
//!     └── worker:queue.json  # id "worker/queue"
//! ```
//!
//! `/` inside ids is written as `:` so every id maps to a single file; a
//! literal `:` or `%` is percent-escaped (`%3A`, `%25`).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::consts::STATE_FILE_EXT;

use super::{StateError, StateRecord, StateStore, StateStoreFactory, StoreLocation};

/// Stores records as pretty-printed JSON files in one directory per scope.
#[derive(Debug, Clone)]
pub struct FileSystemStateStore {
  dir: PathBuf,
}

impl FileSystemStateStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  /// Factory placing every scope under `root` at its [`StoreLocation::relative_dir`].
  pub fn factory(root: impl Into<PathBuf>) -> StateStoreFactory {
    let root = root.into();
    Arc::new(move |location: &StoreLocation| {
      Arc::new(FileSystemStateStore::new(root.join(location.relative_dir()))) as Arc<dyn StateStore>
    })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn record_path(&self, id: &str) -> PathBuf {
    self.dir.join(format!("{}.{}", encode_id(id), STATE_FILE_EXT))
  }
}

/// File stem for a resource id.
///
/// `/` becomes `:`; a literal `%` or `:` is percent-escaped first so the
/// mapping stays reversible.
pub fn encode_id(id: &str) -> String {
  let mut stem = String::with_capacity(id.len());
  for c in id.chars() {
    match c {
      '%' => stem.push_str("%25"),
      ':' => stem.push_str("%3A"),
      '/' => stem.push(':'),
      c => stem.push(c),
    }
  }
  stem
}

/// Resource id for a file stem.
pub fn decode_id(stem: &str) -> String {
  let mut id = String::with_capacity(stem.len());
  let mut rest = stem;
  while let Some(c) = rest.chars().next() {
    rest = &rest[c.len_utf8()..];
    match c {
      ':' => id.push('/'),
      '%' if rest.starts_with("25") => {
        id.push('%');
        rest = &rest[2..];
      }
      '%' if rest.starts_with("3A") => {
        id.push(':');
        rest = &rest[2..];
      }
      c => id.push(c),
    }
  }
  id
}

#[async_trait]
impl StateStore for FileSystemStateStore {
  async fn init(&self) -> Result<(), StateError> {
    fs::create_dir_all(&self.dir).await.map_err(|source| StateError::Dir {
      path: self.dir.clone(),
      source,
    })
  }

  async fn deinit(&self) -> Result<(), StateError> {
    match fs::remove_dir(&self.dir).await {
      Ok(()) => {
        debug!(path = %self.dir.display(), "removed state directory");
        Ok(())
      }
      Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::DirectoryNotEmpty) => Ok(()),
      Err(source) => Err(StateError::Dir {
        path: self.dir.clone(),
        source,
      }),
    }
  }

  async fn get(&self, id: &str) -> Result<Option<StateRecord>, StateError> {
    let path = self.record_path(id);
    let content = match fs::read_to_string(&path).await {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => {
        return Err(StateError::Read {
          id: id.to_string(),
          source,
        });
      }
    };

    let record = serde_json::from_str(&content).map_err(|source| StateError::Parse {
      id: id.to_string(),
      source,
    })?;
    Ok(Some(record))
  }

  /// Writes atomically: write to a temp file, then rename.
  async fn set(&self, id: &str, record: &StateRecord) -> Result<(), StateError> {
    let path = self.record_path(id);
    let write_err = |source| StateError::Write {
      id: id.to_string(),
      source,
    };

    fs::create_dir_all(&self.dir).await.map_err(|source| StateError::Dir {
      path: self.dir.clone(),
      source,
    })?;

    let content = serde_json::to_string_pretty(record).map_err(|source| StateError::Serialize {
      id: id.to_string(),
      source,
    })?;

    let temp_path = path.with_extension(format!("{}.tmp", STATE_FILE_EXT));
    fs::write(&temp_path, &content).await.map_err(write_err)?;
    fs::rename(&temp_path, &path).await.map_err(write_err)?;

    debug!(id = %id, status = %record.status, path = %path.display(), "state written");
    Ok(())
  }

  async fn delete(&self, id: &str) -> Result<(), StateError> {
    match fs::remove_file(self.record_path(id)).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(StateError::Remove {
        id: id.to_string(),
        source,
      }),
    }
  }

  async fn list(&self) -> Result<Vec<String>, StateError> {
    let dir_err = |source| StateError::Dir {
      path: self.dir.clone(),
      source,
    };

    let mut entries = match fs::read_dir(&self.dir).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(source) => return Err(dir_err(source)),
    };

    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(dir_err)? {
      let path = entry.path();
      // Nested scopes are directories; temp files carry a second extension.
      if path.extension().and_then(|e| e.to_str()) != Some(STATE_FILE_EXT) {
        continue;
      }
      if entry.file_type().await.map_err(dir_err)?.is_dir() {
        continue;
      }
      if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
        ids.push(decode_id(stem));
      }
    }
    ids.sort();
    Ok(ids)
  }
}
