//! Deployable bundles produced by an external bundler.
//!
//! The engine only consumes bundles: it hashes their contents so providers can
//! pass a bundle as a resource input and get change detection for free, and it
//! converts them into a [`Value`].

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

use crate::util::hash::{ContentHash, hash_bytes, hash_file};
use crate::value::{Value, ValueError};

#[derive(Debug, Error)]
pub enum BundleError {
  #[error("failed to walk bundle directory {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("failed to read bundle file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("entrypoint '{0}' is not part of the bundle")]
  MissingEntrypoint(String),
}

/// Contents of one bundle file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleContent {
  Inline(String),
  /// Path to the file on disk.
  Path(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFile {
  /// Path inside the bundle, `/`-separated.
  pub path: String,
  pub content: BundleContent,
}

impl BundleFile {
  pub fn inline(path: impl Into<String>, content: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      content: BundleContent::Inline(content.into()),
    }
  }

  fn content_hash(&self) -> Result<ContentHash, BundleError> {
    match &self.content {
      BundleContent::Inline(text) => Ok(hash_bytes(text.as_bytes())),
      BundleContent::Path(path) => hash_file(path).map_err(|source| BundleError::Read {
        path: path.clone(),
        source,
      }),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
  pub entrypoint: String,
  pub files: Vec<BundleFile>,
  pub content_hash: ContentHash,
}

impl Bundle {
  /// Build a bundle from its files, computing the content hash.
  pub fn new(entrypoint: impl Into<String>, mut files: Vec<BundleFile>) -> Result<Self, BundleError> {
    let entrypoint = entrypoint.into();
    if !files.iter().any(|f| f.path == entrypoint) {
      return Err(BundleError::MissingEntrypoint(entrypoint));
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    let content_hash = compute_hash(&entrypoint, &files)?;
    Ok(Self {
      entrypoint,
      files,
      content_hash,
    })
  }

  /// Bundle every regular file below `dir`, skipping entries named in `exclude`.
  pub fn from_dir(dir: &Path, entrypoint: impl Into<String>, exclude: &[&str]) -> Result<Self, BundleError> {
    let walker = WalkDir::new(dir).sort_by_file_name().into_iter().filter_entry(|e| {
      e.file_name()
        .to_str()
        .map(|name| !exclude.contains(&name))
        .unwrap_or(true)
    });

    let mut files = Vec::new();
    for entry in walker {
      let entry = entry.map_err(|source| BundleError::Walk {
        path: dir.to_path_buf(),
        source,
      })?;
      if !entry.file_type().is_file() {
        continue;
      }
      let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
      let path = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
      files.push(BundleFile {
        path,
        content: BundleContent::Path(entry.path().to_path_buf()),
      });
    }

    Self::new(entrypoint, files)
  }

  /// Recompute the hash and compare it with the recorded one.
  pub fn verify(&self) -> Result<bool, BundleError> {
    Ok(compute_hash(&self.entrypoint, &self.files)? == self.content_hash)
  }

  /// Copy of the bundle with every file read into memory.
  pub fn inlined(&self) -> Result<Self, BundleError> {
    let files = self
      .files
      .iter()
      .map(|file| match &file.content {
        BundleContent::Inline(_) => Ok(file.clone()),
        BundleContent::Path(path) => {
          let text = fs::read_to_string(path).map_err(|source| BundleError::Read {
            path: path.clone(),
            source,
          })?;
          Ok(BundleFile::inline(file.path.clone(), text))
        }
      })
      .collect::<Result<_, BundleError>>()?;
    Ok(Self {
      entrypoint: self.entrypoint.clone(),
      files,
      content_hash: self.content_hash.clone(),
    })
  }

  pub fn to_value(&self) -> Result<Value, ValueError> {
    Value::from_serialize(self)
  }
}

/// Hash of the entrypoint plus every `(path, content hash)` pair, in path order.
fn compute_hash(entrypoint: &str, files: &[BundleFile]) -> Result<ContentHash, BundleError> {
  let mut hasher = Sha256::new();
  hasher.update(format!("E:{}\n", entrypoint).as_bytes());
  for file in files {
    hasher.update(format!("F:{}:{}\n", file.path, file.content_hash()?).as_bytes());
  }
  Ok(ContentHash(hex::encode(hasher.finalize())))
}
