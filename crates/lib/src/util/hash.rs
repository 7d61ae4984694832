//! Hashing utilities for content addressing and output verification.
//!
//! This module provides:
//! - `Digest`: an algorithm-prefixed SHA-256 digest (`sha256:<hex>`)
//! - `Hashable`: digest of a value's canonical JSON serialization
//! - `hash_directory()`: Deterministic directory hashing
//! - `hash_file()`: Single file hashing
//! - `hash_bytes()`: Arbitrary byte hashing

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use walkdir::WalkDir;

use crate::consts::DIGEST_TAG_LEN;

pub type HashError = serde_json::Error;

const SHA256_PREFIX: &str = "sha256:";

/// A content digest identifying a unique object.
///
/// # Format
///
/// The algorithm name, a colon, and 64 lowercase hexadecimal characters,
/// e.g. `"sha256:9f86d081..."`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(pub String);

impl Digest {
  fn from_hasher(hasher: Sha256) -> Self {
    Digest(format!("{}{:x}", SHA256_PREFIX, hasher.finalize()))
  }

  /// The hexadecimal part of the digest.
  pub fn hex(&self) -> &str {
    self.0.strip_prefix(SHA256_PREFIX).unwrap_or(&self.0)
  }

  /// A short hex prefix, suitable for image tags and log lines.
  pub fn short(&self) -> &str {
    let hex = self.hex();
    &hex[..hex.len().min(DIGEST_TAG_LEN)]
  }
}

impl std::fmt::Display for Digest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Hashable: Serialize {
  fn compute_digest(&self) -> Result<Digest, HashError> {
    let serialized = serde_json::to_string(self)?;
    Ok(hash_bytes(serialized.as_bytes()))
  }
}

/// Error during directory hashing.
#[derive(Debug, thiserror::Error)]
pub enum DirHashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },

  #[error("failed to read symlink {path}: {message}")]
  ReadSymlink { path: String, message: String },
}

/// Compute a deterministic hash of a directory's contents.
///
/// The hash includes file contents, directory structure and symlink targets.
/// Metadata such as timestamps and permissions is ignored. Entries are sorted
/// by path for determinism.
pub fn hash_directory(path: &Path) -> Result<Digest, DirHashError> {
  let mut entries: Vec<(String, String)> = Vec::new();

  for entry in WalkDir::new(path).sort_by_file_name() {
    let entry = entry.map_err(|e| DirHashError::WalkDir { message: e.to_string() })?;
    let entry_path = entry.path();

    let rel_path = entry_path
      .strip_prefix(path)
      .unwrap_or(entry_path)
      .to_string_lossy()
      .to_string();

    // Skip the root directory itself
    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    let entry_hash = if file_type.is_file() {
      let content_hash = hash_file(entry_path)?;
      format!("F:{}:{}", rel_path, content_hash.hex())
    } else if file_type.is_dir() {
      format!("D:{}", rel_path)
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|e| DirHashError::ReadSymlink {
        path: entry_path.display().to_string(),
        message: e.to_string(),
      })?;
      let target_hash = hash_bytes(target.to_string_lossy().as_bytes());
      format!("L:{}:{}", rel_path, target_hash.hex())
    } else {
      // Skip special files (sockets, devices, etc.)
      continue;
    };

    entries.push((rel_path, entry_hash));
  }

  entries.sort_by(|a, b| a.0.cmp(&b.0));

  let mut hasher = Sha256::new();
  for (_, entry_hash) in entries {
    hasher.update(entry_hash.as_bytes());
    hasher.update(b"\n");
  }

  Ok(Digest::from_hasher(hasher))
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<Digest, DirHashError> {
  let read_err = |e: std::io::Error| DirHashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  };

  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(read_err)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(Digest::from_hasher(hasher))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> Digest {
  let mut hasher = Sha256::new();
  hasher.update(data);
  Digest::from_hasher(hasher)
}
