//! Cache import/export descriptors.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute keys whose values never appear in printed output.
const SECRET_ATTRS: &[&str] = &["token", "secret", "password"];

/// Names a remote cache location and how to reach it.
///
/// The same descriptor is used for import and export: two builds hit the same
/// cache only when their descriptors resolve to the same namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptionsEntry {
  #[serde(rename = "type")]
  pub kind: String,
  pub attrs: BTreeMap<String, String>,
}

impl CacheOptionsEntry {
  pub fn new(kind: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      attrs: BTreeMap::new(),
    }
  }

  pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.attrs.insert(key.into(), value.into());
    self
  }

  /// A GitHub Actions cache entry.
  pub fn gha(scope: &str, url: &str, token: &str) -> Self {
    Self::new("gha").attr("scope", scope).attr("url", url).attr("token", token)
  }

  /// A local directory cache entry.
  pub fn local(src: &str) -> Self {
    Self::new("local").attr("src", src)
  }

  /// The namespace cache records are stored under.
  ///
  /// `scope` wins; `local` entries fall back to their `src` or `dest` directory.
  pub fn namespace(&self) -> Option<&str> {
    if let Some(scope) = self.attrs.get("scope") {
      return Some(scope.as_str());
    }
    if self.kind == "local" {
      return self.attrs.get("src").or_else(|| self.attrs.get("dest")).map(String::as_str);
    }
    None
  }
}

impl fmt::Display for CacheOptionsEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{{{}", self.kind)?;
    for (i, (key, value)) in self.attrs.iter().enumerate() {
      let sep = if i == 0 { " " } else { "," };
      if SECRET_ATTRS.contains(&key.as_str()) && !value.is_empty() {
        write!(f, "{}{}=<redacted>", sep, key)?;
      } else {
        write!(f, "{}{}={}", sep, key, value)?;
      }
    }
    write!(f, "}}")
  }
}

/// Formats a descriptor list as `[{gha scope=...} {local src=...}]`.
pub struct DisplayEntries<'a>(pub &'a [CacheOptionsEntry]);

impl fmt::Display for DisplayEntries<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, entry) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, " ")?;
      }
      write!(f, "{}", entry)?;
    }
    write!(f, "]")
  }
}

/// Append `extra` to `base`, skipping entries already present.
pub fn merge_entries(base: &[CacheOptionsEntry], extra: &[CacheOptionsEntry]) -> Vec<CacheOptionsEntry> {
  let mut merged = base.to_vec();
  for entry in extra {
    if !merged.contains(entry) {
      merged.push(entry.clone());
    }
  }
  merged
}
