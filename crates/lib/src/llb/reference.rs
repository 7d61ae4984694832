//! Container image reference normalization.

use std::fmt;

use super::GraphError;

const DEFAULT_DOMAIN: &str = "docker.io";
const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";
const DEFAULT_TAG: &str = "latest";

/// A fully-qualified image reference: `domain/path[:tag][@digest]`.
///
/// Short names are expanded the way container engines expand them:
/// `alpine` becomes `docker.io/library/alpine:latest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
  pub domain: String,
  pub path: String,
  pub tag: Option<String>,
  pub digest: Option<String>,
}

impl ImageReference {
  pub fn parse(reference: &str) -> Result<Self, GraphError> {
    let invalid = |reason| GraphError::InvalidReference {
      reference: reference.to_string(),
      reason,
    };

    if reference.is_empty() {
      return Err(invalid("reference is empty"));
    }
    if reference.chars().any(char::is_whitespace) {
      return Err(invalid("reference contains whitespace"));
    }

    let (name, digest) = match reference.split_once('@') {
      Some((name, digest)) => {
        let hex = digest
          .strip_prefix("sha256:")
          .ok_or_else(|| invalid("only sha256 digests are supported"))?;
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
          return Err(invalid("digest must be 64 lowercase hex characters"));
        }
        (name, Some(digest.to_string()))
      }
      None => (reference, None),
    };

    // A colon after the last slash separates the tag; earlier colons belong to a registry port.
    let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (name, tag) = match name[last_slash..].rfind(':') {
      Some(i) => {
        let split = last_slash + i;
        (&name[..split], Some(name[split + 1..].to_string()))
      }
      None => (name, None),
    };

    if let Some(ref tag) = tag
      && !valid_tag(tag)
    {
      return Err(invalid("tag must be 1-128 word characters, dots or dashes"));
    }

    let (domain, path) = match name.split_once('/') {
      Some((first, rest)) if first.contains('.') || first.contains(':') || first == "localhost" => {
        (first.to_string(), rest.to_string())
      }
      _ => (DEFAULT_DOMAIN.to_string(), name.to_string()),
    };

    let domain = if domain == LEGACY_DEFAULT_DOMAIN {
      DEFAULT_DOMAIN.to_string()
    } else {
      domain
    };

    let path = if domain == DEFAULT_DOMAIN && !path.contains('/') {
      format!("{}{}", OFFICIAL_REPO_PREFIX, path)
    } else {
      path
    };

    if path.split('/').any(|component| !valid_path_component(component)) {
      return Err(invalid("repository components must be lowercase alphanumerics separated by '.', '_' or '-'"));
    }

    let tag = match (tag, &digest) {
      (None, None) => Some(DEFAULT_TAG.to_string()),
      (tag, _) => tag,
    };

    Ok(Self {
      domain,
      path,
      tag,
      digest,
    })
  }

  /// `domain/path`, without tag or digest.
  pub fn repository(&self) -> String {
    format!("{}/{}", self.domain, self.path)
  }
}

impl fmt::Display for ImageReference {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.repository())?;
    if let Some(ref tag) = self.tag {
      write!(f, ":{}", tag)?;
    }
    if let Some(ref digest) = self.digest {
      write!(f, "@{}", digest)?;
    }
    Ok(())
  }
}

fn valid_tag(tag: &str) -> bool {
  let mut chars = tag.chars();
  let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
  first_ok && tag.len() <= 128 && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn valid_path_component(component: &str) -> bool {
  let starts_alnum = component
    .chars()
    .next()
    .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
  starts_alnum
    && component
      .chars()
      .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
}
