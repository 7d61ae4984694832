//! Credential attachment for remote builds.
//!
//! A [`Session`] carries the attachables handed to a submission. The executor
//! asks the session for registry credentials when it pulls an image.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::consts::ENV_DOCKER_CONFIG;

const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";

#[derive(Debug, Error)]
pub enum SessionError {
  #[error("failed to read {path}: {source}")]
  ReadConfig {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  ParseConfig {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid auth entry for {registry}: {reason}")]
  InvalidAuth { registry: String, reason: String },
}

/// Credentials for one registry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistryCredentials {
  pub server_address: String,
  pub username: Option<String>,
  pub password: Option<String>,
  pub identity_token: Option<String>,
}

/// Something a submission attaches to supply material during the remote call.
pub trait Attachable: Send + Sync + fmt::Debug {
  fn name(&self) -> &'static str;

  /// Credentials for `registry` (a host such as `docker.io`), if this attachable has any.
  fn credentials(&self, registry: &str) -> Result<Option<RegistryCredentials>, SessionError>;
}

#[derive(Debug, Clone, Default)]
pub struct Session {
  attachables: Vec<Arc<dyn Attachable>>,
}

impl Session {
  pub fn new(attachables: Vec<Arc<dyn Attachable>>) -> Self {
    Self { attachables }
  }

  /// First credentials any attachable offers for `registry`.
  pub fn credentials(&self, registry: &str) -> Result<Option<RegistryCredentials>, SessionError> {
    for attachable in &self.attachables {
      if let Some(creds) = attachable.credentials(registry)? {
        debug!(registry, provider = attachable.name(), "using registry credentials");
        return Ok(Some(creds));
      }
    }
    Ok(None)
  }
}

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
  #[serde(default)]
  auths: BTreeMap<String, AuthEntry>,
  #[serde(default, rename = "credsStore")]
  creds_store: Option<String>,
  #[serde(default, rename = "credHelpers")]
  cred_helpers: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
  #[serde(default)]
  auth: Option<String>,
  #[serde(default)]
  username: Option<String>,
  #[serde(default)]
  password: Option<String>,
  #[serde(default)]
  identitytoken: Option<String>,
}

/// Supplies registry credentials from the Docker CLI configuration file.
///
/// The file is read on each lookup; a missing file means no credentials.
/// Credential helpers (`credsStore`, `credHelpers`) are not executed.
#[derive(Debug, Clone)]
pub struct DockerAuthProvider {
  config_path: Option<PathBuf>,
}

impl DockerAuthProvider {
  /// Uses `$DOCKER_CONFIG/config.json`, else `~/.docker/config.json`.
  pub fn new() -> Self {
    let dir = std::env::var_os(ENV_DOCKER_CONFIG)
      .map(PathBuf::from)
      .or_else(|| dirs::home_dir().map(|home| home.join(".docker")));
    Self {
      config_path: dir.map(|d| d.join("config.json")),
    }
  }

  pub fn with_config_path(path: impl Into<PathBuf>) -> Self {
    Self {
      config_path: Some(path.into()),
    }
  }

  pub fn config_path(&self) -> Option<&Path> {
    self.config_path.as_deref()
  }

  fn load(&self) -> Result<Option<DockerConfigFile>, SessionError> {
    let Some(path) = &self.config_path else {
      return Ok(None);
    };

    let contents = match std::fs::read_to_string(path) {
      Ok(contents) => contents,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(source) => {
        return Err(SessionError::ReadConfig {
          path: path.clone(),
          source,
        });
      }
    };

    serde_json::from_str(&contents)
      .map(Some)
      .map_err(|source| SessionError::ParseConfig {
        path: path.clone(),
        source,
      })
  }
}

impl Default for DockerAuthProvider {
  fn default() -> Self {
    Self::new()
  }
}

impl Attachable for DockerAuthProvider {
  fn name(&self) -> &'static str {
    "docker-config"
  }

  fn credentials(&self, registry: &str) -> Result<Option<RegistryCredentials>, SessionError> {
    let Some(config) = self.load()? else {
      return Ok(None);
    };

    let wanted = canonical_registry(registry);
    let entry = config
      .auths
      .iter()
      .find(|(key, _)| canonical_registry(auth_key_host(key)) == wanted);

    let Some((key, entry)) = entry else {
      if config.creds_store.is_some() || config.cred_helpers.contains_key(registry) {
        debug!(registry, "credential helpers are not supported; continuing without credentials");
      }
      return Ok(None);
    };

    let server_address = if wanted == "docker.io" {
      DOCKER_HUB_AUTH_KEY.to_string()
    } else {
      key.clone()
    };

    let (username, password) = match &entry.auth {
      Some(encoded) if !encoded.is_empty() => {
        let (user, pass) = decode_auth(encoded).map_err(|reason| SessionError::InvalidAuth {
          registry: registry.to_string(),
          reason,
        })?;
        (Some(user), Some(pass))
      }
      _ => (entry.username.clone(), entry.password.clone()),
    };

    Ok(Some(RegistryCredentials {
      server_address,
      username,
      password,
      identity_token: entry.identitytoken.clone().filter(|t| !t.is_empty()),
    }))
  }
}

/// `https://index.docker.io/v1/` -> `index.docker.io`
fn auth_key_host(key: &str) -> &str {
  let without_scheme = key
    .strip_prefix("https://")
    .or_else(|| key.strip_prefix("http://"))
    .unwrap_or(key);
  without_scheme.split('/').next().unwrap_or(without_scheme)
}

fn canonical_registry(host: &str) -> &str {
  match host {
    "index.docker.io" | "registry-1.docker.io" => "docker.io",
    other => other,
  }
}

fn decode_auth(encoded: &str) -> Result<(String, String), String> {
  let decoded = STANDARD.decode(encoded.trim()).map_err(|e| e.to_string())?;
  let decoded = String::from_utf8(decoded).map_err(|e| e.to_string())?;
  decoded
    .split_once(':')
    .map(|(user, pass)| (user.to_string(), pass.to_string()))
    .ok_or_else(|| "expected base64 of user:password".to_string())
}
