//! Remote service configuration read from the environment.

use crate::cache::CacheOptionsEntry;
use crate::consts::{ENV_BUILDKIT_HOST, ENV_CACHE_TOKEN, ENV_CACHE_URL};

/// Where the build service lives and how to reach the cache backend.
///
/// Values are not validated here; an empty host selects the local engine
/// defaults and empty cache settings are passed through to the executor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteServiceConfig {
  pub host_address: String,
  pub cache_url: String,
  pub cache_token: String,
}

impl RemoteServiceConfig {
  pub fn from_env() -> Self {
    Self {
      host_address: std::env::var(ENV_BUILDKIT_HOST).unwrap_or_default(),
      cache_url: std::env::var(ENV_CACHE_URL).unwrap_or_default(),
      cache_token: std::env::var(ENV_CACHE_TOKEN).unwrap_or_default(),
    }
  }

  /// The `gha` descriptor for `scope`, used for both import and export.
  pub fn cache_descriptor(&self, scope: &str) -> CacheOptionsEntry {
    CacheOptionsEntry::gha(scope, &self.cache_url, &self.cache_token)
  }
}
