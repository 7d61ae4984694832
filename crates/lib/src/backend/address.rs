//! Host address parsing.

use std::path::PathBuf;

use super::ConnectError;

/// Where the engine API is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
  /// The platform's default local socket.
  LocalDefaults,
  Unix(PathBuf),
  /// `http://host:port`
  Http(String),
  /// A container on the local engine, named by `docker-container://<name>`.
  Container(String),
}

impl Endpoint {
  /// Parse a host address such as `unix:///run/docker.sock`, `tcp://10.0.0.1:2375`
  /// or `docker-container://buildkitd`.
  ///
  /// An empty address or `docker://` selects the local defaults.
  pub fn parse(address: &str) -> Result<Self, ConnectError> {
    let address = address.trim();
    if address.is_empty() || address == "docker://" {
      return Ok(Endpoint::LocalDefaults);
    }

    if let Some(path) = address.strip_prefix("unix://") {
      if path.is_empty() {
        return Err(ConnectError::EmptyEndpoint(address.to_string()));
      }
      return Ok(Endpoint::Unix(PathBuf::from(path)));
    }

    if let Some(name) = address.strip_prefix("docker-container://") {
      let name = name.trim_end_matches('/');
      if name.is_empty() {
        return Err(ConnectError::EmptyEndpoint(address.to_string()));
      }
      return Ok(Endpoint::Container(name.to_string()));
    }

    if let Some(authority) = address.strip_prefix("tcp://").or_else(|| address.strip_prefix("http://")) {
      let authority = authority.trim_end_matches('/');
      if authority.is_empty() {
        return Err(ConnectError::EmptyEndpoint(address.to_string()));
      }
      return Ok(Endpoint::Http(format!("http://{}", authority)));
    }

    let scheme = address.split_once("://").map_or(address, |(scheme, _)| scheme);
    Err(ConnectError::UnsupportedScheme {
      address: address.to_string(),
      scheme: scheme.to_string(),
    })
  }
}
