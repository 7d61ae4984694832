//! The remote executor seam.
//!
//! A [`Backend`] evaluates a [`Definition`], exports the result and persists
//! cache records. [`DockerBackend`] drives a Docker engine; tests substitute
//! in-memory implementations.

pub mod address;
mod docker;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::CacheOptionsEntry;
use crate::client::ExportEntry;
use crate::llb::{Definition, GraphError};
use crate::session::{Session, SessionError};
use crate::status::StatusSender;
use crate::util::hash::{DirHashError, Digest};

pub use address::Endpoint;
pub use docker::DockerBackend;

/// Errors establishing a connection to the build engine.
#[derive(Debug, Error)]
pub enum ConnectError {
  #[error("unsupported scheme {scheme:?} in host address {address:?}")]
  UnsupportedScheme { address: String, scheme: String },

  #[error("host address {0:?} names no endpoint")]
  EmptyEndpoint(String),

  #[error("could not configure engine client: {0}")]
  Engine(#[from] bollard::errors::Error),
}

#[derive(Debug, Error)]
pub enum BackendError {
  #[error("engine request failed: {0}")]
  Engine(#[from] bollard::errors::Error),

  #[error("build container {name:?} is not available: {message}")]
  ContainerUnavailable { name: String, message: String },

  #[error("failed to pull {image}: {message}")]
  Pull { image: String, message: String },

  #[error("process \"{name}\" did not complete successfully: exit code: {code}")]
  ExecFailed { name: String, code: i64 },

  #[error("unsupported operation: {0}")]
  Unsupported(String),

  #[error("op {0} has not been evaluated")]
  MissingInput(Digest),

  #[error("export failed: {0}")]
  Export(String),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Session(#[from] SessionError),

  #[error(transparent)]
  Hash(#[from] DirHashError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Handle to an evaluated definition held by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRef {
  /// Digest of the definition's output op.
  pub output: Digest,
  /// Image holding the output filesystem.
  pub image: String,
  /// Exec steps in evaluation order.
  pub steps: Vec<StepRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRef {
  pub digest: Digest,
  pub image: String,
  /// Reused from a cache import rather than executed.
  pub cached: bool,
}

/// Per-call context handed to the backend.
#[derive(Debug, Clone)]
pub struct SolveContext {
  pub cache_imports: Vec<CacheOptionsEntry>,
  pub session: Session,
  pub status: StatusSender,
}

/// Exporter response keys, e.g. `local.path`.
pub type ExporterResponse = BTreeMap<String, String>;

#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
  async fn evaluate(&self, definition: &Definition, ctx: &SolveContext) -> Result<ResultRef, BackendError>;

  async fn export(
    &self,
    result: &ResultRef,
    export: &ExportEntry,
    ctx: &SolveContext,
  ) -> Result<ExporterResponse, BackendError>;

  async fn export_cache(
    &self,
    result: &ResultRef,
    entry: &CacheOptionsEntry,
    ctx: &SolveContext,
  ) -> Result<(), BackendError>;

  /// Drop intermediate state held for `result`.
  async fn release(&self, result: &ResultRef) -> Result<(), BackendError>;
}
