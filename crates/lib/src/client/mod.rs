//! Connection to the build service and the two submission calls.
//!
//! [`Client::solve`] evaluates a pre-built definition; [`Client::build`] hands a
//! [`Gateway`] to a caller-supplied [`BuildFunc`] that builds and solves its own
//! graph. Both export the result and then export cache records.

mod gateway;

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendError, DockerBackend, Endpoint, ResultRef, SolveContext};
use crate::cache::CacheOptionsEntry;
use crate::llb::{Definition, GraphError};
use crate::session::Session;
use crate::status::StatusSender;

pub use crate::backend::ConnectError;
pub use gateway::{BuildFunc, Gateway, GatewayResult, SolveRequest};

#[derive(Debug, Error)]
pub enum SolveError {
  #[error(transparent)]
  Backend(#[from] BackendError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("build function failed: {0}")]
  BuildFunc(String),
}

/// Where a build result is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportEntry {
  /// Unpack the result filesystem into a directory.
  Local { output_dir: PathBuf },
  /// Write the result filesystem as a tar archive.
  Tar { dest: PathBuf },
}

impl ExportEntry {
  pub fn local(output_dir: impl Into<PathBuf>) -> Self {
    ExportEntry::Local {
      output_dir: output_dir.into(),
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      ExportEntry::Local { .. } => "local",
      ExportEntry::Tar { .. } => "tar",
    }
  }
}

/// Options for one submission. Built fresh per build.
#[derive(Debug, Clone, Default)]
pub struct SolveOpt {
  pub exports: Vec<ExportEntry>,
  pub cache_imports: Vec<CacheOptionsEntry>,
  pub cache_exports: Vec<CacheOptionsEntry>,
  pub session: Session,
}

/// Outcome of a successful submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolveResponse {
  pub exporter_response: BTreeMap<String, String>,
}

/// A handle to the build service.
#[derive(Debug, Clone)]
pub struct Client {
  backend: Arc<dyn Backend>,
}

/// Connect to the build service at `host_address`.
///
/// The address is parsed here; the service is first contacted by a submission.
pub fn connect(host_address: &str) -> Result<Client, ConnectError> {
  let endpoint = Endpoint::parse(host_address)?;
  let backend = DockerBackend::connect(&endpoint)?;
  Ok(Client::new(Arc::new(backend)))
}

impl Client {
  pub fn new(backend: Arc<dyn Backend>) -> Self {
    Self { backend }
  }

  /// Evaluate `definition` and export it.
  pub async fn solve(
    &self,
    definition: &Definition,
    opt: &SolveOpt,
    status: StatusSender,
  ) -> Result<SolveResponse, SolveError> {
    let ctx = SolveContext {
      cache_imports: opt.cache_imports.clone(),
      session: opt.session.clone(),
      status,
    };

    debug!(ops = definition.ops.len(), output = %definition.output, "solving definition");
    let result = self.backend.evaluate(definition, &ctx).await?;
    self.finish(result, opt, &ctx).await
  }

  /// Run `func` against a gateway and export the result it returns.
  pub async fn build(
    &self,
    opt: &SolveOpt,
    func: Arc<dyn BuildFunc>,
    status: StatusSender,
  ) -> Result<SolveResponse, SolveError> {
    let ctx = SolveContext {
      cache_imports: opt.cache_imports.clone(),
      session: opt.session.clone(),
      status,
    };

    let gateway = Gateway::new(self.backend.clone(), ctx.clone());
    let result = match func.build(&gateway).await {
      Ok(result) => result.into_ref(),
      Err(e) => {
        self.release_unused(&gateway, None).await;
        return Err(e);
      }
    };
    self.release_unused(&gateway, Some(&result)).await;
    self.finish(result, opt, &ctx).await
  }

  /// Release gateway solves whose steps `kept` does not reference.
  async fn release_unused(&self, gateway: &Gateway, kept: Option<&ResultRef>) {
    let mut seen: HashSet<String> = kept
      .map(|kept| kept.steps.iter().map(|step| step.image.clone()).collect())
      .unwrap_or_default();

    for mut solved in gateway.take_solved().await {
      solved.steps.retain(|step| seen.insert(step.image.clone()));
      if solved.steps.is_empty() {
        continue;
      }
      debug!(output = %solved.output, steps = solved.steps.len(), "releasing unused gateway result");
      if let Err(e) = self.backend.release(&solved).await {
        warn!(error = %e, "failed to release gateway result");
      }
    }
  }

  async fn finish(&self, result: ResultRef, opt: &SolveOpt, ctx: &SolveContext) -> Result<SolveResponse, SolveError> {
    let outcome = self.export_all(&result, opt, ctx).await;
    if let Err(e) = self.backend.release(&result).await {
      warn!(error = %e, "failed to release build result");
    }
    outcome
  }

  async fn export_all(
    &self,
    result: &ResultRef,
    opt: &SolveOpt,
    ctx: &SolveContext,
  ) -> Result<SolveResponse, SolveError> {
    let mut response = SolveResponse::default();

    for export in &opt.exports {
      let exported = self.backend.export(result, export, ctx).await?;
      response.exporter_response.extend(exported);
    }

    for entry in &opt.cache_exports {
      self.backend.export_cache(result, entry, ctx).await?;
    }

    info!(
      image = %result.image,
      exports = opt.exports.len(),
      cache_exports = opt.cache_exports.len(),
      "build finished"
    );
    Ok(response)
  }
}
