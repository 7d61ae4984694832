use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::SolveError;
use crate::backend::{Backend, ResultRef, SolveContext};
use crate::cache::{CacheOptionsEntry, merge_entries};
use crate::llb::Definition;

/// A lower-level solve issued from inside a build function.
#[derive(Debug, Clone)]
pub struct SolveRequest {
  pub definition: Definition,
  /// Imports used in addition to the submission's own.
  pub cache_imports: Vec<CacheOptionsEntry>,
}

impl SolveRequest {
  pub fn new(definition: Definition) -> Self {
    Self {
      definition,
      cache_imports: Vec::new(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct GatewayResult {
  result: ResultRef,
}

impl GatewayResult {
  pub(crate) fn into_ref(self) -> ResultRef {
    self.result
  }
}

/// Caller-supplied graph construction run during a callback submission.
#[async_trait]
pub trait BuildFunc: Send + Sync + fmt::Debug {
  async fn build(&self, gateway: &Gateway) -> Result<GatewayResult, SolveError>;
}

/// The handle a [`BuildFunc`] solves through.
///
/// Every result solved here is remembered so the client can release the ones
/// the build function does not return.
#[derive(Debug, Clone)]
pub struct Gateway {
  backend: Arc<dyn Backend>,
  ctx: SolveContext,
  solved: Arc<Mutex<Vec<ResultRef>>>,
}

impl Gateway {
  pub(crate) fn new(backend: Arc<dyn Backend>, ctx: SolveContext) -> Self {
    Self {
      backend,
      ctx,
      solved: Arc::default(),
    }
  }

  pub(crate) async fn take_solved(&self) -> Vec<ResultRef> {
    std::mem::take(&mut *self.solved.lock().await)
  }

  /// Evaluate `request.definition` with the submission's imports followed by the request's own.
  pub async fn solve(&self, request: SolveRequest) -> Result<GatewayResult, SolveError> {
    let mut ctx = self.ctx.clone();
    ctx.cache_imports = merge_entries(&self.ctx.cache_imports, &request.cache_imports);

    debug!(
      output = %request.definition.output,
      outer = self.ctx.cache_imports.len(),
      inner = request.cache_imports.len(),
      "gateway solve"
    );
    let result = self.backend.evaluate(&request.definition, &ctx).await?;
    self.solved.lock().await.push(result.clone());
    Ok(GatewayResult { result })
  }
}
