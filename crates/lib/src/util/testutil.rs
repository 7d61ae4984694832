//! Test helpers: an in-memory [`Backend`] that records what it was asked to do.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::{Backend, BackendError, ExporterResponse, ResultRef, SolveContext, StepRef};
use crate::cache::CacheOptionsEntry;
use crate::client::ExportEntry;
use crate::llb::{Definition, Op};
use crate::status::{SolveStatus, Vertex, VertexLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
  Evaluate,
  Export,
  ExportCache,
}

#[derive(Debug, Default)]
pub struct FakeBackend {
  fail_at: Option<FailAt>,
  log_lines: usize,
  calls: Mutex<Vec<String>>,
  imports: Mutex<Vec<Vec<CacheOptionsEntry>>>,
  released: Mutex<Vec<String>>,
}

impl FakeBackend {
  pub fn failing(at: FailAt) -> Self {
    Self {
      fail_at: Some(at),
      ..Default::default()
    }
  }

  /// Emit `lines` log events before the first vertex of every evaluation.
  pub fn with_log_lines(mut self, lines: usize) -> Self {
    self.log_lines = lines;
    self
  }

  /// Calls in the order they were made, e.g. `export:local`.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  /// Cache imports seen by each `evaluate` call.
  pub fn evaluated_imports(&self) -> Vec<Vec<CacheOptionsEntry>> {
    self.imports.lock().unwrap().clone()
  }

  /// Step images passed to `release`, in order.
  pub fn released(&self) -> Vec<String> {
    self.released.lock().unwrap().clone()
  }

  fn record(&self, call: impl Into<String>) {
    self.calls.lock().unwrap().push(call.into());
  }
}

#[async_trait]
impl Backend for FakeBackend {
  async fn evaluate(&self, definition: &Definition, ctx: &SolveContext) -> Result<ResultRef, BackendError> {
    self.record("evaluate");
    self.imports.lock().unwrap().push(ctx.cache_imports.clone());

    if let Some(first) = definition.ops.first() {
      for line in 0..self.log_lines {
        let _ = ctx
          .status
          .send(SolveStatus::log(VertexLog {
            vertex: first.digest.clone(),
            stream: 1,
            data: format!("line {}\n", line).into_bytes(),
          }))
          .await;
      }
    }

    let mut steps = Vec::new();
    for op in &definition.ops {
      let vertex = Vertex::started(op.digest.clone(), op.op.display_name());
      if self.fail_at == Some(FailAt::Evaluate) && matches!(op.op, Op::Exec(_)) {
        let _ = ctx
          .status
          .send(SolveStatus::vertex(vertex.complete(false, Some("exit code: 1".into()))))
          .await;
        return Err(BackendError::ExecFailed {
          name: op.op.display_name(),
          code: 1,
        });
      }
      let _ = ctx.status.send(SolveStatus::vertex(vertex.complete(false, None))).await;
      if matches!(op.op, Op::Exec(_)) {
        steps.push(StepRef {
          digest: op.digest.clone(),
          image: format!("fake:{}", op.digest.short()),
          cached: false,
        });
      }
    }

    Ok(ResultRef {
      output: definition.output.clone(),
      image: format!("fake:{}", definition.output.short()),
      steps,
    })
  }

  async fn export(
    &self,
    _result: &ResultRef,
    export: &ExportEntry,
    _ctx: &SolveContext,
  ) -> Result<ExporterResponse, BackendError> {
    self.record(format!("export:{}", export.kind()));
    if self.fail_at == Some(FailAt::Export) {
      return Err(BackendError::Export("no space left on device".into()));
    }

    let mut response = ExporterResponse::new();
    if let ExportEntry::Local { output_dir } = export {
      response.insert("local.path".into(), output_dir.display().to_string());
    }
    Ok(response)
  }

  async fn export_cache(
    &self,
    _result: &ResultRef,
    entry: &CacheOptionsEntry,
    _ctx: &SolveContext,
  ) -> Result<(), BackendError> {
    self.record(format!("export_cache:{}", entry.namespace().unwrap_or("-")));
    if self.fail_at == Some(FailAt::ExportCache) {
      return Err(BackendError::Export("cache backend unavailable".into()));
    }
    Ok(())
  }

  async fn release(&self, result: &ResultRef) -> Result<(), BackendError> {
    self.record("release");
    self
      .released
      .lock()
      .unwrap()
      .extend(result.steps.iter().map(|step| step.image.clone()));
    Ok(())
  }
}
