//! Build orchestration.
//!
//! [`Orchestrator::submit`] runs a submission on one task and the status drain
//! on another, waits for both, and reports the first error.

mod group;
mod types;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tracing::{debug, info};

use crate::client::{Client, SolveError, SolveOpt, SolveResponse};
use crate::llb::GraphError;
use crate::status::{DrainSummary, StatusSender, drain, status_channel};

pub use group::TaskGroup;
pub use types::{BuildPlan, CachePlacement, ImageCommandBuild, SubmitMode, Submission};

#[derive(Debug, Error)]
pub enum SubmitError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Solve(#[from] SolveError),

  #[error("submission cancelled")]
  Cancelled,

  #[error("submission task failed: {0}")]
  TaskFailed(#[from] JoinError),

  #[error("submission finished without a result")]
  NoResult,
}

/// A finished submission and what its status stream reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
  pub response: SolveResponse,
  pub status: DrainSummary,
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
  client: Client,
}

impl Orchestrator {
  pub fn new(client: Client) -> Self {
    Self { client }
  }

  /// Submit and wait for the build and the status drain to finish.
  pub async fn submit(&self, submission: Submission, opt: SolveOpt) -> Result<Submitted, SubmitError> {
    let (status, events) = status_channel();
    let mut group: TaskGroup<SubmitError> = TaskGroup::new();

    // The drain must be running before the submission can fill the channel.
    let (summary_tx, summary_rx) = oneshot::channel();
    group.spawn(async move {
      let summary = drain(events).await;
      debug!(events = summary.events, cached = summary.cached, "status drain finished");
      let _ = summary_tx.send(summary);
      Ok(())
    });

    let (response_tx, response_rx) = oneshot::channel();
    let client = self.client.clone();
    let cancel = group.token();
    group.spawn(async move {
      let response = tokio::select! {
        _ = cancel.cancelled() => return Err(SubmitError::Cancelled),
        response = run(&client, submission, &opt, status) => response?,
      };
      // The receiver lives until after `wait` returns.
      let _ = response_tx.send(response);
      Ok(())
    });

    group.wait().await?;
    let response = response_rx.await.map_err(|_| SubmitError::NoResult)?;
    let status = summary_rx.await.map_err(|_| SubmitError::NoResult)?;
    info!(
      exports = response.exporter_response.len(),
      steps = status.completed,
      cached = status.cached,
      "submission complete"
    );
    Ok(Submitted { response, status })
  }
}

async fn run(
  client: &Client,
  submission: Submission,
  opt: &SolveOpt,
  status: StatusSender,
) -> Result<SolveResponse, SolveError> {
  match submission {
    Submission::Direct(definition) => client.solve(&definition, opt, status).await,
    Submission::Callback(func) => client.build(opt, func, status).await,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::BackendError;
  use crate::cache::CacheOptionsEntry;
  use crate::consts::{CALLBACK_IMAGE, CALLBACK_USER, DEFAULT_COMMAND, STATUS_CHANNEL_CAPACITY};
  use crate::platform::Platform;
  use crate::session::Session;
  use crate::util::testutil::{FailAt, FakeBackend};
  use std::path::PathBuf;
  use std::sync::Arc;
  use std::time::Duration;
  use tokio::time::timeout;

  fn gha() -> CacheOptionsEntry {
    CacheOptionsEntry::gha("test-cache", "https://cache.example/", "t")
  }

  fn plan(mode: SubmitMode, placement: CachePlacement) -> BuildPlan {
    BuildPlan {
      mode,
      placement,
      image: CALLBACK_IMAGE.into(),
      user: Some(CALLBACK_USER.into()),
      command: DEFAULT_COMMAND.into(),
      platform: Platform::LINUX_ARM64,
      output_dir: PathBuf::from("result"),
      cache_imports: vec![gha()],
      cache_exports: vec![gha()],
      session: Session::default(),
    }
  }

  async fn submit_with(backend: Arc<FakeBackend>, plan: BuildPlan) -> Result<SolveResponse, SubmitError> {
    submit_reporting(backend, plan).await.map(|submitted| submitted.response)
  }

  async fn submit_reporting(backend: Arc<FakeBackend>, plan: BuildPlan) -> Result<Submitted, SubmitError> {
    let orchestrator = Orchestrator::new(Client::new(backend));
    let (submission, opt) = plan.prepare()?;
    orchestrator.submit(submission, opt).await
  }

  #[tokio::test]
  async fn direct_submission_succeeds() {
    let backend = Arc::new(FakeBackend::default());
    let response = submit_with(backend.clone(), plan(SubmitMode::Direct, CachePlacement::Outer))
      .await
      .unwrap();

    assert_eq!(
      response.exporter_response.get("local.path").map(String::as_str),
      Some("result")
    );
    assert_eq!(backend.calls(), vec!["evaluate", "export:local", "export_cache:test-cache", "release"]);
  }

  #[tokio::test]
  async fn callback_outer_placement_imports_once() {
    let backend = Arc::new(FakeBackend::default());
    submit_with(backend.clone(), plan(SubmitMode::Callback, CachePlacement::Outer))
      .await
      .unwrap();

    assert_eq!(backend.evaluated_imports(), vec![vec![gha()]]);
  }

  #[tokio::test]
  async fn callback_inner_placement_reaches_gateway_solve() {
    let backend = Arc::new(FakeBackend::default());
    submit_with(backend.clone(), plan(SubmitMode::Callback, CachePlacement::Inner))
      .await
      .unwrap();

    assert_eq!(backend.evaluated_imports(), vec![vec![gha()]]);
  }

  #[tokio::test]
  async fn callback_both_placement_is_deduplicated() {
    let backend = Arc::new(FakeBackend::default());
    submit_with(backend.clone(), plan(SubmitMode::Callback, CachePlacement::Both))
      .await
      .unwrap();

    assert_eq!(backend.evaluated_imports(), vec![vec![gha()]]);
  }

  #[tokio::test]
  async fn neither_placement_imports_nothing() {
    let backend = Arc::new(FakeBackend::default());
    submit_with(backend.clone(), plan(SubmitMode::Callback, CachePlacement::Neither))
      .await
      .unwrap();

    assert_eq!(backend.evaluated_imports(), vec![Vec::<CacheOptionsEntry>::new()]);
  }

  #[tokio::test]
  async fn execution_failure_is_surfaced() {
    let backend = Arc::new(FakeBackend::failing(FailAt::Evaluate));
    let err = submit_with(backend.clone(), plan(SubmitMode::Callback, CachePlacement::Outer))
      .await
      .unwrap_err();

    assert!(matches!(
      err,
      SubmitError::Solve(SolveError::Backend(BackendError::ExecFailed { code: 1, .. }))
    ));
    assert_eq!(backend.calls(), vec!["evaluate"]);
  }

  #[tokio::test]
  async fn cache_export_failure_is_surfaced() {
    let backend = Arc::new(FakeBackend::failing(FailAt::ExportCache));
    let err = submit_with(backend.clone(), plan(SubmitMode::Direct, CachePlacement::Outer))
      .await
      .unwrap_err();

    assert!(err.to_string().contains("cache backend unavailable"));
    assert_eq!(backend.calls().last().map(String::as_str), Some("release"));
  }

  #[tokio::test]
  async fn status_past_capacity_is_drained_during_submission() {
    let lines = STATUS_CHANNEL_CAPACITY * 4;
    let backend = Arc::new(FakeBackend::default().with_log_lines(lines));

    let submitted = timeout(
      Duration::from_secs(10),
      submit_reporting(backend.clone(), plan(SubmitMode::Direct, CachePlacement::Outer)),
    )
    .await
    .expect("submission blocked on a full status channel")
    .unwrap();

    // Log lines plus one completion per op.
    assert_eq!(submitted.status.events, lines + 2);
    assert_eq!(submitted.status.completed, 2);
    assert_eq!(backend.calls().last().map(String::as_str), Some("release"));
  }

  #[tokio::test]
  async fn failing_submission_past_capacity_still_returns() {
    let lines = STATUS_CHANNEL_CAPACITY * 4;
    let backend = Arc::new(FakeBackend::failing(FailAt::Evaluate).with_log_lines(lines));

    let err = timeout(
      Duration::from_secs(10),
      submit_with(backend.clone(), plan(SubmitMode::Callback, CachePlacement::Outer)),
    )
    .await
    .expect("failed submission did not return")
    .unwrap_err();

    assert!(matches!(
      err,
      SubmitError::Solve(SolveError::Backend(BackendError::ExecFailed { .. }))
    ));
  }
}
