//! Build progress events and the drain that consumes them.
//!
//! The executor sends [`SolveStatus`] batches while a submission runs. Nothing
//! in this crate interprets them beyond logging; [`drain`] exists so the
//! producer always has a live reader.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::consts::STATUS_CHANNEL_CAPACITY;
use crate::util::hash::Digest;

pub type StatusSender = mpsc::Sender<SolveStatus>;
pub type StatusReceiver = mpsc::Receiver<SolveStatus>;

/// One batch of progress updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveStatus {
  pub vertexes: Vec<Vertex>,
  pub logs: Vec<VertexLog>,
  pub warnings: Vec<String>,
}

impl SolveStatus {
  pub fn vertex(vertex: Vertex) -> Self {
    Self {
      vertexes: vec![vertex],
      ..Default::default()
    }
  }

  pub fn log(log: VertexLog) -> Self {
    Self {
      logs: vec![log],
      ..Default::default()
    }
  }

  pub fn warning(message: impl Into<String>) -> Self {
    Self {
      warnings: vec![message.into()],
      ..Default::default()
    }
  }
}

/// State of one op in the graph being evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
  pub digest: Digest,
  pub name: String,
  pub started: Option<DateTime<Utc>>,
  pub completed: Option<DateTime<Utc>>,
  pub cached: bool,
  pub error: Option<String>,
}

impl Vertex {
  pub fn started(digest: Digest, name: impl Into<String>) -> Self {
    Self {
      digest,
      name: name.into(),
      started: Some(Utc::now()),
      completed: None,
      cached: false,
      error: None,
    }
  }

  /// Mark the vertex finished. `error` is set when it failed.
  pub fn complete(mut self, cached: bool, error: Option<String>) -> Self {
    self.completed = Some(Utc::now());
    self.cached = cached;
    self.error = error;
    self
  }
}

/// A chunk of process output. `stream` is 1 for stdout, 2 for stderr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexLog {
  pub vertex: Digest,
  pub stream: u8,
  pub data: Vec<u8>,
}

/// Counts gathered while draining.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
  pub events: usize,
  pub completed: usize,
  pub cached: usize,
}

pub fn status_channel() -> (StatusSender, StatusReceiver) {
  mpsc::channel(STATUS_CHANNEL_CAPACITY)
}

/// Consume events until every sender is dropped.
pub async fn drain(mut rx: StatusReceiver) -> DrainSummary {
  let mut summary = DrainSummary::default();

  while let Some(status) = rx.recv().await {
    summary.events += 1;

    for vertex in &status.vertexes {
      if vertex.completed.is_none() {
        continue;
      }
      summary.completed += 1;
      if vertex.cached {
        summary.cached += 1;
      }
      match &vertex.error {
        Some(error) => warn!(digest = %vertex.digest, name = %vertex.name, error = %error, "vertex failed"),
        None => debug!(digest = %vertex.digest, name = %vertex.name, cached = vertex.cached, "vertex completed"),
      }
    }

    for log in &status.logs {
      trace!(
        digest = %log.vertex,
        stream = log.stream,
        data = %String::from_utf8_lossy(&log.data),
        "vertex log"
      );
    }

    for warning in &status.warnings {
      debug!(warning = %warning, "executor warning");
    }
  }

  debug!(events = summary.events, completed = summary.completed, cached = summary.cached, "status stream closed");
  summary
}
