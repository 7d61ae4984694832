//! Immutable graph-building handles.

use std::sync::Arc;

use super::GraphError;
use super::op::{DOCKER_IMAGE_SCHEME, ExecOp, Op};
use super::reference::ImageReference;
use crate::consts::DEFAULT_PATH_ENV;

/// A shell-style command line, split into words when the graph is marshalled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shlex(String);

impl Shlex {
  pub fn new(command: impl Into<String>) -> Self {
    Self(command.into())
  }

  pub fn split(&self) -> Result<Vec<String>, GraphError> {
    let words = shlex::split(&self.0).ok_or_else(|| GraphError::InvalidCommand(self.0.clone()))?;
    if words.is_empty() {
      return Err(GraphError::EmptyCommand);
    }
    Ok(words)
  }
}

impl From<&str> for Shlex {
  fn from(command: &str) -> Self {
    Shlex::new(command)
  }
}

#[derive(Debug)]
pub(crate) enum NodeKind {
  Image {
    reference: String,
  },
  Exec {
    command: Shlex,
    env: Vec<(String, String)>,
    cwd: String,
    user: Option<String>,
  },
}

impl NodeKind {
  pub(crate) fn to_op(&self) -> Result<Op, GraphError> {
    match self {
      NodeKind::Image { reference } => {
        let normalized = ImageReference::parse(reference)?;
        Ok(Op::Source {
          identifier: format!("{}{}", DOCKER_IMAGE_SCHEME, normalized),
          attrs: Default::default(),
        })
      }
      NodeKind::Exec {
        command,
        env,
        cwd,
        user,
      } => Ok(Op::Exec(ExecOp {
        args: command.split()?,
        env: env.iter().map(|(k, v)| format!("{}={}", k, v)).collect(),
        cwd: cwd.clone(),
        user: user.clone(),
      })),
    }
  }
}

#[derive(Debug)]
pub(crate) struct Node {
  pub(crate) kind: NodeKind,
  pub(crate) inputs: Vec<Arc<Node>>,
}

/// A point in a build graph plus the process settings inherited by later runs.
///
/// States are immutable: every builder method returns a new state and leaves
/// the receiver untouched, so one state can parent several branches.
#[derive(Debug, Clone)]
pub struct State {
  node: Option<Arc<Node>>,
  env: Vec<(String, String)>,
  cwd: String,
  user: Option<String>,
}

impl State {
  /// An empty filesystem.
  pub fn scratch() -> Self {
    Self {
      node: None,
      env: Vec::new(),
      cwd: "/".to_string(),
      user: None,
    }
  }

  /// A filesystem pulled from a container image.
  pub fn image(reference: impl Into<String>) -> Self {
    let (key, value) = DEFAULT_PATH_ENV.split_once('=').unwrap_or(("PATH", ""));
    Self {
      node: Some(Arc::new(Node {
        kind: NodeKind::Image {
          reference: reference.into(),
        },
        inputs: Vec::new(),
      })),
      env: vec![(key.to_string(), value.to_string())],
      cwd: "/".to_string(),
      user: None,
    }
  }

  pub fn user(&self, user: impl Into<String>) -> Self {
    let mut next = self.clone();
    next.user = Some(user.into());
    next
  }

  /// Set the working directory; relative paths resolve against the current one.
  pub fn dir(&self, dir: &str) -> Self {
    let mut next = self.clone();
    next.cwd = if dir.starts_with('/') {
      dir.to_string()
    } else {
      format!("{}/{}", self.cwd.trim_end_matches('/'), dir)
    };
    next
  }

  pub fn env(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
    let key = key.into();
    let mut next = self.clone();
    next.env.retain(|(k, _)| *k != key);
    next.env.push((key, value.into()));
    next
  }

  /// Run a command on top of this state's filesystem.
  pub fn run(&self, command: impl Into<Shlex>) -> Self {
    let mut next = self.clone();
    next.node = Some(Arc::new(Node {
      kind: NodeKind::Exec {
        command: command.into(),
        env: self.env.clone(),
        cwd: self.cwd.clone(),
        user: self.user.clone(),
      },
      inputs: self.node.iter().cloned().collect(),
    }));
    next
  }

  pub(crate) fn node(&self) -> Option<&Arc<Node>> {
    self.node.as_ref()
  }
}
