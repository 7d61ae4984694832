use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::GraphError;
use crate::platform::Platform;
use crate::util::hash::{Digest, Hashable};

/// Scheme prefix of image source identifiers.
pub const DOCKER_IMAGE_SCHEME: &str = "docker-image://";

/// A single build operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Op {
  /// Produces a filesystem from an external source, e.g. `docker-image://docker.io/library/alpine:latest`.
  Source {
    identifier: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attrs: BTreeMap<String, String>,
  },
  /// Runs a process on top of its single input filesystem.
  Exec(ExecOp),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOp {
  /// Full argv; `args[0]` is the executable.
  pub args: Vec<String>,
  /// `KEY=value` entries.
  pub env: Vec<String>,
  pub cwd: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user: Option<String>,
}

impl Op {
  /// Human readable vertex name used in status events.
  pub fn display_name(&self) -> String {
    match self {
      Op::Source { identifier, .. } => identifier.clone(),
      Op::Exec(exec) => shlex::try_join(exec.args.iter().map(String::as_str)).unwrap_or_else(|_| exec.args.join(" ")),
    }
  }

  /// The image reference of a `docker-image://` source.
  pub fn image_reference(&self) -> Option<&str> {
    match self {
      Op::Source { identifier, .. } => identifier.strip_prefix(DOCKER_IMAGE_SCHEME),
      Op::Exec(_) => None,
    }
  }
}

/// An op together with its content digest and input edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpDef {
  pub digest: Digest,
  pub op: Op,
  /// Digests of the ops whose outputs this op consumes.
  pub inputs: Vec<Digest>,
  pub platform: Platform,
}

/// The digested part of an op; the digest itself is excluded.
#[derive(Serialize)]
struct OpContent<'a> {
  op: &'a Op,
  inputs: &'a [Digest],
  platform: Platform,
}

impl Hashable for OpContent<'_> {}

impl OpDef {
  pub fn new(op: Op, inputs: Vec<Digest>, platform: Platform) -> Result<Self, GraphError> {
    let digest = OpContent {
      op: &op,
      inputs: &inputs,
      platform,
    }
    .compute_digest()?;

    Ok(Self {
      digest,
      op,
      inputs,
      platform,
    })
  }

  /// Recompute the digest and compare it against the recorded one.
  pub fn verify(&self) -> Result<(), GraphError> {
    let computed = OpContent {
      op: &self.op,
      inputs: &self.inputs,
      platform: self.platform,
    }
    .compute_digest()?;

    if computed != self.digest {
      return Err(GraphError::DigestMismatch {
        recorded: self.digest.clone(),
        computed,
      });
    }
    Ok(())
  }
}
