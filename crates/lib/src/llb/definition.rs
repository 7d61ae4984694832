use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::GraphError;
use super::op::OpDef;
use super::state::{Node, State};
use crate::platform::Platform;
use crate::util::hash::Digest;

/// A serialized build graph.
///
/// Ops are ordered leaves first, so every input digest refers to an op that
/// appears earlier in `ops`. `output` names the op whose result is the build
/// result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
  pub ops: Vec<OpDef>,
  pub output: Digest,
}

impl Definition {
  /// Serialize the graph ending at `state` for `platform`.
  ///
  /// Shared parents are emitted once.
  pub fn marshal(state: &State, platform: Platform) -> Result<Self, GraphError> {
    let root = state.node().ok_or(GraphError::EmptyDefinition)?;

    let mut marshaller = Marshaller {
      platform,
      ops: Vec::new(),
      emitted: HashSet::new(),
      visited: HashMap::new(),
    };
    let output = marshaller.visit(root)?;

    Ok(Self {
      ops: marshaller.ops,
      output,
    })
  }

  pub fn to_bytes(&self) -> Result<Vec<u8>, GraphError> {
    Ok(serde_json::to_vec(self)?)
  }

  /// Parse and validate a serialized definition.
  pub fn from_bytes(bytes: &[u8]) -> Result<Self, GraphError> {
    let def: Definition = serde_json::from_slice(bytes)?;
    def.validate()?;
    Ok(def)
  }

  /// Write the serialized definition to `writer`.
  pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), GraphError> {
    writer.write_all(&self.to_bytes()?)?;
    writer.flush()?;
    Ok(())
  }

  /// Check digests, input ordering and the output reference.
  pub fn validate(&self) -> Result<(), GraphError> {
    if self.ops.is_empty() {
      return Err(GraphError::EmptyDefinition);
    }

    let mut defined: HashSet<&Digest> = HashSet::new();
    for op in &self.ops {
      op.verify()?;

      if let Some(input) = op.inputs.iter().find(|input| !defined.contains(input)) {
        return Err(GraphError::UnresolvedInput {
          op: op.digest.clone(),
          input: input.clone(),
        });
      }

      if !defined.insert(&op.digest) {
        return Err(GraphError::DuplicateOp(op.digest.clone()));
      }
    }

    if !defined.contains(&self.output) {
      return Err(GraphError::UnresolvedOutput(self.output.clone()));
    }
    Ok(())
  }

  pub fn op(&self, digest: &Digest) -> Option<&OpDef> {
    self.ops.iter().find(|op| &op.digest == digest)
  }

  pub fn output_op(&self) -> Option<&OpDef> {
    self.op(&self.output)
  }

  /// Platform of the output op.
  pub fn platform(&self) -> Option<Platform> {
    self.output_op().map(|op| op.platform)
  }
}

struct Marshaller {
  platform: Platform,
  ops: Vec<OpDef>,
  emitted: HashSet<Digest>,
  visited: HashMap<*const Node, Digest>,
}

impl Marshaller {
  fn visit(&mut self, node: &Arc<Node>) -> Result<Digest, GraphError> {
    if let Some(digest) = self.visited.get(&Arc::as_ptr(node)) {
      return Ok(digest.clone());
    }

    let mut inputs = Vec::with_capacity(node.inputs.len());
    for input in &node.inputs {
      inputs.push(self.visit(input)?);
    }

    let def = OpDef::new(node.kind.to_op()?, inputs, self.platform)?;
    let digest = def.digest.clone();

    // Structurally identical nodes built separately share a digest.
    if self.emitted.insert(digest.clone()) {
      self.ops.push(def);
    }
    self.visited.insert(Arc::as_ptr(node), digest.clone());

    Ok(digest)
  }
}
