//! Build graph construction.
//!
//! A build graph is an immutable chain (or tree) of operations: image sources
//! at the leaves, commands run on top of them. Graphs are built with [`State`]
//! and serialized with [`Definition::marshal`] into a content-addressed list of
//! ops that the executor evaluates.
//!
//! ```no_run
//! use solvekit_lib::llb::{Definition, Shlex, State};
//! use solvekit_lib::platform::Platform;
//!
//! let state = State::image("alpine").user("root").run(Shlex::new("echo -n test"));
//! let def = Definition::marshal(&state, Platform::LINUX_ARM64)?;
//! def.write_to(std::io::stdout())?;
//! # Ok::<(), solvekit_lib::llb::GraphError>(())
//! ```

mod definition;
mod op;
mod reference;
mod state;

use thiserror::Error;

use crate::platform::Platform;
use crate::util::hash::Digest;

pub use definition::Definition;
pub use op::{ExecOp, Op, OpDef};
pub use reference::ImageReference;
pub use state::{Shlex, State};

/// Errors raised while building or serializing a build graph.
#[derive(Debug, Error)]
pub enum GraphError {
  /// An image reference could not be parsed.
  #[error("invalid image reference {reference:?}: {reason}")]
  InvalidReference { reference: String, reason: &'static str },

  /// A run command could not be split into words.
  #[error("invalid command {0:?}: unterminated quote or escape")]
  InvalidCommand(String),

  /// A run command split into zero words.
  #[error("run command is empty")]
  EmptyCommand,

  /// The graph has no operations (e.g. a scratch state was marshalled).
  #[error("definition has no operations")]
  EmptyDefinition,

  /// An op names an input that is not defined before it.
  #[error("op {op} references unresolved input {input}")]
  UnresolvedInput { op: Digest, input: Digest },

  /// The definition output does not name one of its ops.
  #[error("output {0} does not reference an op in the definition")]
  UnresolvedOutput(Digest),

  /// A recorded op digest does not match the op content.
  #[error("op digest mismatch: recorded {recorded}, computed {computed}")]
  DigestMismatch { recorded: Digest, computed: Digest },

  /// The same op appears twice in a definition.
  #[error("duplicate op {0}")]
  DuplicateOp(Digest),

  #[error("serialization failed: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("failed to write definition: {0}")]
  Io(#[from] std::io::Error),
}

/// Build the two-op graph "start from `base_image`, run `command`" for `platform`.
pub fn build_graph(base_image: &str, command: &str, platform: Platform) -> Result<Definition, GraphError> {
  let state = State::image(base_image).run(Shlex::new(command));
  Definition::marshal(&state, platform)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::consts::{DEFAULT_COMMAND, DEFAULT_IMAGE};

  #[test]
  fn default_graph_is_image_then_run() {
    let def = build_graph(DEFAULT_IMAGE, DEFAULT_COMMAND, Platform::LINUX_AMD64).unwrap();

    assert_eq!(def.ops.len(), 2);
    assert!(matches!(def.ops[0].op, Op::Source { .. }));
    assert_eq!(def.ops[1].inputs, vec![def.ops[0].digest.clone()]);
    assert_eq!(def.output, def.ops[1].digest);
    assert_eq!(def.platform(), Some(Platform::LINUX_AMD64));

    match &def.ops[1].op {
      Op::Exec(exec) => {
        assert_eq!(exec.args, vec!["sh", "-c", "sleep 10 && echo -n test > /test"]);
      }
      other => panic!("expected exec op, got {:?}", other),
    }
  }

  #[test]
  fn bad_command_surfaces_error() {
    let err = build_graph(DEFAULT_IMAGE, r#"sh -c "unterminated"#, Platform::LINUX_AMD64).unwrap_err();
    assert!(matches!(err, GraphError::InvalidCommand(_)));
  }
}
