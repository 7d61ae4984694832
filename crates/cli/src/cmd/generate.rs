//! Implementation of the `solvekit generate` command.

use anyhow::{Context, Result};

use solvekit_lib::consts::{DEFAULT_COMMAND, DEFAULT_IMAGE};
use solvekit_lib::llb::build_graph;
use solvekit_lib::platform::Platform;

/// Write the serialized amd64 definition of the default image and command to stdout.
pub fn cmd_generate() -> Result<()> {
  let definition =
    build_graph(DEFAULT_IMAGE, DEFAULT_COMMAND, Platform::LINUX_AMD64).context("Failed to build graph")?;

  definition
    .write_to(std::io::stdout().lock())
    .context("Failed to write definition")?;
  Ok(())
}
