//! Implementation of the `solvekit build*` commands.
//!
//! Every variant prints the cache descriptors, submits one build, then prints
//! the elapsed time. A failed submission is reported on stdout and does not
//! change the exit status.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use solvekit_lib::cache::{CacheOptionsEntry, DisplayEntries};
use solvekit_lib::client::{Client, connect};
use solvekit_lib::config::RemoteServiceConfig;
use solvekit_lib::consts::{
  CALLBACK_IMAGE, CALLBACK_USER, DEFAULT_CACHE_SCOPE, DEFAULT_COMMAND, DEFAULT_IMAGE, DEFAULT_OUTPUT_DIR,
};
use solvekit_lib::orchestrator::{BuildPlan, CachePlacement, Orchestrator, SubmitError, SubmitMode, Submitted};
use solvekit_lib::platform::Platform;
use solvekit_lib::session::{DockerAuthProvider, Session};

use crate::output::{format_elapsed, print_failure, print_success};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildVariant {
  /// `build`: build function, imports on the submission options.
  Callback,
  /// `build-wrapped`: build function, imports on the options and the gateway request.
  Wrapped,
  /// `build-simple`: pre-built definition, imports on the options.
  Simple,
}

impl BuildVariant {
  pub fn mode(self) -> SubmitMode {
    match self {
      BuildVariant::Callback | BuildVariant::Wrapped => SubmitMode::Callback,
      BuildVariant::Simple => SubmitMode::Direct,
    }
  }

  pub fn placement(self) -> CachePlacement {
    match self {
      BuildVariant::Callback | BuildVariant::Simple => CachePlacement::Outer,
      BuildVariant::Wrapped => CachePlacement::Both,
    }
  }

  fn plan(self, cache: CacheOptionsEntry, session: Session) -> BuildPlan {
    let (image, user, platform) = match self.mode() {
      SubmitMode::Callback => (CALLBACK_IMAGE, Some(CALLBACK_USER.to_string()), Platform::LINUX_ARM64),
      SubmitMode::Direct => (DEFAULT_IMAGE, None, Platform::LINUX_AMD64),
    };

    BuildPlan {
      mode: self.mode(),
      placement: self.placement(),
      image: image.to_string(),
      user,
      command: DEFAULT_COMMAND.to_string(),
      platform,
      output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
      cache_imports: vec![cache.clone()],
      cache_exports: vec![cache],
      session,
    }
  }
}

/// Execute one of the build commands.
pub fn cmd_build(variant: BuildVariant) -> Result<()> {
  let config = RemoteServiceConfig::from_env();
  let client = connect(&config.host_address).context("Failed to connect to build service")?;

  let session = Session::new(vec![Arc::new(DockerAuthProvider::new())]);
  let plan = variant.plan(config.cache_descriptor(DEFAULT_CACHE_SCOPE), session);

  let started = Instant::now();
  println!("Cache imports: {}", DisplayEntries(&plan.cache_imports));
  println!("Cache exports: {}", DisplayEntries(&plan.cache_exports));

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt.block_on(submit(client, plan));

  println!("Done in {}", format_elapsed(started.elapsed()));
  match outcome {
    Ok(Submitted { response, status }) => {
      if let Some(path) = response.exporter_response.get("local.path") {
        print_success(&format!("Exported to {}", path));
      }
      info!(
        response = ?response.exporter_response,
        steps = status.completed,
        cached = status.cached,
        "build succeeded"
      );
    }
    Err(err) => print_failure(&err.to_string()),
  }

  Ok(())
}

async fn submit(client: Client, plan: BuildPlan) -> Result<Submitted, SubmitError> {
  let (submission, opt) = plan.prepare()?;
  Orchestrator::new(client).submit(submission, opt).await
}
