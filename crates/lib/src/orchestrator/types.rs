use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::cache::CacheOptionsEntry;
use crate::client::{BuildFunc, ExportEntry, Gateway, GatewayResult, SolveError, SolveOpt, SolveRequest};
use crate::llb::{Definition, GraphError, Shlex, State};
use crate::platform::Platform;
use crate::session::Session;

/// How a graph reaches the build service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
  /// A pre-built definition is submitted with the options.
  Direct,
  /// A build function constructs and solves the graph through a gateway.
  Callback,
}

/// Which request carries the cache import descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePlacement {
  /// Only the submission options.
  Outer,
  /// Only the gateway solve request.
  Inner,
  /// Independent copies on both.
  Both,
  Neither,
}

impl CachePlacement {
  /// Split `entries` into (outer, inner) lists.
  pub fn split(self, entries: &[CacheOptionsEntry]) -> (Vec<CacheOptionsEntry>, Vec<CacheOptionsEntry>) {
    match self {
      CachePlacement::Outer => (entries.to_vec(), Vec::new()),
      CachePlacement::Inner => (Vec::new(), entries.to_vec()),
      CachePlacement::Both => (entries.to_vec(), entries.to_vec()),
      CachePlacement::Neither => (Vec::new(), Vec::new()),
    }
  }
}

/// What a submission executes.
#[derive(Debug, Clone)]
pub enum Submission {
  Direct(Definition),
  Callback(Arc<dyn BuildFunc>),
}

/// Build function that starts from `image` and runs `command`.
///
/// The graph is rebuilt on every invocation.
#[derive(Debug, Clone)]
pub struct ImageCommandBuild {
  pub image: String,
  pub user: Option<String>,
  pub command: String,
  pub platform: Platform,
  /// Imports attached to the gateway solve request.
  pub cache_imports: Vec<CacheOptionsEntry>,
}

impl ImageCommandBuild {
  pub fn state(&self) -> State {
    let mut state = State::image(self.image.as_str());
    if let Some(user) = &self.user {
      state = state.user(user.as_str());
    }
    state.run(Shlex::new(self.command.as_str()))
  }

  pub fn definition(&self) -> Result<Definition, GraphError> {
    Definition::marshal(&self.state(), self.platform)
  }
}

#[async_trait]
impl BuildFunc for ImageCommandBuild {
  async fn build(&self, gateway: &Gateway) -> Result<GatewayResult, SolveError> {
    let definition = self.definition()?;
    gateway
      .solve(SolveRequest {
        definition,
        cache_imports: self.cache_imports.clone(),
      })
      .await
  }
}

/// Everything needed to submit one image-plus-command build.
#[derive(Debug, Clone)]
pub struct BuildPlan {
  pub mode: SubmitMode,
  pub placement: CachePlacement,
  pub image: String,
  pub user: Option<String>,
  pub command: String,
  pub platform: Platform,
  pub output_dir: PathBuf,
  pub cache_imports: Vec<CacheOptionsEntry>,
  pub cache_exports: Vec<CacheOptionsEntry>,
  pub session: Session,
}

impl BuildPlan {
  /// Produce the submission and its options.
  ///
  /// Direct submissions have no inner request; inner imports are dropped.
  pub fn prepare(self) -> Result<(Submission, SolveOpt), GraphError> {
    let (outer, inner) = self.placement.split(&self.cache_imports);

    let build = ImageCommandBuild {
      image: self.image,
      user: self.user,
      command: self.command,
      platform: self.platform,
      cache_imports: inner,
    };

    let submission = match self.mode {
      SubmitMode::Direct => {
        if !build.cache_imports.is_empty() {
          warn!(
            dropped = build.cache_imports.len(),
            placement = ?self.placement,
            "direct submissions have no inner request; dropping inner cache imports"
          );
        }
        Submission::Direct(build.definition()?)
      }
      SubmitMode::Callback => Submission::Callback(Arc::new(build)),
    };

    let opt = SolveOpt {
      exports: vec![ExportEntry::local(self.output_dir)],
      cache_imports: outer,
      cache_exports: self.cache_exports,
      session: self.session,
    };

    Ok((submission, opt))
  }
}
