use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::{
  Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
  WaitContainerOptions,
};
use bollard::image::{CommitContainerOptions, CreateImageOptions, RemoveImageOptions, TagImageOptions};
use futures::StreamExt;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::{Backend, BackendError, ConnectError, Endpoint, ExporterResponse, ResultRef, SolveContext, StepRef};
use crate::cache::CacheOptionsEntry;
use crate::client::ExportEntry;
use crate::consts::{APP_NAME, BUILD_REPO, CACHE_REPO_PREFIX, ENGINE_TIMEOUT_SECS};
use crate::llb::{Definition, ExecOp, ImageReference, Op, OpDef};
use crate::status::{SolveStatus, Vertex, VertexLog};
use crate::util::hash::{Digest, hash_directory};

/// Executes definitions on a Docker engine.
///
/// Each exec op runs in a fresh container created from its parent's image and
/// is committed to `solvekit/build:<digest>`. Cache records are image tags
/// under `solvekit-cache/<namespace>`.
///
/// A `docker-container://` endpoint uses the local engine and requires the
/// named container to be running before the first evaluation.
#[derive(Debug, Clone)]
pub struct DockerBackend {
  docker: Docker,
  container: Option<String>,
  container_checked: Arc<OnceCell<()>>,
}

impl DockerBackend {
  /// Configure a client for `endpoint`. No request is made until the first call.
  pub fn connect(endpoint: &Endpoint) -> Result<Self, ConnectError> {
    let docker = match endpoint {
      Endpoint::LocalDefaults | Endpoint::Container(_) => Docker::connect_with_local_defaults()?,
      #[cfg(unix)]
      Endpoint::Unix(path) => {
        Docker::connect_with_unix(&path.to_string_lossy(), ENGINE_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)?
      }
      #[cfg(not(unix))]
      Endpoint::Unix(path) => {
        return Err(ConnectError::UnsupportedScheme {
          address: path.display().to_string(),
          scheme: "unix".to_string(),
        });
      }
      Endpoint::Http(address) => Docker::connect_with_http(address, ENGINE_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)?,
    };

    debug!(?endpoint, "configured engine client");
    let container = match endpoint {
      Endpoint::Container(name) => Some(name.clone()),
      _ => None,
    };
    Ok(Self {
      docker: docker.with_timeout(Duration::from_secs(ENGINE_TIMEOUT_SECS)),
      container,
      container_checked: Arc::default(),
    })
  }

  /// Confirm the endpoint's container is running. Checked once per backend.
  async fn check_container(&self) -> Result<(), BackendError> {
    let Some(name) = &self.container else {
      return Ok(());
    };

    self
      .container_checked
      .get_or_try_init(|| async {
        let unavailable = |message: String| BackendError::ContainerUnavailable {
          name: name.clone(),
          message,
        };
        let details = self
          .docker
          .inspect_container(name, None::<InspectContainerOptions>)
          .await
          .map_err(|e| unavailable(e.to_string()))?;
        if !details.state.and_then(|state| state.running).unwrap_or(false) {
          return Err(unavailable("container is not running".to_string()));
        }
        debug!(container = %name, "build container is running");
        Ok(())
      })
      .await?;
    Ok(())
  }

  #[instrument(skip_all, fields(image = %reference))]
  async fn pull(&self, op: &OpDef, reference: &str, ctx: &SolveContext) -> Result<(), BackendError> {
    let registry = ImageReference::parse(reference)?.domain;
    let credentials = ctx.session.credentials(&registry)?.map(|creds| DockerCredentials {
      username: creds.username,
      password: creds.password,
      identitytoken: creds.identity_token,
      serveraddress: Some(creds.server_address),
      ..Default::default()
    });

    let options = CreateImageOptions {
      from_image: reference.to_string(),
      platform: op.platform.oci_string(),
      ..Default::default()
    };

    let mut progress = pin!(self.docker.create_image(Some(options), None, credentials));
    while let Some(info) = progress.next().await {
      let info = info.map_err(|e| BackendError::Pull {
        image: reference.to_string(),
        message: e.to_string(),
      })?;
      if let Some(status) = info.status {
        let line = match info.id {
          Some(id) => format!("{}: {}\n", id, status),
          None => format!("{}\n", status),
        };
        send(ctx, SolveStatus::log(VertexLog {
          vertex: op.digest.clone(),
          stream: 1,
          data: line.into_bytes(),
        }))
        .await;
      }
    }

    info!("pulled image");
    Ok(())
  }

  /// Find a cached result for `digest` in any import namespace.
  async fn lookup_cache(&self, digest: &Digest, ctx: &SolveContext) -> Option<String> {
    for namespace in ctx.cache_imports.iter().filter_map(CacheOptionsEntry::namespace) {
      let candidate = cache_image(namespace, digest);
      if self.docker.inspect_image(&candidate).await.is_ok() {
        return Some(candidate);
      }
      trace!(image = %candidate, "cache miss");
    }
    None
  }

  #[instrument(skip_all, fields(digest = %op.digest))]
  async fn exec(&self, op: &OpDef, exec: &ExecOp, parent: &str, ctx: &SolveContext) -> Result<StepRef, BackendError> {
    if let Some(image) = self.lookup_cache(&op.digest, ctx).await {
      debug!(%image, "reusing cached result");
      return Ok(StepRef {
        digest: op.digest.clone(),
        image,
        cached: true,
      });
    }

    let (entrypoint, cmd) = exec
      .args
      .split_first()
      .ok_or_else(|| BackendError::Unsupported(format!("exec op {} has no arguments", op.digest)))?;

    let config = Config {
      image: Some(parent.to_string()),
      entrypoint: Some(vec![entrypoint.clone()]),
      cmd: Some(cmd.to_vec()),
      env: Some(exec.env.clone()),
      user: exec.user.clone(),
      working_dir: Some(exec.cwd.clone()),
      ..Default::default()
    };

    let name = container_name();
    let platform = op.platform.oci_string();
    self
      .docker
      .create_container(
        Some(CreateContainerOptions {
          name: name.as_str(),
          platform: Some(platform.as_str()),
        }),
        config,
      )
      .await?;

    let outcome = match self.run_container(&name, op, ctx).await {
      Ok(()) => self.commit(&name, &op.digest).await,
      Err(e) => Err(e),
    };
    self.remove_container(&name).await;

    Ok(StepRef {
      digest: op.digest.clone(),
      image: outcome?,
      cached: false,
    })
  }

  async fn run_container(&self, name: &str, op: &OpDef, ctx: &SolveContext) -> Result<(), BackendError> {
    self.docker.start_container::<String>(name, None).await?;

    let options = LogsOptions::<String> {
      follow: true,
      stdout: true,
      stderr: true,
      ..Default::default()
    };
    let mut logs = pin!(self.docker.logs(name, Some(options)));
    while let Some(output) = logs.next().await {
      let (stream, message) = match output? {
        LogOutput::StdOut { message } => (1, message),
        LogOutput::StdErr { message } => (2, message),
        _ => continue,
      };
      send(ctx, SolveStatus::log(VertexLog {
        vertex: op.digest.clone(),
        stream,
        data: message.to_vec(),
      }))
      .await;
    }

    let mut wait = pin!(self.docker.wait_container(name, None::<WaitContainerOptions<String>>));
    let code = match wait.next().await {
      Some(Ok(response)) => response.status_code,
      Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
      Some(Err(e)) => return Err(e.into()),
      None => 0,
    };

    if code != 0 {
      return Err(BackendError::ExecFailed {
        name: op.op.display_name(),
        code,
      });
    }
    Ok(())
  }

  async fn commit(&self, container: &str, digest: &Digest) -> Result<String, BackendError> {
    self
      .docker
      .commit_container(
        CommitContainerOptions {
          container: container.to_string(),
          repo: BUILD_REPO.to_string(),
          tag: digest.short().to_string(),
          pause: true,
          ..Default::default()
        },
        Config::<String>::default(),
      )
      .await?;
    Ok(build_image(digest))
  }

  async fn remove_container(&self, name: &str) {
    let options = RemoveContainerOptions {
      v: true,
      force: true,
      ..Default::default()
    };
    if let Err(e) = self.docker.remove_container(name, Some(options)).await {
      warn!(container = name, error = %e, "could not remove container");
    }
  }

  /// The flattened filesystem of `image` as a tar archive.
  async fn export_filesystem(&self, image: &str) -> Result<Vec<u8>, BackendError> {
    let name = container_name();
    let config = Config {
      image: Some(image.to_string()),
      entrypoint: Some(vec!["/bin/true".to_string()]),
      ..Default::default()
    };
    self
      .docker
      .create_container(
        Some(CreateContainerOptions {
          name: name.as_str(),
          platform: None,
        }),
        config,
      )
      .await?;

    let archive = self.collect_archive(&name).await;
    self.remove_container(&name).await;
    archive
  }

  async fn collect_archive(&self, container: &str) -> Result<Vec<u8>, BackendError> {
    let mut archive = Vec::new();
    let mut chunks = pin!(self.docker.export_container(container));
    while let Some(chunk) = chunks.next().await {
      archive.extend_from_slice(&chunk?);
    }
    Ok(archive)
  }
}

#[async_trait]
impl Backend for DockerBackend {
  async fn evaluate(&self, definition: &Definition, ctx: &SolveContext) -> Result<ResultRef, BackendError> {
    definition.validate()?;
    self.check_container().await?;

    let mut images: HashMap<&Digest, String> = HashMap::new();
    let mut steps = Vec::new();

    for op in &definition.ops {
      let name = op.op.display_name();
      send(ctx, SolveStatus::vertex(Vertex::started(op.digest.clone(), &name))).await;

      let evaluated = match &op.op {
        Op::Source { identifier, .. } => match op.op.image_reference() {
          Some(reference) => self.pull(op, reference, ctx).await.map(|()| (reference.to_string(), false)),
          None => Err(BackendError::Unsupported(format!("source {}", identifier))),
        },
        Op::Exec(exec) => match op.inputs.as_slice() {
          [input] => match images.get(input) {
            Some(parent) => self.exec(op, exec, parent, ctx).await.map(|step| {
              let cached = step.cached;
              let image = step.image.clone();
              steps.push(step);
              (image, cached)
            }),
            None => Err(BackendError::MissingInput(input.clone())),
          },
          inputs => Err(BackendError::Unsupported(format!(
            "exec op {} with {} inputs",
            op.digest,
            inputs.len()
          ))),
        },
      };

      match evaluated {
        Ok((image, cached)) => {
          send(ctx, SolveStatus::vertex(Vertex::started(op.digest.clone(), &name).complete(cached, None))).await;
          images.insert(&op.digest, image);
        }
        Err(e) => {
          send(
            ctx,
            SolveStatus::vertex(Vertex::started(op.digest.clone(), &name).complete(false, Some(e.to_string()))),
          )
          .await;
          return Err(e);
        }
      }
    }

    let image = images
      .remove(&definition.output)
      .ok_or_else(|| BackendError::MissingInput(definition.output.clone()))?;

    Ok(ResultRef {
      output: definition.output.clone(),
      image,
      steps,
    })
  }

  #[instrument(skip_all, fields(image = %result.image, exporter = export.kind()))]
  async fn export(
    &self,
    result: &ResultRef,
    export: &ExportEntry,
    _ctx: &SolveContext,
  ) -> Result<ExporterResponse, BackendError> {
    let archive = self.export_filesystem(&result.image).await?;
    let mut response = ExporterResponse::new();

    match export {
      ExportEntry::Local { output_dir } => {
        let dest = output_dir.clone();
        let digest = tokio::task::spawn_blocking(move || -> Result<Digest, BackendError> {
          unpack_rootfs(&archive, &dest)?;
          Ok(hash_directory(&dest)?)
        })
        .await
        .map_err(|e| BackendError::Export(e.to_string()))??;

        info!(path = %output_dir.display(), %digest, "exported filesystem");
        response.insert("local.path".to_string(), output_dir.display().to_string());
        response.insert("local.digest".to_string(), digest.to_string());
      }
      ExportEntry::Tar { dest } => {
        write_archive(&archive, dest).await?;
        info!(path = %dest.display(), bytes = archive.len(), "exported archive");
        response.insert("tar.path".to_string(), dest.display().to_string());
      }
    }

    Ok(response)
  }

  async fn export_cache(
    &self,
    result: &ResultRef,
    entry: &CacheOptionsEntry,
    ctx: &SolveContext,
  ) -> Result<(), BackendError> {
    let Some(namespace) = entry.namespace() else {
      warn!(cache = %entry, "cache descriptor has no namespace; skipping export");
      send(ctx, SolveStatus::warning(format!("skipping cache export {}: no scope", entry))).await;
      return Ok(());
    };

    let repo = cache_repository(namespace);
    for step in &result.steps {
      let options = TagImageOptions {
        repo: repo.clone(),
        tag: step.digest.short().to_string(),
      };
      self.docker.tag_image(&step.image, Some(options)).await?;
      debug!(image = %step.image, %repo, "exported cache record");
    }
    Ok(())
  }

  async fn release(&self, result: &ResultRef) -> Result<(), BackendError> {
    for step in result.steps.iter().filter(|step| !step.cached) {
      let options = RemoveImageOptions {
        force: false,
        noprune: false,
      };
      if let Err(e) = self.docker.remove_image(&step.image, Some(options), None).await {
        debug!(image = %step.image, error = %e, "could not remove intermediate image");
      }
    }
    Ok(())
  }
}

async fn send(ctx: &SolveContext, status: SolveStatus) {
  if ctx.status.send(status).await.is_err() {
    trace!("status receiver closed");
  }
}

fn container_name() -> String {
  format!("{}-{}", APP_NAME, Uuid::now_v7())
}

fn build_image(digest: &Digest) -> String {
  format!("{}:{}", BUILD_REPO, digest.short())
}

fn cache_image(namespace: &str, digest: &Digest) -> String {
  format!("{}:{}", cache_repository(namespace), digest.short())
}

/// Map a cache namespace onto a valid repository name.
fn cache_repository(namespace: &str) -> String {
  let component: String = namespace
    .to_ascii_lowercase()
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' { c } else { '-' })
    .collect();
  let component = component.trim_matches(|c: char| !c.is_ascii_alphanumeric());
  let component = if component.is_empty() { "default" } else { component };
  format!("{}/{}", CACHE_REPO_PREFIX, component)
}

/// Write a container export to `dest`, creating parent directories.
async fn write_archive(archive: &[u8], dest: &Path) -> Result<(), BackendError> {
  if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
    tokio::fs::create_dir_all(parent).await?;
  }
  tokio::fs::write(dest, archive).await?;
  Ok(())
}

/// Unpack directories, regular files and links from a container export into `dest`.
pub(crate) fn unpack_rootfs(archive: &[u8], dest: &Path) -> Result<(), BackendError> {
  use tar::EntryType;

  std::fs::create_dir_all(dest)?;
  let mut archive = tar::Archive::new(Cursor::new(archive));
  for entry in archive.entries()? {
    let mut entry = entry?;
    match entry.header().entry_type() {
      EntryType::Regular | EntryType::Directory | EntryType::Symlink | EntryType::Link => {
        entry.unpack_in(dest)?;
      }
      other => trace!(path = ?entry.path().ok(), kind = ?other, "skipping special file"),
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tar::{Builder, EntryType, Header};
  use tempfile::TempDir;

  fn digest() -> Digest {
    Digest(format!("sha256:{}", "ab12".repeat(16)))
  }

  fn header(path: &str, kind: EntryType, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_path(path).unwrap();
    header.set_entry_type(kind);
    header.set_size(size);
    header.set_mode(if kind == EntryType::Directory { 0o755 } else { 0o644 });
    header.set_cksum();
    header
  }

  fn rootfs_archive() -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    builder
      .append(&header("etc/", EntryType::Directory, 0), std::io::empty())
      .unwrap();
    builder
      .append(&header("test", EntryType::Regular, 4), &b"test"[..])
      .unwrap();
    builder
      .append(&header("dev/null", EntryType::Char, 0), std::io::empty())
      .unwrap();
    let mut link = header("current", EntryType::Symlink, 0);
    link.set_link_name("test").unwrap();
    link.set_cksum();
    builder.append(&link, std::io::empty()).unwrap();
    builder.into_inner().unwrap()
  }

  #[test]
  fn image_names_use_digest_prefix() {
    assert_eq!(build_image(&digest()), "solvekit/build:ab12ab12ab12");
    assert_eq!(cache_image("test-cache", &digest()), "solvekit-cache/test-cache:ab12ab12ab12");
  }

  #[test]
  fn cache_repository_sanitizes_namespace() {
    assert_eq!(cache_repository("Test-Cache"), "solvekit-cache/test-cache");
    assert_eq!(cache_repository("/var/lib/store"), "solvekit-cache/var-lib-store");
    assert_eq!(cache_repository("///"), "solvekit-cache/default");
  }

  #[test]
  fn unpack_keeps_files_dirs_and_symlinks() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("result");

    unpack_rootfs(&rootfs_archive(), &dest).unwrap();

    assert_eq!(std::fs::read_to_string(dest.join("test")).unwrap(), "test");
    assert!(dest.join("etc").is_dir());
    assert!(!dest.join("dev/null").exists());
    #[cfg(unix)]
    assert_eq!(std::fs::read_link(dest.join("current")).unwrap(), Path::new("test"));
  }

  #[test]
  fn unpack_into_existing_output_overwrites() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("result");
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(dest.join("test"), "stale").unwrap();

    unpack_rootfs(&rootfs_archive(), &dest).unwrap();
    assert_eq!(std::fs::read_to_string(dest.join("test")).unwrap(), "test");
  }

  #[tokio::test]
  async fn tar_export_creates_parent_directories() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("out/rootfs.tar");
    let archive = rootfs_archive();

    write_archive(&archive, &dest).await.unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), archive);
    let mut reader = tar::Archive::new(std::fs::File::open(&dest).unwrap());
    let paths: Vec<String> = reader
      .entries()
      .unwrap()
      .map(|entry| entry.unwrap().path().unwrap().display().to_string())
      .collect();
    assert!(paths.contains(&"test".to_string()));
  }

  #[test]
  fn connect_is_lazy() {
    let endpoint = Endpoint::parse("tcp://127.0.0.1:1").unwrap();
    assert!(DockerBackend::connect(&endpoint).is_ok());
  }

  #[test]
  fn container_endpoint_is_checked_on_first_use() {
    let endpoint = Endpoint::parse("docker-container://buildkitd").unwrap();
    let backend = DockerBackend::connect(&endpoint).unwrap();

    assert_eq!(backend.container.as_deref(), Some("buildkitd"));
    assert!(!backend.container_checked.initialized());
  }
}
