//! CLI smoke tests for solvekit.
//!
//! Build commands are pointed at a closed local port so the submission fails
//! fast; their printed output and exit status are still checked.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

/// Get a Command for the solvekit binary.
fn solvekit_cmd() -> Command {
  cargo_bin_cmd!("solvekit")
}

/// A build command run in a scratch directory against an unreachable engine.
fn unreachable_build(command: &str, temp: &TempDir) -> Command {
  let mut cmd = solvekit_cmd();
  cmd
    .arg(command)
    .current_dir(temp.path())
    .env("BUILDKIT_HOST", "tcp://127.0.0.1:1")
    .env("ACTIONS_CACHE_URL", "https://cache.example/")
    .env("ACTIONS_RUNTIME_TOKEN", "s3cr3t-token")
    .env("DOCKER_CONFIG", temp.path().join("docker"))
    .env_remove("RUST_LOG");
  cmd
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  solvekit_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  solvekit_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("solvekit"));
}

// =============================================================================
// Argument handling
// =============================================================================

#[test]
fn no_arguments_is_a_usage_error() {
  solvekit_cmd()
    .assert()
    .code(1)
    .stderr(predicate::str::contains("Missing argument"));
}

#[test]
fn two_arguments_is_a_usage_error() {
  solvekit_cmd()
    .args(["generate", "build"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("Missing argument"));
}

#[test]
fn unknown_token_is_rejected() {
  solvekit_cmd()
    .arg("unknown-token")
    .assert()
    .code(1)
    .stderr(predicate::str::contains("Unknown arguments"))
    .stdout(predicate::str::is_empty());
}

// =============================================================================
// generate
// =============================================================================

#[test]
fn generate_writes_two_op_amd64_chain() {
  let output = solvekit_cmd().arg("generate").assert().success().get_output().stdout.clone();
  assert!(!output.is_empty());

  let def: Value = serde_json::from_slice(&output).unwrap();
  let ops = def["ops"].as_array().unwrap();
  assert_eq!(ops.len(), 2);

  let (image, run) = (&ops[0], &ops[1]);
  assert_eq!(image["op"]["type"], "source");
  assert_eq!(
    image["op"]["identifier"],
    "docker-image://docker.io/library/alpine:latest"
  );
  assert_eq!(run["op"]["type"], "exec");
  assert_eq!(run["op"]["args"][0], "sh");
  assert_eq!(run["op"]["args"][2], "sleep 10 && echo -n test > /test");
  assert_eq!(run["inputs"][0], image["digest"]);
  assert_eq!(def["output"], run["digest"]);

  for op in ops {
    assert_eq!(op["platform"], "linux/amd64");
  }
}

#[test]
fn generate_is_deterministic() {
  let first = solvekit_cmd().arg("generate").assert().success().get_output().stdout.clone();
  let second = solvekit_cmd().arg("generate").assert().success().get_output().stdout.clone();
  assert_eq!(first, second);
}

// =============================================================================
// build
// =============================================================================

#[test]
fn build_variants_report_and_exit_zero_on_submission_error() {
  for command in ["build", "build-wrapped", "build-simple"] {
    let temp = TempDir::new().unwrap();

    unreachable_build(command, &temp)
      .assert()
      .success()
      .stdout(predicate::str::contains("Cache imports: [{gha scope=test-cache"))
      .stdout(predicate::str::contains("Cache exports: [{gha scope=test-cache"))
      .stdout(predicate::str::contains("url=https://cache.example/"))
      .stdout(predicate::str::contains("Done in "))
      .stdout(predicate::str::contains("s3cr3t-token").not());
  }
}

#[test]
fn build_prints_lines_in_order() {
  let temp = TempDir::new().unwrap();
  let output = unreachable_build("build", &temp).assert().success().get_output().stdout.clone();
  let stdout = String::from_utf8(output).unwrap();

  let imports = stdout.find("Cache imports:").unwrap();
  let exports = stdout.find("Cache exports:").unwrap();
  let done = stdout.find("Done in").unwrap();
  assert!(imports < exports && exports < done);
}

#[test]
fn build_accepts_docker_container_host() {
  let temp = TempDir::new().unwrap();
  unreachable_build("build", &temp)
    .env("BUILDKIT_HOST", "docker-container://solvekit-missing-builder")
    .env("DOCKER_HOST", format!("unix://{}", temp.path().join("engine.sock").display()))
    .assert()
    .success()
    .stdout(predicate::str::contains("Cache imports: [{gha scope=test-cache"))
    .stdout(predicate::str::contains("Done in "))
    .stderr(predicate::str::contains("unsupported scheme").not());
}

#[test]
fn build_with_unsupported_host_scheme_fails() {
  let temp = TempDir::new().unwrap();
  unreachable_build("build", &temp)
    .env("BUILDKIT_HOST", "ssh://builder@example")
    .assert()
    .code(1)
    .stderr(predicate::str::contains("unsupported scheme"));
}
