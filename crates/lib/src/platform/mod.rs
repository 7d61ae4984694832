//! Target platforms for build graphs.
//!
//! Platforms are a fixed enumeration of `os/arch[/variant]` pairs. Anything
//! outside [`Platform::SUPPORTED`] is rejected at parse time so a definition can
//! never carry a platform the executor does not know.

pub mod arch;
pub mod os;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use arch::Arch;
use os::Os;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported platform: {0}")]
pub struct PlatformError(pub String);

/// Platform identifier combining OS and architecture (e.g., "linux/amd64")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Platform {
  pub os: Os,
  pub arch: Arch,
}

impl Platform {
  pub const LINUX_AMD64: Platform = Platform::new(Os::Linux, Arch::Amd64);
  pub const LINUX_ARM64: Platform = Platform::new(Os::Linux, Arch::Arm64);
  pub const LINUX_ARMV7: Platform = Platform::new(Os::Linux, Arch::ArmV7);
  pub const LINUX_RISCV64: Platform = Platform::new(Os::Linux, Arch::Riscv64);
  pub const WINDOWS_AMD64: Platform = Platform::new(Os::Windows, Arch::Amd64);

  /// Every platform a definition may target.
  pub const SUPPORTED: [Platform; 5] = [
    Self::LINUX_AMD64,
    Self::LINUX_ARM64,
    Self::LINUX_ARMV7,
    Self::LINUX_RISCV64,
    Self::WINDOWS_AMD64,
  ];

  const fn new(os: Os, arch: Arch) -> Self {
    Self { os, arch }
  }

  /// Returns the `os/arch[/variant]` string understood by image registries
  pub fn oci_string(&self) -> String {
    format!("{}/{}", self.os, self.arch)
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.oci_string())
  }
}

impl FromStr for Platform {
  type Err = PlatformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut parts = s.split('/');
    let os = parts.next().and_then(Os::parse);
    let arch = parts.next();
    let variant = parts.next();
    if parts.next().is_some() {
      return Err(PlatformError(s.to_string()));
    }

    let platform = match (os, arch) {
      (Some(os), Some(arch)) => Arch::parse(arch, variant).map(|arch| Platform::new(os, arch)),
      _ => None,
    };

    platform
      .filter(|p| Self::SUPPORTED.contains(p))
      .ok_or_else(|| PlatformError(s.to_string()))
  }
}

impl TryFrom<String> for Platform {
  type Error = PlatformError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<Platform> for String {
  fn from(platform: Platform) -> Self {
    platform.oci_string()
  }
}
