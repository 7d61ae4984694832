use std::fmt;

/// CPU architecture variants a build can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
  Amd64,
  Arm64,
  ArmV7,
  Riscv64,
}

impl Arch {
  /// Returns the OCI architecture identifier
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Amd64 => "amd64",
      Self::Arm64 => "arm64",
      Self::ArmV7 => "arm",
      Self::Riscv64 => "riscv64",
    }
  }

  /// Returns the OCI architecture variant, if the architecture has one
  pub fn variant(&self) -> Option<&'static str> {
    match self {
      Self::ArmV7 => Some("v7"),
      _ => None,
    }
  }

  pub(crate) fn parse(arch: &str, variant: Option<&str>) -> Option<Self> {
    match (arch, variant) {
      ("amd64", None) => Some(Self::Amd64),
      ("arm64", None) | ("arm64", Some("v8")) => Some(Self::Arm64),
      ("arm", Some("v7")) => Some(Self::ArmV7),
      ("riscv64", None) => Some(Self::Riscv64),
      _ => None,
    }
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.variant() {
      Some(variant) => write!(f, "{}/{}", self.as_str(), variant),
      None => write!(f, "{}", self.as_str()),
    }
  }
}
