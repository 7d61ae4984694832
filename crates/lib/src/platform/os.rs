use std::fmt;

/// Operating system variants a build can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
  Linux,
  Windows,
}

impl Os {
  /// Returns the lowercase OCI identifier for this OS
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::Windows => "windows",
    }
  }

  pub(crate) fn parse(os: &str) -> Option<Self> {
    match os {
      "linux" => Some(Self::Linux),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}
