//! Supported operating systems.

#![allow(missing_docs)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{PswError, Result};

/// Operating system whose artifact tables drive a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Windows,
    Linux,
    #[serde(rename = "macos")]
    MacOs,
}

impl Os {
    pub const ALL: [Self; 3] = [Self::Windows, Self::Linux, Self::MacOs];

    /// Running OS. Fails on targets without artifact tables.
    pub fn current() -> Result<Self> {
        if cfg!(target_os = "windows") {
            Ok(Self::Windows)
        } else if cfg!(target_os = "macos") {
            Ok(Self::MacOs)
        } else if cfg!(target_os = "linux") {
            Ok(Self::Linux)
        } else {
            Err(PswError::UnsupportedPlatform {
                details: std::env::consts::OS.to_string(),
            })
        }
    }

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::MacOs => "macos",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Windows => "Windows",
            Self::Linux => "Linux",
            Self::MacOs => "macOS",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Os {
    type Err = PswError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "windows" | "win" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            "macos" | "darwin" | "mac" | "osx" => Ok(Self::MacOs),
            _ => Err(PswError::UnsupportedPlatform {
                details: raw.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ids_and_aliases() {
        assert_eq!("Windows".parse::<Os>().unwrap(), Os::Windows);
        assert_eq!("linux".parse::<Os>().unwrap(), Os::Linux);
        assert_eq!("darwin".parse::<Os>().unwrap(), Os::MacOs);
        assert_eq!("macOS".parse::<Os>().unwrap(), Os::MacOs);
    }

    #[test]
    fn unknown_os_is_unsupported() {
        let err = "plan9".parse::<Os>().unwrap_err();
        assert_eq!(err.code(), "PSW-1101");
    }

    #[test]
    fn serde_uses_lowercase_ids() {
        assert_eq!(serde_json::to_string(&Os::MacOs).unwrap(), "\"macos\"");
        let parsed: Os = serde_json::from_str("\"windows\"").unwrap();
        assert_eq!(parsed, Os::Windows);
    }

    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    #[test]
    fn current_os_is_supported() {
        let os = Os::current().unwrap();
        assert_eq!(os.key(), std::env::consts::OS);
    }
}
