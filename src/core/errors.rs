//! PSW-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, PswError>;

/// Top-level error type for privacy_sweep.
#[derive(Debug, Error)]
pub enum PswError {
    #[error("[PSW-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[PSW-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[PSW-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[PSW-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[PSW-2001] unreadable entry {path}: {details}")]
    UnreadableEntry { path: PathBuf, details: String },

    #[error("[PSW-2002] invalid path pattern {pattern:?}: {details}")]
    InvalidPattern { pattern: String, details: String },

    #[error("[PSW-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[PSW-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[PSW-2201] backup integrity failure for {fingerprint}: {details}")]
    BackupIntegrity {
        fingerprint: String,
        details: String,
    },

    #[error("[PSW-2202] backup not found: {fingerprint}")]
    BackupNotFound { fingerprint: String },

    #[error("[PSW-2203] crypto failure in {context}")]
    Crypto { context: &'static str },

    #[error("[PSW-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[PSW-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[PSW-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[PSW-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl PswError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "PSW-1001",
            Self::MissingConfig { .. } => "PSW-1002",
            Self::ConfigParse { .. } => "PSW-1003",
            Self::UnsupportedPlatform { .. } => "PSW-1101",
            Self::UnreadableEntry { .. } => "PSW-2001",
            Self::InvalidPattern { .. } => "PSW-2002",
            Self::Serialization { .. } => "PSW-2101",
            Self::Sql { .. } => "PSW-2102",
            Self::BackupIntegrity { .. } => "PSW-2201",
            Self::BackupNotFound { .. } => "PSW-2202",
            Self::Crypto { .. } => "PSW-2203",
            Self::PermissionDenied { .. } => "PSW-3001",
            Self::Io { .. } => "PSW-3002",
            Self::ChannelClosed { .. } => "PSW-3003",
            Self::Runtime { .. } => "PSW-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::UnreadableEntry { .. }
                | Self::Sql { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    ///
    /// Permission failures are mapped to [`PswError::PermissionDenied`] so
    /// callers can tell them apart without inspecting the source.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied {
                path: path.as_ref().to_path_buf(),
            };
        }
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for PswError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for PswError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for PswError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for PswError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}
