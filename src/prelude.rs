//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use privacy_sweep::prelude::*;
//! ```

// Core
pub use crate::core::cancel::CancellationToken;
pub use crate::core::config::Config;
pub use crate::core::errors::{PswError, Result};
pub use crate::core::model::{
    Category, Disposition, ItemOutcome, PrivacyItem, ReportData, RiskTier, ScanResult, TierCounts,
};

// Platform
pub use crate::platform::os::Os;
pub use crate::platform::templates::PathResolver;

// Scanner
pub use crate::scanner::engine::ScanEvent;
pub use crate::scanner::source::{ArtifactSource, FsSource, MemorySource};

// Risk
pub use crate::risk::policy::RiskPolicy;
pub use crate::risk::scoring::{ExposureRating, ScoreModel};

// Cleanup & reports
pub use crate::cleanup::backup::BackupStore;
pub use crate::cleanup::oplog::LogVerification;
pub use crate::report::ReportStore;

// Engine
pub use crate::engine::{CleanupHandle, CleanupOutcome, PrivacyEngine, ScanHandle};
