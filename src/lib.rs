#![forbid(unsafe_code)]

//! privacy_sweep: local privacy artifact discovery, exposure scoring and
//! verified cleanup.
//!
//! Pipeline:
//! 1. **Path resolver** expands per-OS path templates into glob patterns
//! 2. **Scanner** walks and hashes matching files in parallel
//! 3. **Risk model** reduces the inventory to a 0–100 exposure score
//! 4. **Cleanup executor** backs up, verifies and removes selected artifacts
//! 5. **Report store** keeps an append-only record of each session
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use privacy_sweep::prelude::*;
//!
//! # fn main() -> privacy_sweep::core::errors::Result<()> {
//! let engine = PrivacyEngine::new(Config::load(None)?)?;
//! let token = CancellationToken::new();
//! let scan = engine.scan(Os::current()?, &token, &mut |_| {})?;
//! println!("exposure score: {}", scan.score());
//! # Ok(())
//! # }
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use privacy_sweep::core::config::Config;
//! use privacy_sweep::risk::scoring::ScoreModel;
//! ```

pub mod prelude;

pub mod cleanup;
pub mod core;
pub mod engine;
pub mod logger;
pub mod platform;
pub mod report;
pub mod risk;
pub mod scanner;
