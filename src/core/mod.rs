//! Core types: errors, configuration, domain model, shared utilities.

pub mod cancel;
pub mod config;
pub mod errors;
pub mod model;
pub mod paths;
