//! Artifact scanner: pattern matching, parallel walk, fingerprinting, aggregation.

pub mod classify;
pub mod engine;
pub mod fingerprint;
pub mod glob;
pub mod source;
pub mod walker;
