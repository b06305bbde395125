//! Activity logging: a background thread appending JSONL with rotation and
//! graceful degradation.

pub mod activity;
pub mod jsonl;
