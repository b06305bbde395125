//! Verified cleanup: encrypted backup store, signed operation log, and the
//! per-session state machine.

pub mod backup;
pub mod executor;
pub mod oplog;
