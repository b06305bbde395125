//! Operating-system detection and per-OS location templates.

pub mod os;
pub mod templates;
