//! Risk model: category → tier policy and the 0–100 exposure score.

pub mod policy;
pub mod scoring;
