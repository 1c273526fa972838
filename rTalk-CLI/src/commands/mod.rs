//! CLI command groups.

pub mod message;
