//! Shared handlers for CLI commands.

pub mod message;
