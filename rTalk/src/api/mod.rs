//! API modules.

mod inbox;

pub use inbox::{summarize, InboxApi, InboxBuilder, InboxResult};
