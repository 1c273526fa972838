//! Message stores.

mod memory;
mod rest;
mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemoryStore;
pub use rest::{RestConfig, RestStore, DEFAULT_MESSAGE_TABLE, DEFAULT_PROFILE_TABLE};
pub use traits::MessageStore;
