//! Store access: the transport traits, the typed client and the in-memory backend.
mod memory;
mod store;
mod typed;
pub use memory::*;
pub use store::*;
pub use typed::*;
