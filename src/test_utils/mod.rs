//! Shared resources and helpers for the unit tests
mod common;
mod resources;

pub use common::*;
pub use resources::*;
