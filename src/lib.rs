//! Level-triggered reconciliation over a declarative object store.
//!
//! A [`Manager`] owns a shared [`Client`] and watch-backed [`Cache`]. Each
//! [`Controller`] routes events from its sources, through predicates and
//! event handlers, into a deduplicating [`WorkQueue`] drained by a pool of
//! [`Reconciler`] workers.
mod cache;
mod client;
mod config;
mod controller;
mod errors;
mod event;
mod handler;
mod manager;
pub mod metrics;
mod object;
mod predicate;
mod reconcile;
mod scheme;
mod source;
pub(crate) mod utils;
mod workqueue;

pub use cache::*;
pub use client::*;
pub use config::*;
pub use controller::*;
pub use errors::*;
pub use event::*;
pub use handler::*;
pub use manager::*;
pub use object::*;
pub use predicate::*;
pub use reconcile::*;
pub use scheme::*;
pub use source::*;
pub use workqueue::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
