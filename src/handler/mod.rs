//! Map events to reconcile keys and push them into a work queue.
mod enqueue;
pub use enqueue::*;


use std::sync::Arc;

use crate::Event;
use crate::WorkQueue;

/// Turns one event into zero or more enqueued keys.
///
/// Callbacks run on the delivery path of the source and must not block.
pub trait EventHandler<K>: Send + Sync + 'static {
    fn on_create(
        &self,
        object: &Arc<K>,
        queue: &WorkQueue,
    );

    fn on_update(
        &self,
        old: &Arc<K>,
        new: &Arc<K>,
        queue: &WorkQueue,
    );

    fn on_delete(
        &self,
        object: &Arc<K>,
        final_state_unknown: bool,
        queue: &WorkQueue,
    );

    fn on_generic(
        &self,
        object: &Arc<K>,
        queue: &WorkQueue,
    );

    /// Routes `event` to the matching callback.
    fn dispatch(
        &self,
        event: &Event<K>,
        queue: &WorkQueue,
    ) {
        match event {
            Event::Created { object } => self.on_create(object, queue),
            Event::Updated { old, new } => self.on_update(old, new, queue),
            Event::Deleted {
                object,
                final_state_unknown,
            } => self.on_delete(object, *final_state_unknown, queue),
            Event::Generic { object } => self.on_generic(object, queue),
        }
    }
}
