use std::sync::Arc;

/// A change to one object, as delivered by a cache or channel source.
///
/// Objects are shared with the cache that produced them.
#[derive(Debug)]
pub enum Event<K> {
    Created {
        object: Arc<K>,
    },
    Updated {
        old: Arc<K>,
        new: Arc<K>,
    },
    Deleted {
        object: Arc<K>,
        /// Set when the deletion was inferred from a re-list and the last
        /// known state may be stale
        final_state_unknown: bool,
    },
    /// Externally triggered, not tied to a store change
    Generic {
        object: Arc<K>,
    },
}

impl<K> Clone for Event<K> {
    fn clone(&self) -> Self {
        match self {
            Event::Created { object } => Event::Created {
                object: object.clone(),
            },
            Event::Updated { old, new } => Event::Updated {
                old: old.clone(),
                new: new.clone(),
            },
            Event::Deleted {
                object,
                final_state_unknown,
            } => Event::Deleted {
                object: object.clone(),
                final_state_unknown: *final_state_unknown,
            },
            Event::Generic { object } => Event::Generic {
                object: object.clone(),
            },
        }
    }
}

impl<K> Event<K> {
    pub fn created(object: K) -> Self {
        Event::Created {
            object: Arc::new(object),
        }
    }

    pub fn updated(
        old: K,
        new: K,
    ) -> Self {
        Event::Updated {
            old: Arc::new(old),
            new: Arc::new(new),
        }
    }

    pub fn deleted(object: K) -> Self {
        Event::Deleted {
            object: Arc::new(object),
            final_state_unknown: false,
        }
    }

    pub fn generic(object: K) -> Self {
        Event::Generic {
            object: Arc::new(object),
        }
    }

    /// The current object: the new state for updates
    pub fn object(&self) -> &Arc<K> {
        match self {
            Event::Created { object }
            | Event::Deleted { object, .. }
            | Event::Generic { object } => object,
            Event::Updated { new, .. } => new,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Created { .. } => "create",
            Event::Updated { .. } => "update",
            Event::Deleted { .. } => "delete",
            Event::Generic { .. } => "generic",
        }
    }
}
