//! Pure filters applied to events before they can enqueue work.
//!
//! All predicates on one source must pass for an event to reach its handler.
#[cfg(test)]
mod predicate_test;

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::Event;
use crate::Resource;

pub trait Predicate<K>: Send + Sync + 'static {
    fn evaluate(
        &self,
        event: &Event<K>,
    ) -> bool;
}

/// True when every predicate accepts `event`; vacuously true for none.
pub fn evaluate_all<K: 'static>(
    predicates: &[Arc<dyn Predicate<K>>],
    event: &Event<K>,
) -> bool {
    predicates.iter().all(|p| p.evaluate(event))
}

/// Predicate from a closure over the whole event
pub struct PredicateFn<K, F> {
    f: F,
    _kind: PhantomData<fn(&K)>,
}

impl<K, F> PredicateFn<K, F>
where
    F: Fn(&Event<K>) -> bool + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _kind: PhantomData,
        }
    }
}

impl<K: 'static, F> Predicate<K> for PredicateFn<K, F>
where
    F: Fn(&Event<K>) -> bool + Send + Sync + 'static,
{
    fn evaluate(
        &self,
        event: &Event<K>,
    ) -> bool {
        (self.f)(event)
    }
}

type ObjectFilter<K> = Box<dyn Fn(&K) -> bool + Send + Sync>;
type UpdateFilter<K> = Box<dyn Fn(&K, &K) -> bool + Send + Sync>;

/// One optional closure per event kind; an unset closure accepts.
pub struct Funcs<K> {
    create: Option<ObjectFilter<K>>,
    update: Option<UpdateFilter<K>>,
    delete: Option<ObjectFilter<K>>,
    generic: Option<ObjectFilter<K>>,
}

impl<K> Default for Funcs<K> {
    fn default() -> Self {
        Self {
            create: None,
            update: None,
            delete: None,
            generic: None,
        }
    }
}

impl<K> Funcs<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_create(
        mut self,
        f: impl Fn(&K) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.create = Some(Box::new(f));
        self
    }

    pub fn on_update(
        mut self,
        f: impl Fn(&K, &K) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.update = Some(Box::new(f));
        self
    }

    pub fn on_delete(
        mut self,
        f: impl Fn(&K) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.delete = Some(Box::new(f));
        self
    }

    pub fn on_generic(
        mut self,
        f: impl Fn(&K) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.generic = Some(Box::new(f));
        self
    }
}

impl<K: Send + Sync + 'static> Predicate<K> for Funcs<K> {
    fn evaluate(
        &self,
        event: &Event<K>,
    ) -> bool {
        match event {
            Event::Created { object } => self.create.as_ref().map_or(true, |f| f(object)),
            Event::Updated { old, new } => self.update.as_ref().map_or(true, |f| f(old, new)),
            Event::Deleted { object, .. } => self.delete.as_ref().map_or(true, |f| f(object)),
            Event::Generic { object } => self.generic.as_ref().map_or(true, |f| f(object)),
        }
    }
}

/// Drops updates that did not change the resource version (resync redeliveries).
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceVersionChanged;

impl<K: Resource> Predicate<K> for ResourceVersionChanged {
    fn evaluate(
        &self,
        event: &Event<K>,
    ) -> bool {
        match event {
            Event::Updated { old, new } => {
                old.meta().resource_version != new.meta().resource_version
            }
            _ => true,
        }
    }
}

/// Drops updates that did not change the generation, i.e. metadata-only writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationChanged;

impl<K: Resource> Predicate<K> for GenerationChanged {
    fn evaluate(
        &self,
        event: &Event<K>,
    ) -> bool {
        match event {
            Event::Updated { old, new } => old.meta().generation != new.meta().generation,
            _ => true,
        }
    }
}

/// Accepts events whose current object carries every label in the selector.
#[derive(Debug, Clone, Default)]
pub struct LabelsMatch {
    selector: BTreeMap<String, String>,
}

impl LabelsMatch {
    pub fn new(selector: BTreeMap<String, String>) -> Self {
        Self { selector }
    }

    pub fn label(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.selector.insert(key.into(), value.into());
        self
    }
}

impl<K: Resource> Predicate<K> for LabelsMatch {
    fn evaluate(
        &self,
        event: &Event<K>,
    ) -> bool {
        let labels = &event.object().meta().labels;
        self.selector
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

pub struct And<K>(pub Vec<Arc<dyn Predicate<K>>>);

impl<K: 'static> Predicate<K> for And<K> {
    fn evaluate(
        &self,
        event: &Event<K>,
    ) -> bool {
        evaluate_all(&self.0, event)
    }
}

pub struct Or<K>(pub Vec<Arc<dyn Predicate<K>>>);

impl<K: 'static> Predicate<K> for Or<K> {
    fn evaluate(
        &self,
        event: &Event<K>,
    ) -> bool {
        self.0.iter().any(|p| p.evaluate(event))
    }
}

pub struct Not<K>(pub Arc<dyn Predicate<K>>);

impl<K: 'static> Predicate<K> for Not<K> {
    fn evaluate(
        &self,
        event: &Event<K>,
    ) -> bool {
        !self.0.evaluate(event)
    }
}
