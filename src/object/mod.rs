//! Object identity and the typed/untyped object forms exchanged with the store.
mod dynamic;
mod meta;
pub use dynamic::*;
pub use meta::*;


use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A typed object held by the cache and handed to reconcilers.
///
/// Implementors serialize their [`ObjectMeta`] under the `metadata` field so
/// that [`DynamicObject`] can carry them over the store traits.
pub trait Resource: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> ReconcileKey {
        ReconcileKey::from(self.meta())
    }
}
