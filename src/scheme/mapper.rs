use std::collections::HashMap;
use std::fmt;

#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use super::GroupVersionKind;
use super::Scheme;
use crate::Result;
use crate::SetupError;

/// Wire-level address of a resource type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl ResourceDescriptor {
    /// Namespaced descriptor with the plural guessed from the kind
    pub fn guess(gvk: &GroupVersionKind) -> Self {
        Self {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
            plural: guess_plural(&gvk.kind),
            namespaced: true,
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::new(self.group.clone(), self.version.clone(), self.kind.clone())
    }

    pub fn cluster_scoped(mut self) -> Self {
        self.namespaced = false;
        self
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.plural)
        } else {
            write!(f, "{}.{}", self.plural, self.group)
        }
    }
}

/// Resolves a kind to the descriptor the store addresses it by.
#[cfg_attr(test, automock)]
pub trait RestMapper: Send + Sync + 'static {
    fn resource_for(
        &self,
        gvk: &GroupVersionKind,
    ) -> Result<ResourceDescriptor>;
}

/// Static mapper seeded from a [`Scheme`].
#[derive(Debug, Clone, Default)]
pub struct DefaultRestMapper {
    descriptors: HashMap<GroupVersionKind, ResourceDescriptor>,
}

impl DefaultRestMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guesses a namespaced descriptor for every registered kind.
    pub fn from_scheme(scheme: &Scheme) -> Result<Self> {
        let mut mapper = Self::new();
        for gvk in scheme.kinds() {
            mapper.add(ResourceDescriptor::guess(gvk));
        }
        Ok(mapper)
    }

    /// Adds or replaces the descriptor for its kind.
    pub fn add(
        &mut self,
        descriptor: ResourceDescriptor,
    ) -> &mut Self {
        self.descriptors.insert(descriptor.gvk(), descriptor);
        self
    }
}

impl RestMapper for DefaultRestMapper {
    fn resource_for(
        &self,
        gvk: &GroupVersionKind,
    ) -> Result<ResourceDescriptor> {
        self.descriptors.get(gvk).cloned().ok_or_else(|| {
            SetupError::MapperLookup {
                kind: gvk.to_string(),
                reason: "no descriptor registered".to_string(),
            }
            .into()
        })
    }
}

fn guess_plural(kind: &str) -> String {
    let singular = kind.to_lowercase();
    if singular.ends_with('s') || singular.ends_with("ch") || singular.ends_with('x') {
        return format!("{singular}es");
    }
    if let Some(stem) = singular.strip_suffix('y') {
        if !stem.ends_with(&['a', 'e', 'i', 'o', 'u'][..]) {
            return format!("{stem}ies");
        }
    }
    format!("{singular}s")
}
