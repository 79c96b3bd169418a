//! Type registry mapping Rust types to their wire identity.
mod mapper;
pub use mapper::*;


use std::any::type_name;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::Resource;
use crate::Result;
use crate::SetupError;

/// Group and kind, without version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(
        group: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(self.group.clone(), self.kind.clone())
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// Registry of the resource types a manager knows how to watch and read.
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    kinds: HashMap<TypeId, GroupVersionKind>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `K` under `gvk`. Registering the same type again replaces its identity.
    pub fn register<K: Resource>(
        &mut self,
        gvk: GroupVersionKind,
    ) -> &mut Self {
        self.kinds.insert(TypeId::of::<K>(), gvk);
        self
    }

    pub fn kind_for<K: Resource>(&self) -> Result<GroupVersionKind> {
        self.kinds.get(&TypeId::of::<K>()).cloned().ok_or_else(|| {
            SetupError::TypeNotRegistered {
                type_name: type_name::<K>(),
            }
            .into()
        })
    }

    pub fn is_registered<K: Resource>(&self) -> bool {
        self.kinds.contains_key(&TypeId::of::<K>())
    }

    pub fn kinds(&self) -> impl Iterator<Item = &GroupVersionKind> {
        self.kinds.values()
    }
}
