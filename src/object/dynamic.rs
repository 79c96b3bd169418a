use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use super::ObjectMeta;
use super::Resource;
use crate::Result;

/// Untyped wire form of an object.
///
/// Everything except `metadata` is kept as raw JSON in `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DynamicObject {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl DynamicObject {
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            metadata,
            data: Map::new(),
        }
    }

    pub fn with_field(
        mut self,
        field: impl Into<String>,
        value: Value,
    ) -> Self {
        self.data.insert(field.into(), value);
        self
    }

    pub fn from_typed<K: Resource>(obj: &K) -> Result<Self> {
        Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
    }

    pub fn into_typed<K: Resource>(self) -> Result<K> {
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }
}

impl Resource for DynamicObject {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
