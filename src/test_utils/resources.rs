use serde::Deserialize;
use serde::Serialize;

use crate::GroupVersionKind;
use crate::ObjectMeta;
use crate::OwnerReference;
use crate::Resource;
use crate::Scheme;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PodSpec {
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
}

impl Resource for Pod {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReplicaSetSpec {
    #[serde(default)]
    pub replicas: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReplicaSet {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ReplicaSetSpec,
}

impl Resource for ReplicaSet {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

pub fn pod_gvk() -> GroupVersionKind {
    GroupVersionKind::new("", "v1", "Pod")
}

pub fn replica_set_gvk() -> GroupVersionKind {
    GroupVersionKind::new("apps", "v1", "ReplicaSet")
}

pub fn test_scheme() -> Scheme {
    let mut scheme = Scheme::new();
    scheme
        .register::<Pod>(pod_gvk())
        .register::<ReplicaSet>(replica_set_gvk());
    scheme
}

pub fn pod(
    namespace: &str,
    name: &str,
) -> Pod {
    Pod {
        metadata: ObjectMeta::new(namespace, name),
        spec: PodSpec::default(),
    }
}

pub fn replica_set(
    namespace: &str,
    name: &str,
) -> ReplicaSet {
    ReplicaSet {
        metadata: ObjectMeta::new(namespace, name),
        spec: ReplicaSetSpec { replicas: 1 },
    }
}

/// A pod controlled by the replica set `owner`
pub fn owned_pod(
    namespace: &str,
    name: &str,
    owner: &str,
) -> Pod {
    let mut p = pod(namespace, name);
    p.metadata.owner_references.push(OwnerReference {
        group: "apps".into(),
        kind: "ReplicaSet".into(),
        name: owner.into(),
        uid: format!("uid-{owner}"),
        controller: true,
    });
    p
}
