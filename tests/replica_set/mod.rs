//! A replica set controller converging owned pods over the in-memory store.
use async_trait::async_trait;
use reconcile_runtime::Cache;
use reconcile_runtime::Client;
use reconcile_runtime::EnqueueRequestForObject;
use reconcile_runtime::EnqueueRequestForOwner;
use reconcile_runtime::Error;
use reconcile_runtime::Inject;
use reconcile_runtime::InjectError;
use reconcile_runtime::ListOptions;
use reconcile_runtime::ReconcileKey;
use reconcile_runtime::ReconcileResult;
use reconcile_runtime::Reconciler;
use reconcile_runtime::Result;
use reconcile_runtime::StoreError;
use reconcile_runtime::WantsCache;
use reconcile_runtime::WantsClient;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::commons::eventually;
use crate::commons::memory_manager;
use crate::commons::start_manager;
use crate::commons::Pod;
use crate::commons::ReplicaSet;
use crate::commons::WAIT_FOR_CONVERGENCE;

/// Keeps `spec.replicas` pods named `<set>-<n>` controlled by each replica set.
#[derive(Default)]
struct ReplicaSetReconciler {
    client: Option<Client>,
    cache: Option<Cache>,
}

impl WantsClient for ReplicaSetReconciler {
    fn inject_client(
        &mut self,
        client: Client,
    ) -> Result<()> {
        self.client = Some(client);
        Ok(())
    }
}

impl WantsCache for ReplicaSetReconciler {
    fn inject_cache(
        &mut self,
        cache: Cache,
    ) -> Result<()> {
        self.cache = Some(cache);
        Ok(())
    }
}

impl Inject for ReplicaSetReconciler {
    fn wants_client(&mut self) -> Option<&mut dyn WantsClient> {
        Some(self)
    }

    fn wants_cache(&mut self) -> Option<&mut dyn WantsCache> {
        Some(self)
    }
}

fn owned_by(
    pod: &Pod,
    set: &str,
) -> bool {
    pod.metadata
        .controller_ref()
        .is_some_and(|o| o.kind == "ReplicaSet" && o.name == set)
}

#[async_trait]
impl Reconciler for ReplicaSetReconciler {
    async fn reconcile(
        &self,
        key: ReconcileKey,
    ) -> Result<ReconcileResult> {
        let client = self.client.as_ref().ok_or(InjectError::Unavailable("client"))?;
        let cache = self.cache.as_ref().ok_or(InjectError::Unavailable("cache"))?;

        let Some(set) = cache.get::<ReplicaSet>(&key)? else {
            debug!("replica set {} is gone", key);
            return Ok(ReconcileResult::done());
        };

        let mut names: Vec<String> = cache
            .list::<Pod>(&ListOptions::in_namespace(key.namespace.clone()))?
            .into_iter()
            .filter(|p| owned_by(p, &key.name))
            .map(|p| p.metadata.name.clone())
            .collect();
        names.sort();

        let want = set.spec.replicas;
        if names.len() < want {
            let mut index = 0;
            for _ in names.len()..want {
                while names.contains(&format!("{}-{}", key.name, index)) {
                    index += 1;
                }
                let mut pod = crate::commons::pod(&key.namespace, &format!("{}-{}", key.name, index));
                pod.metadata = pod.metadata.with_owner(set.owner_ref());
                pod.spec = set.spec.template.clone();
                match client.create(&pod).await {
                    Ok(_) | Err(Error::Store(StoreError::AlreadyExists { .. })) => {}
                    Err(e) => return Err(e),
                }
                index += 1;
            }
        } else {
            for name in names.iter().skip(want) {
                match client
                    .delete::<Pod>(&ReconcileKey::new(key.namespace.clone(), name.clone()))
                    .await
                {
                    Err(e) if !e.is_not_found() => return Err(e),
                    _ => {}
                }
            }
        }
        Ok(ReconcileResult::done())
    }
}

async fn owned_pods(
    client: &Client,
    set: &str,
) -> Vec<Pod> {
    client
        .list::<Pod>(&ListOptions::in_namespace("default"))
        .await
        .map(|list| list.items.into_iter().filter(|p| owned_by(p, set)).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_replica_set_converges_heals_and_scales() {
    let (manager, _store) = memory_manager();
    let controller = manager
        .new_controller("replica-sets", ReplicaSetReconciler::default())
        .unwrap();
    controller
        .watch_kind::<ReplicaSet, _>(EnqueueRequestForObject, vec![])
        .unwrap();
    let owner_handler =
        EnqueueRequestForOwner::for_type::<ReplicaSet>(manager.scheme()).unwrap().controlling_only();
    controller.watch_kind::<Pod, _>(owner_handler, vec![]).unwrap();

    let stop = CancellationToken::new();
    let handle = start_manager(&manager, &stop);
    let client = manager.client().clone();

    let created = client.create(&ReplicaSet::new("default", "web", 3)).await.unwrap();
    assert!(eventually(WAIT_FOR_CONVERGENCE, || async { owned_pods(&client, "web").await.len() == 3 }).await);

    // A lost pod is replaced
    client
        .delete::<Pod>(&ReconcileKey::new("default", "web-1"))
        .await
        .unwrap();
    assert!(
        eventually(WAIT_FOR_CONVERGENCE, || async {
            let pods = owned_pods(&client, "web").await;
            pods.len() == 3 && pods.iter().any(|p| p.metadata.name == "web-1")
        })
        .await
    );

    // Scaling down keeps the lowest ordinals
    let mut scaled = client.get::<ReplicaSet>(&ReconcileKey::new("default", "web")).await.unwrap();
    assert_eq!(scaled.metadata.uid, created.metadata.uid);
    scaled.spec.replicas = 1;
    client.update(&scaled).await.unwrap();
    assert!(
        eventually(WAIT_FOR_CONVERGENCE, || async {
            let pods = owned_pods(&client, "web").await;
            pods.len() == 1 && pods[0].metadata.name == "web-0"
        })
        .await
    );

    // Pods the set does not control are left alone
    client.create(&crate::commons::pod("default", "stray")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(manager
        .api_reader()
        .get::<Pod>(&ReconcileKey::new("default", "stray"))
        .await
        .is_ok());

    stop.cancel();
    handle.await.unwrap().unwrap();

    let metrics = reconcile_runtime::metrics::gather();
    assert!(metrics.contains("reconcile_total"));
    assert!(metrics.contains("replica-sets"));
}

#[tokio::test]
async fn test_independent_sets_do_not_interfere() {
    let (manager, _store) = memory_manager();
    let controller = manager
        .new_controller("replica-sets-pair", ReplicaSetReconciler::default())
        .unwrap();
    controller
        .watch_kind::<ReplicaSet, _>(EnqueueRequestForObject, vec![])
        .unwrap();
    controller
        .watch_kind::<Pod, _>(
            EnqueueRequestForOwner::for_type::<ReplicaSet>(manager.scheme()).unwrap(),
            vec![],
        )
        .unwrap();

    let stop = CancellationToken::new();
    let handle = start_manager(&manager, &stop);
    let client = manager.client().clone();

    client.create(&ReplicaSet::new("default", "api", 2)).await.unwrap();
    client.create(&ReplicaSet::new("default", "db", 1)).await.unwrap();

    assert!(
        eventually(WAIT_FOR_CONVERGENCE, || async {
            owned_pods(&client, "api").await.len() == 2 && owned_pods(&client, "db").await.len() == 1
        })
        .await
    );

    stop.cancel();
    handle.await.unwrap().unwrap();
}
