//! Sources, predicates and handlers feeding controllers through a manager.
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reconcile_runtime::Channel;
use reconcile_runtime::EnqueueRequestForObject;
use reconcile_runtime::EnqueueRequestsFromMapFunc;
use reconcile_runtime::GenerationChanged;
use reconcile_runtime::Predicate;
use reconcile_runtime::ReconcileKey;
use reconcile_runtime::ReconcileResult;
use reconcile_runtime::Reconciler;
use reconcile_runtime::ReconcilerFn;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::commons::eventually;
use crate::commons::memory_manager;
use crate::commons::pod;
use crate::commons::start_manager;
use crate::commons::Pod;
use crate::commons::WAIT_FOR_CONVERGENCE;

type Seen = Arc<Mutex<Vec<ReconcileKey>>>;

fn recorder(seen: Seen) -> impl Reconciler {
    ReconcilerFn::new(move |key| {
        seen.lock().push(key);
        futures::future::ready(Ok(ReconcileResult::done()))
    })
}

fn count(
    seen: &Seen,
    name: &str,
) -> usize {
    seen.lock().iter().filter(|k| k.name == name).count()
}

#[tokio::test]
async fn test_generation_predicate_ignores_metadata_only_updates() {
    let (manager, _store) = memory_manager();
    let seen: Seen = Default::default();
    let controller = manager.new_controller("generations", recorder(seen.clone())).unwrap();
    let only_spec_changes: Arc<dyn Predicate<Pod>> = Arc::new(GenerationChanged);
    controller
        .watch_kind::<Pod, _>(EnqueueRequestForObject, vec![only_spec_changes])
        .unwrap();

    let stop = CancellationToken::new();
    let handle = start_manager(&manager, &stop);
    let client = manager.client().clone();

    let created = client.create(&pod("default", "app")).await.unwrap();
    assert!(eventually(WAIT_FOR_CONVERGENCE, || async { count(&seen, "app") == 1 }).await);

    // Labels live in metadata and leave the generation alone
    let mut relabelled = created.clone();
    relabelled.metadata = relabelled.metadata.with_label("tier", "frontend");
    let relabelled = client.update(&relabelled).await.unwrap();
    assert_eq!(relabelled.metadata.generation, created.metadata.generation);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count(&seen, "app"), 1);

    let mut respec = relabelled.clone();
    respec.spec.image = "nginx:2".into();
    client.update(&respec).await.unwrap();
    assert!(eventually(WAIT_FOR_CONVERGENCE, || async { count(&seen, "app") == 2 }).await);

    stop.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_channel_source_fans_out_through_map_func() {
    let (manager, _store) = memory_manager();
    let seen: Seen = Default::default();
    let controller = manager.new_controller("fan-out", recorder(seen.clone())).unwrap();

    let (tx, rx) = mpsc::channel(8);
    let every_replica = EnqueueRequestsFromMapFunc::new(|p: &Pod| {
        (0..3)
            .map(|i| ReconcileKey::new(p.metadata.namespace.clone(), format!("{}-{}", p.metadata.name, i)))
            .collect()
    });
    controller.watch(Channel::new(rx), every_replica, vec![]).unwrap();

    let stop = CancellationToken::new();
    let handle = start_manager(&manager, &stop);

    tx.send(Arc::new(pod("default", "shard"))).await.unwrap();
    assert!(
        eventually(WAIT_FOR_CONVERGENCE, || async {
            (0..3).all(|i| count(&seen, &format!("shard-{i}")) == 1)
        })
        .await
    );

    stop.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_burst_of_events_is_coalesced_per_key() {
    let (manager, _store) = memory_manager();
    let seen: Seen = Default::default();
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let entered = Arc::new(AtomicUsize::new(0));
    let reconciler = {
        let seen = seen.clone();
        let gate = gate.clone();
        let entered = entered.clone();
        ReconcilerFn::new(move |key| {
            let seen = seen.clone();
            let gate = gate.clone();
            entered.fetch_add(1, Ordering::SeqCst);
            async move {
                // Hold the first reconcile until the burst has been queued
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
                seen.lock().push(key);
                Ok(ReconcileResult::done())
            }
        })
    };
    let controller = manager.new_controller("coalesce", reconciler).unwrap();
    let (tx, rx) = mpsc::channel(64);
    controller.watch(Channel::new(rx), EnqueueRequestForObject, vec![]).unwrap();

    let stop = CancellationToken::new();
    let handle = start_manager(&manager, &stop);

    tx.send(Arc::new(pod("default", "hot"))).await.unwrap();
    assert!(eventually(WAIT_FOR_CONVERGENCE, || async { entered.load(Ordering::SeqCst) == 1 }).await);
    for _ in 0..20 {
        tx.send(Arc::new(pod("default", "hot"))).await.unwrap();
    }
    assert!(eventually(WAIT_FOR_CONVERGENCE, || async { tx.capacity() == 64 }).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    gate.add_permits(100);

    // One reconcile in flight, every later event folded into a single re-run
    assert!(eventually(WAIT_FOR_CONVERGENCE, || async { count(&seen, "hot") == 2 }).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(count(&seen, "hot"), 2);

    stop.cancel();
    handle.await.unwrap().unwrap();
}
