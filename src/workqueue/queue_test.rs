use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing_test::traced_test;

use super::*;
use crate::ReconcileKey;

fn key(name: &str) -> ReconcileKey {
    ReconcileKey::new("ns", name)
}

fn fast_queue(name: &str) -> WorkQueue {
    WorkQueue::with_rate_limiter(
        name,
        Arc::new(ItemExponentialFailureRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_millis(100),
        )),
    )
}

async fn get_within(
    queue: &WorkQueue,
    within: Duration,
) -> Option<ReconcileKey> {
    timeout(within, queue.get()).await.ok().flatten()
}

#[tokio::test]
async fn repeated_adds_hold_key_once() {
    let queue = fast_queue("dedup");

    for _ in 0..5 {
        queue.add(key("a"));
    }
    queue.add(key("b"));

    assert_eq!(queue.len(), 2);
    assert_eq!(queue.get().await, Some(key("a")));
    assert_eq!(queue.get().await, Some(key("b")));
    assert!(queue.is_empty());
}

#[tokio::test]
async fn add_while_processing_redelivers_exactly_once_after_done() {
    let queue = fast_queue("dirty");
    queue.add(key("a"));

    let checked_out = queue.get().await.unwrap();
    queue.add(key("a"));
    queue.add(key("a"));
    queue.add(key("a"));

    // Not handed to anyone else while checked out
    assert_eq!(queue.len(), 0);
    assert_eq!(get_within(&queue, Duration::from_millis(20)).await, None);

    queue.done(&checked_out);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.get().await, Some(key("a")));
    queue.done(&key("a"));

    assert!(queue.is_empty());
    assert_eq!(get_within(&queue, Duration::from_millis(20)).await, None);
}

#[tokio::test]
async fn done_without_readd_releases_key() {
    let queue = fast_queue("release");
    queue.add(key("a"));
    let k = queue.get().await.unwrap();
    queue.done(&k);

    assert!(queue.is_empty());
    queue.add(key("a"));
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn get_waits_for_add() {
    let queue = fast_queue("wait");
    let q = queue.clone();
    let getter = tokio::spawn(async move { q.get().await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    queue.add(key("late"));

    let got = timeout(Duration::from_secs(1), getter).await.unwrap().unwrap();
    assert_eq!(got, Some(key("late")));
}

#[tokio::test]
async fn several_waiters_each_receive_one_key() {
    let queue = fast_queue("fanout");
    let mut getters = Vec::new();
    for _ in 0..3 {
        let q = queue.clone();
        getters.push(tokio::spawn(async move { q.get().await }));
    }
    tokio::task::yield_now().await;

    queue.add(key("a"));
    queue.add(key("b"));
    queue.add(key("c"));

    let mut got = Vec::new();
    for g in getters {
        got.push(
            timeout(Duration::from_secs(1), g)
                .await
                .unwrap()
                .unwrap()
                .unwrap(),
        );
    }
    got.sort();
    assert_eq!(got, vec![key("a"), key("b"), key("c")]);
}

#[tokio::test]
#[traced_test]
async fn shut_down_unblocks_waiting_getters() {
    let queue = fast_queue("shutdown");
    let mut getters = Vec::new();
    for _ in 0..3 {
        let q = queue.clone();
        getters.push(tokio::spawn(async move { q.get().await }));
    }
    tokio::task::yield_now().await;

    queue.shut_down();

    for g in getters {
        let got = timeout(Duration::from_secs(1), g).await.unwrap().unwrap();
        assert_eq!(got, None);
    }
    assert!(queue.is_shutting_down());
    assert!(logs_contain("shutdown: shutting down work queue"));
}

#[tokio::test]
async fn shut_down_drains_queued_keys_then_ends() {
    let queue = fast_queue("drain");
    queue.add(key("a"));
    queue.add(key("b"));

    queue.shut_down();
    queue.add(key("ignored"));

    assert_eq!(queue.get().await, Some(key("a")));
    assert_eq!(queue.get().await, Some(key("b")));
    assert_eq!(queue.get().await, None);
}

#[tokio::test(start_paused = true)]
async fn add_after_delivers_once_delay_elapses() {
    let queue = fast_queue("delay");
    queue.add_after(key("a"), Duration::from_secs(5));

    assert_eq!(get_within(&queue, Duration::from_secs(4)).await, None);
    assert_eq!(
        get_within(&queue, Duration::from_secs(2)).await,
        Some(key("a"))
    );
}

#[tokio::test(start_paused = true)]
async fn add_after_keeps_earliest_ready_time() {
    let queue = fast_queue("earliest");
    queue.add_after(key("a"), Duration::from_secs(10));
    queue.add_after(key("a"), Duration::from_secs(1));
    queue.add_after(key("a"), Duration::from_secs(30));

    assert_eq!(
        get_within(&queue, Duration::from_secs(2)).await,
        Some(key("a"))
    );
    queue.done(&key("a"));

    // The superseded entries do not fire again
    assert_eq!(get_within(&queue, Duration::from_secs(60)).await, None);
}

#[tokio::test(start_paused = true)]
async fn add_after_zero_is_immediate() {
    let queue = fast_queue("zero");
    queue.add_after(key("a"), Duration::ZERO);
    assert_eq!(queue.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn add_rate_limited_backs_off_and_forget_resets() {
    let queue = fast_queue("ratelimited");

    queue.add_rate_limited(key("a"));
    assert_eq!(queue.num_requeues(&key("a")), 1);
    assert_eq!(
        get_within(&queue, Duration::from_millis(6)).await,
        Some(key("a"))
    );
    queue.done(&key("a"));

    // Second failure waits 10ms
    queue.add_rate_limited(key("a"));
    assert_eq!(get_within(&queue, Duration::from_millis(8)).await, None);
    assert_eq!(
        get_within(&queue, Duration::from_millis(5)).await,
        Some(key("a"))
    );
    queue.done(&key("a"));

    queue.forget(&key("a"));
    assert_eq!(queue.num_requeues(&key("a")), 0);
}

#[tokio::test(start_paused = true)]
async fn delayed_adds_are_dropped_after_shutdown() {
    let queue = fast_queue("delay-shutdown");
    queue.add_after(key("a"), Duration::from_secs(1));
    queue.shut_down();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(queue.is_empty());
    assert_eq!(queue.get().await, None);
}

#[tokio::test]
async fn closed_completes_on_shutdown() {
    let queue = fast_queue("closed");
    let q = queue.clone();
    let waiter = tokio::spawn(async move { q.closed().await });

    queue.shut_down();
    timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
}
