//! Manager construction from layered settings and whole-manager shutdown paths.
use std::sync::Arc;
use std::time::Duration;

use reconcile_runtime::DynamicObject;
use reconcile_runtime::EnqueueRequestForObject;
use reconcile_runtime::Error;
use reconcile_runtime::ManagerBuilder;
use reconcile_runtime::ManagerState;
use reconcile_runtime::MemoryStore;
use reconcile_runtime::ReconcileResult;
use reconcile_runtime::ReconcilerFn;
use reconcile_runtime::RuntimeConfig;
use reconcile_runtime::SetupError;
use serial_test::serial;
use tokio_util::sync::CancellationToken;

use crate::commons::memory_manager;
use crate::commons::scheme;
use crate::commons::start_manager;

#[test]
#[serial]
fn test_manager_settings_come_from_environment() {
    temp_env::with_vars(
        vec![
            ("RECONCILE__STORE__ENDPOINT", Some("memory://from-env")),
            ("RECONCILE__CONTROLLER__MAX_CONCURRENT_RECONCILES", Some("4")),
            ("RECONCILE__CACHE__RESYNC_PERIOD_MS", Some("60000")),
        ],
        || {
            let settings = RuntimeConfig::new().unwrap().validate().unwrap();
            let manager = ManagerBuilder::from_settings(settings)
                .scheme(scheme())
                .backend(Arc::new(MemoryStore::new()))
                .build()
                .unwrap();

            assert_eq!(manager.config().endpoint, "memory://from-env");
            assert_eq!(manager.settings().controller.max_concurrent_reconciles, 4);
            assert_eq!(
                manager.settings().cache.resync_period(),
                Some(Duration::from_secs(60))
            );
        },
    );
}

#[test]
#[serial]
fn test_manager_without_store_endpoint_is_rejected() {
    temp_env::with_vars(
        vec![("RECONCILE__STORE__ENDPOINT", None::<&str>)],
        || {
            let settings = RuntimeConfig::new().unwrap();
            let err = ManagerBuilder::from_settings(settings)
                .backend(Arc::new(MemoryStore::new()))
                .build()
                .unwrap_err();
            assert_eq!(err.to_string(), "must specify Config");
        },
    );
}

#[tokio::test]
async fn test_controller_failure_stops_the_manager() {
    let (manager, _store) = memory_manager();
    let healthy = manager
        .new_controller(
            "healthy",
            ReconcilerFn::new(|_| async { Ok(ReconcileResult::done()) }),
        )
        .unwrap();
    let broken = manager
        .new_controller(
            "broken",
            ReconcilerFn::new(|_| async { Ok(ReconcileResult::done()) }),
        )
        .unwrap();
    // Never registered in the scheme, so its source cannot start
    broken
        .watch_kind::<DynamicObject, _>(EnqueueRequestForObject, vec![])
        .unwrap();

    let stop = CancellationToken::new();
    let err = tokio::time::timeout(Duration::from_secs(5), manager.start(stop.clone()))
        .await
        .expect("manager stops on its own")
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Setup(SetupError::TypeNotRegistered { .. })
    ));
    assert_eq!(manager.state(), ManagerState::Stopped);
    assert!(healthy.queue().is_shutting_down());
}

#[tokio::test]
async fn test_stop_signal_shuts_everything_down() {
    let (manager, _store) = memory_manager();
    let controller = manager
        .new_controller(
            "idle",
            ReconcilerFn::new(|_| async { Ok(ReconcileResult::done()) }),
        )
        .unwrap();

    let stop = CancellationToken::new();
    let handle = start_manager(&manager, &stop);
    stop.cancel();

    handle.await.unwrap().unwrap();
    assert_eq!(manager.state(), ManagerState::Stopped);
    assert!(controller.queue().is_shutting_down());
    assert!(manager
        .add(Box::new(controller.clone()))
        .is_err());
}
