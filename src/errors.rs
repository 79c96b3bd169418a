//! Reconcile Runtime Error Hierarchy
//!
//! Errors are grouped by the phase in which they surface:
//! setup (construction), sync (cache readiness), store (remote I/O),
//! injection, lifecycle, and user reconcile logic.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Construction failures; nothing has been started
    #[error(transparent)]
    Setup(#[from] SetupError),

    /// Cache readiness failures
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Remote store and watch transport failures
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Dependency injection failures
    #[error(transparent)]
    Inject(#[from] InjectError),

    /// Component lifecycle violations
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Runtime configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Failure returned by user reconcile logic
    #[error("Reconcile failed: {0}")]
    Reconcile(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Wraps any user error as a reconcile failure.
    pub fn reconcile<E>(e: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Reconcile(e.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// Required builder field or argument was not provided
    #[error("must specify {0}")]
    MissingField(&'static str),

    /// Option value rejected at construction time
    #[error("invalid option {field}: {reason}")]
    InvalidOption { field: &'static str, reason: String },

    /// Type was never registered in the scheme
    #[error("type {type_name} is not registered in the scheme")]
    TypeNotRegistered { type_name: &'static str },

    /// RestMapper could not resolve a kind
    #[error("no resource mapping for {kind}: {reason}")]
    MapperLookup { kind: String, reason: String },

    /// Client factory failed
    #[error("failed to construct client: {0}")]
    ClientConstruction(String),

    /// Cache factory failed
    #[error("failed to construct cache: {0}")]
    CacheConstruction(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Sync did not complete within the configured timeout
    #[error("controller {controller}: timed out waiting for caches to sync after {timeout:?}")]
    Timeout { controller: String, timeout: Duration },

    /// Stop fired, or a source reported failure, before sync completed
    #[error("controller {controller}: failed waiting for caches to sync")]
    NotReached { controller: String },

    /// Read attempted before the type's initial listing completed
    #[error("cache for {kind} has not synced yet")]
    NotSynced { kind: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Requested object does not exist
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },

    /// Create on an existing object
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: String },

    /// Optimistic concurrency check failed
    #[error("conflict on {kind} {key}: expected version {expected}, found {actual}")]
    Conflict {
        kind: String,
        key: String,
        expected: u64,
        actual: u64,
    },

    /// Watch resume point has been compacted away; caller must re-list
    #[error("resource version {0} is too old")]
    Expired(u64),

    /// Request exceeded the configured deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection or protocol level failure
    #[error("transport failure: {0}")]
    Transport(String),

    /// Encoding or decoding an object failed
    #[error(transparent)]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    /// Component asked for a dependency the injector does not hold
    #[error("dependency {0} is not available for injection")]
    Unavailable(&'static str),

    /// Component refused an injected dependency
    #[error("component rejected {dependency}: {reason}")]
    Rejected {
        dependency: &'static str,
        reason: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Start called on something that is already running or has run
    #[error("{0} has already been started")]
    AlreadyStarted(String),

    /// Component added to a manager that has stopped
    #[error("manager has stopped")]
    ManagerStopped,

    /// Component task ended abnormally
    #[error("component {name} failed: {reason}")]
    ComponentFailed { name: String, reason: String },

    /// Background task panicked or was aborted
    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

impl Error {
    /// True for errors a caller may retry without changing anything.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Store(StoreError::Timeout(_))
                | Error::Store(StoreError::Transport(_))
                | Error::Store(StoreError::Conflict { .. })
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Store(StoreError::NotFound { .. }))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Store(StoreError::Codec(e))
    }
}
