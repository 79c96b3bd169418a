//! Manager: owns the shared singletons and the lifecycle of every component.
mod builder;
mod inject;
mod manager;
mod runnable;

pub use builder::*;
pub use inject::*;
pub use manager::*;
pub use runnable::*;
