mod queue;
mod rate_limiter;
pub use queue::*;
pub use rate_limiter::*;

#[cfg(test)]
mod queue_test;
