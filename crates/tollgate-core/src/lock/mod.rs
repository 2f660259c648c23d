//! Resource-lock coordination.
//!
//! - **LockCoordinator**: grant/deny claims, release, query
//! - **Reaper**: background purge of claims left by unreachable owners
//! - **signal**: named completion signals between threads

pub mod coordinator;
mod reaper;
pub mod signal;

pub use self::coordinator::LockCoordinator;
pub use self::signal::Wakeup;
