//! Single instance enforcement for desktop applications.
//!
//! A process calls [`InstanceCoordinator::start`] before creating any window. The first process
//! for an [`ApplicationIdentity`] becomes the primary instance and listens for wake-up requests;
//! any later process sends one request to the primary and yields.

pub mod common;
pub mod config;
pub mod coordinator;
mod error;
pub mod identity;
pub mod lock;
pub mod memory;
pub mod signal;

pub use config::{CoordinatorConfig, Scope};
pub use coordinator::{InstanceCoordinator, InstanceState, Startup, EXIT_DEFERRED, EXIT_FAILURE};
pub use error::{Error, PlatformError};
pub use identity::{ApplicationIdentity, InstanceKey};
pub use lock::NamedExclusionLock;
pub use signal::{BroadcastSignal, ShowHandler};
