//! Fire and forget "show yourself" notifications between processes of one application

use crate::{Error, InstanceKey};
use std::sync::Arc;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        use self::unix as platform;
    } else if #[cfg(windows)] {
        mod windows;
        use self::windows as platform;
    } else {
        compile_error!("unsupported platform");
    }
}

pub use platform::{PlatformListener, PlatformSignal};

/// Reaction to a show request.
///
/// Called on a notification thread, never on the UI thread, so implementations should only
/// hand the request over to the UI event loop (e.g. through an event loop proxy or channel).
pub trait ShowHandler: Send + Sync + 'static {
    fn show_requested(&self);
}

impl<F> ShowHandler for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn show_requested(&self) {
        self()
    }
}

pub trait BroadcastSignal {
    /// Registration guard, dropping it stops delivery to this process
    type Listener: Send + 'static;

    /// Start receiving notifications sent for `key` until the returned listener is dropped
    fn register_listener(
        &self,
        key: &InstanceKey,
        handler: Arc<dyn ShowHandler>,
    ) -> Result<Self::Listener, Error>;

    /// Send a single notification to whoever listens on `key`, without waiting for it to be
    /// handled
    fn send(&self, key: &InstanceKey) -> Result<(), Error>;
}
