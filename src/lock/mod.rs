//! Named exclusion objects: at most one owner per [`InstanceKey`] at any time

use crate::{Error, InstanceKey};

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub(crate) mod unix;
        use self::unix as platform;
    } else if #[cfg(windows)] {
        mod windows;
        use self::windows as platform;
    } else {
        compile_error!("unsupported platform");
    }
}

pub use platform::{PlatformLock, PlatformLockHandle};

pub trait NamedExclusionLock {
    /// Proof of ownership. Dropping it releases the object, and so does the OS when the owning
    /// process dies.
    type Handle: Send + 'static;

    /// Atomically claim the object named by `key` without blocking.
    ///
    /// Returns `Ok(None)` when another owner already holds it. Failing to create or open the
    /// object at all is an [`Error::AcquisitionDenied`], which must never be read as
    /// "another instance is running".
    fn try_acquire(&self, key: &InstanceKey) -> Result<Option<Self::Handle>, Error>;

    fn release(&self, handle: Self::Handle) -> Result<(), Error> {
        drop(handle);
        Ok(())
    }
}
