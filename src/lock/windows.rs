use crate::config::{CoordinatorConfig, Scope};
use crate::lock::NamedExclusionLock;
use crate::{Error, InstanceKey};
use windows::core::{Error as WinError, HSTRING};
use windows::Win32::Foundation::{CloseHandle, ERROR_ALREADY_EXISTS, HANDLE};
use windows::Win32::System::Threading::CreateMutexW;

/// A named kernel mutex, in the `Local\` namespace for session scope and `Global\` for system
/// scope. Windows destroys it when the last handle closes, including on process death.
pub struct PlatformLock;

impl PlatformLock {
    pub fn new(_config: &CoordinatorConfig) -> Self {
        PlatformLock
    }
}

fn mutex_name(key: &InstanceKey) -> HSTRING {
    let namespace = match key.scope() {
        Scope::Session => "Local",
        Scope::System => "Global",
    };
    HSTRING::from(format!("{}\\{}", namespace, key))
}

#[derive(Debug)]
pub struct PlatformLockHandle(HANDLE);

impl Drop for PlatformLockHandle {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) }.ok();
    }
}

impl NamedExclusionLock for PlatformLock {
    type Handle = PlatformLockHandle;

    fn try_acquire(&self, key: &InstanceKey) -> Result<Option<Self::Handle>, Error> {
        let name = mutex_name(key);
        let handle =
            unsafe { CreateMutexW(None, false, &name) }.map_err(|e| Error::denied(key, e))?;
        // CreateMutexW succeeds for an existing mutex, but reports it through the last error
        if WinError::from_win32().code() == ERROR_ALREADY_EXISTS.to_hresult() {
            log::debug!("Mutex {} is held by another process", name);
            unsafe { CloseHandle(handle) }.ok();
            return Ok(None);
        }
        log::info!("Acquired lock: {}", name);
        Ok(Some(PlatformLockHandle(handle)))
    }
}
