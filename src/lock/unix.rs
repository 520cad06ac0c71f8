use crate::common::runtime_directory;
use crate::config::{CoordinatorConfig, Scope};
use crate::lock::NamedExclusionLock;
use crate::{Error, InstanceKey};
use nix::errno::Errno;
use nix::fcntl::{flock, open, FlockArg, OFlag};
use nix::sys::stat::{fchmod, Mode};
use nix::unistd::close;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

/// `flock()` on a file in the runtime directory. The kernel drops the lock together with the
/// last descriptor, so a crashed owner never leaves a stale lock behind.
pub struct PlatformLock {
    config: CoordinatorConfig,
}

impl PlatformLock {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn lock_path(&self, key: &InstanceKey) -> std::io::Result<PathBuf> {
        Ok(runtime_directory(&self.config)?.join(format!("{}.lock", key)))
    }
}

pub(crate) fn file_mode(scope: Scope) -> Mode {
    match scope {
        Scope::Session => Mode::S_IRUSR | Mode::S_IWUSR,
        Scope::System => {
            Mode::S_IRUSR
                | Mode::S_IWUSR
                | Mode::S_IRGRP
                | Mode::S_IWGRP
                | Mode::S_IROTH
                | Mode::S_IWOTH
        }
    }
}

#[derive(Debug)]
pub struct PlatformLockHandle {
    fd: Option<RawFd>,
    path: PathBuf,
}

impl PlatformLockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unlock(&mut self) -> nix::Result<()> {
        match self.fd.take() {
            Some(fd) => {
                let unlocked = flock(fd, FlockArg::Unlock);
                close(fd)?;
                unlocked
            }
            None => Ok(()),
        }
    }
}

impl Drop for PlatformLockHandle {
    fn drop(&mut self) {
        self.unlock().ok();
    }
}

impl NamedExclusionLock for PlatformLock {
    type Handle = PlatformLockHandle;

    fn try_acquire(&self, key: &InstanceKey) -> Result<Option<Self::Handle>, Error> {
        let path = self.lock_path(key).map_err(|e| Error::denied(key, e))?;
        let mode = file_mode(key.scope());
        // The file itself is never unlinked, deleting it would let a second process lock a
        // fresh inode while the first still holds the old one
        let fd = open(
            &path,
            OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_CLOEXEC,
            mode,
        )
        .map_err(|e| Error::denied(key, e))?;
        if key.scope() == Scope::System {
            // Undo the umask so that other users can open the file too
            fchmod(fd, mode).ok();
        }
        match flock(fd, FlockArg::LockExclusiveNonblock) {
            Ok(()) => {
                log::info!("Acquired lock on {}", path.display());
                Ok(Some(PlatformLockHandle { fd: Some(fd), path }))
            }
            Err(e) if e == Errno::EWOULDBLOCK => {
                log::debug!("Lock on {} is held by another process", path.display());
                close(fd).ok();
                Ok(None)
            }
            Err(e) => {
                close(fd).ok();
                Err(Error::denied(key, e))
            }
        }
    }

    fn release(&self, mut handle: Self::Handle) -> Result<(), Error> {
        handle.unlock().map_err(|e| Error::ReleaseFailed {
            key: handle.path.display().to_string(),
            source: Box::new(e),
        })?;
        log::debug!("Released lock on {}", handle.path.display());
        Ok(())
    }
}
