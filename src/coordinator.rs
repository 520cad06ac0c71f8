use crate::config::CoordinatorConfig;
use crate::lock::{NamedExclusionLock, PlatformLock};
use crate::signal::{BroadcastSignal, PlatformSignal, ShowHandler};
use crate::{ApplicationIdentity, Error, InstanceKey};
use std::sync::Arc;

/// Exit code of a process that found another instance running and deferred to it
pub const EXIT_DEFERRED: i32 = 0;

/// Exit code of a process that could not determine whether it is the only instance
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Unacquired,
    /// This process owns the instance lock and listens for show requests
    Primary,
    /// Another process owns the lock, this one must exit without creating any UI
    Secondary,
    Released,
}

/// What the caller of [`InstanceCoordinator::start`] must do next
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Startup {
    /// Continue initialising, this is the primary instance
    Proceed,
    /// Exit immediately with [`EXIT_DEFERRED`], the running instance has been asked to show itself
    Yield,
}

/// Owns the instance lock for the lifetime of the application.
///
/// Create one at startup, call [`start`](Self::start) before any window exists and
/// [`stop`](Self::stop) on the way out. Dropping a primary coordinator stops it as well, and if
/// the process dies without either the OS releases the lock.
pub struct InstanceCoordinator<L = PlatformLock, S = PlatformSignal>
where
    L: NamedExclusionLock,
    S: BroadcastSignal,
{
    key: InstanceKey,
    config: CoordinatorConfig,
    lock: L,
    signal: S,
    state: InstanceState,
    handle: Option<L::Handle>,
    listener: Option<S::Listener>,
}

impl InstanceCoordinator {
    /// Coordinator backed by the native primitives of the current platform
    pub fn platform(identity: &ApplicationIdentity, config: CoordinatorConfig) -> Self {
        let lock = PlatformLock::new(&config);
        let signal = PlatformSignal::new(&config);
        InstanceCoordinator::new(identity, config, lock, signal)
    }
}

impl<L, S> InstanceCoordinator<L, S>
where
    L: NamedExclusionLock,
    S: BroadcastSignal,
{
    pub fn new(
        identity: &ApplicationIdentity,
        config: CoordinatorConfig,
        lock: L,
        signal: S,
    ) -> Self {
        Self {
            key: identity.key(config.scope),
            config,
            lock,
            signal,
            state: InstanceState::Unacquired,
            handle: None,
            listener: None,
        }
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    /// Decide whether this process is the primary instance.
    ///
    /// As primary, `on_show_requested` is registered and will be called from a notification
    /// thread whenever a later process starts. As secondary, the running instance is notified
    /// and [`Startup::Yield`] is returned. Only a failure to test the lock is an error.
    pub fn start<H: ShowHandler>(&mut self, on_show_requested: H) -> Result<Startup, Error> {
        if self.state != InstanceState::Unacquired {
            return Err(Error::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        match self.lock.try_acquire(&self.key)? {
            Some(handle) => {
                self.handle = Some(handle);
                self.state = InstanceState::Primary;
                log::info!("Running as the primary instance ({})", self.key);
                let key = self.key.clone();
                let on_signal_received = move || {
                    log::info!("Show requested by another instance ({})", key);
                    on_show_requested.show_requested();
                };
                match self
                    .signal
                    .register_listener(&self.key, Arc::new(on_signal_received))
                {
                    Ok(listener) => self.listener = Some(listener),
                    Err(e) => {
                        log::warn!("{}, other instances will not be able to show this one", e)
                    }
                }
                Ok(Startup::Proceed)
            }
            None => {
                self.state = InstanceState::Secondary;
                log::info!("Another instance is already running ({})", self.key);
                if let Err(e) = self.notify_existing() {
                    log::warn!("{}", e);
                }
                Ok(Startup::Yield)
            }
        }
    }

    /// Ask the primary instance to show itself, retrying briefly in case it has acquired the
    /// lock but not registered its listener yet
    pub fn notify_existing(&self) -> Result<(), Error> {
        if self.state != InstanceState::Secondary {
            return Err(Error::InvalidState {
                operation: "notify_existing",
                state: self.state,
            });
        }
        let mut attempt = 1;
        loop {
            match self.signal.send(&self.key) {
                Ok(()) => {
                    log::info!("Asked the running instance to show itself");
                    return Ok(());
                }
                Err(e) if attempt >= self.config.delivery_attempts => return Err(e),
                Err(e) => {
                    log::debug!("Show request attempt {} failed: {}", attempt, e);
                    attempt += 1;
                    std::thread::sleep(self.config.retry_interval());
                }
            }
        }
    }

    /// Stop listening and release the instance lock
    pub fn stop(&mut self) -> Result<(), Error> {
        if self.state != InstanceState::Primary {
            return Err(Error::InvalidState {
                operation: "stop",
                state: self.state,
            });
        }
        // The channel goes first, so that nothing can reach a listener of a released instance
        drop(self.listener.take());
        self.state = InstanceState::Released;
        if let Some(handle) = self.handle.take() {
            self.lock.release(handle)?;
        }
        log::info!("Released the primary instance ({})", self.key);
        Ok(())
    }
}

impl<L, S> Drop for InstanceCoordinator<L, S>
where
    L: NamedExclusionLock,
    S: BroadcastSignal,
{
    fn drop(&mut self) {
        if self.state == InstanceState::Primary {
            if let Err(e) = self.stop() {
                log::error!("{}", e);
            }
        }
    }
}
