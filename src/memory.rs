//! In-process backends for both capabilities.
//!
//! Clones of one [`MemoryRegistry`] behave like processes sharing an OS session, which makes it
//! possible to exercise the coordinator from threads, and lets host applications test their
//! startup paths without touching the real runtime directory.

use crate::lock::NamedExclusionLock;
use crate::signal::{BroadcastSignal, ShowHandler};
use crate::{Error, InstanceKey};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    held: Mutex<HashSet<String>>,
    listeners: Mutex<HashMap<String, Vec<(u64, Arc<dyn ShowHandler>)>>>,
    denied: Mutex<HashSet<String>>,
    refuse_listeners: AtomicBool,
    next_listener_id: AtomicU64,
}

#[derive(Clone, Default)]
pub struct MemoryRegistry(Arc<Inner>);

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking handler must not wedge every other user of the registry
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make acquisition of `key` fail as if the OS refused access
    pub fn deny(&self, key: &InstanceKey) {
        locked(&self.0.denied).insert(key.to_string());
    }

    /// Make every following listener registration fail
    pub fn refuse_listeners(&self, refuse: bool) {
        self.0.refuse_listeners.store(refuse, Ordering::SeqCst);
    }

    pub fn is_held(&self, key: &InstanceKey) -> bool {
        locked(&self.0.held).contains(key.as_str())
    }

    pub fn listener_count(&self, key: &InstanceKey) -> usize {
        locked(&self.0.listeners)
            .get(key.as_str())
            .map(|l| l.len())
            .unwrap_or(0)
    }
}

pub struct MemoryLockHandle {
    registry: MemoryRegistry,
    key: String,
}

impl Drop for MemoryLockHandle {
    fn drop(&mut self) {
        locked(&self.registry.0.held).remove(&self.key);
    }
}

impl NamedExclusionLock for MemoryRegistry {
    type Handle = MemoryLockHandle;

    fn try_acquire(&self, key: &InstanceKey) -> Result<Option<Self::Handle>, Error> {
        if locked(&self.0.denied).contains(key.as_str()) {
            return Err(Error::denied(key, "access denied"));
        }
        // Check and insert happen under one guard
        if locked(&self.0.held).insert(key.to_string()) {
            Ok(Some(MemoryLockHandle {
                registry: self.clone(),
                key: key.to_string(),
            }))
        } else {
            Ok(None)
        }
    }
}

pub struct MemoryListener {
    registry: MemoryRegistry,
    key: String,
    id: u64,
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        let mut listeners = locked(&self.registry.0.listeners);
        if let Some(entries) = listeners.get_mut(&self.key) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                listeners.remove(&self.key);
            }
        }
    }
}

impl BroadcastSignal for MemoryRegistry {
    type Listener = MemoryListener;

    fn register_listener(
        &self,
        key: &InstanceKey,
        handler: Arc<dyn ShowHandler>,
    ) -> Result<Self::Listener, Error> {
        if self.0.refuse_listeners.load(Ordering::SeqCst) {
            return Err(Error::unregistered(key, "listener registration refused"));
        }
        let id = self.0.next_listener_id.fetch_add(1, Ordering::Relaxed);
        locked(&self.0.listeners)
            .entry(key.to_string())
            .or_default()
            .push((id, handler));
        Ok(MemoryListener {
            registry: self.clone(),
            key: key.to_string(),
            id,
        })
    }

    fn send(&self, key: &InstanceKey) -> Result<(), Error> {
        let handlers: Vec<Arc<dyn ShowHandler>> = locked(&self.0.listeners)
            .get(key.as_str())
            .map(|l| l.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        if handlers.is_empty() {
            return Err(Error::undelivered(key, "no listener registered"));
        }
        // Handlers run outside the guard, they may register or drop listeners themselves
        for handler in handlers {
            handler.show_requested();
        }
        Ok(())
    }
}
