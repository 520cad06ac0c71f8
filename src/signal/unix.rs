use crate::common::runtime_directory;
use crate::config::{CoordinatorConfig, Scope};
use crate::lock::unix::file_mode;
use crate::signal::{BroadcastSignal, ShowHandler};
use crate::{Error, InstanceKey};
use nix::errno::Errno;
use nix::fcntl::{fcntl, open, FcntlArg, FdFlag, OFlag};
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::stat::{fchmod, Mode};
use nix::unistd::{close, mkfifo, pipe, read, unlink, write};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

const MSG_SHOW_WINDOW: u8 = 1;

/// A FIFO in the runtime directory, named after the instance key
pub struct PlatformSignal {
    config: CoordinatorConfig,
}

impl PlatformSignal {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn channel_path(&self, key: &InstanceKey) -> std::io::Result<PathBuf> {
        Ok(runtime_directory(&self.config)?.join(format!("{}.ipc", key)))
    }
}

/// Owns the write end of the stop pipe. The FIFO and the read end of the stop pipe belong to
/// the watcher thread, which closes them on exit.
pub struct PlatformListener {
    stop_write_end: RawFd,
    path: PathBuf,
    watcher_thread: Option<JoinHandle<()>>,
}

impl PlatformListener {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

enum Drained {
    Empty,
    Failed(Errno),
}

/// Dispatch everything currently queued on the non-blocking FIFO
fn drain_channel(fd: RawFd, handler: &dyn ShowHandler) -> Drained {
    let mut buffer = [0_u8; 64];
    loop {
        match read(fd, &mut buffer) {
            Ok(0) | Err(Errno::EAGAIN) => return Drained::Empty,
            Ok(len) => {
                for msg in &buffer[..len] {
                    match *msg {
                        MSG_SHOW_WINDOW => handler.show_requested(),
                        other => log::debug!("Ignoring unknown message {}", other),
                    }
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Drained::Failed(e),
        }
    }
}

/// Wait for show requests on the FIFO until the stop pipe becomes readable or is closed
fn watch_channel(fd: RawFd, stop_read_end: RawFd, handler: Arc<dyn ShowHandler>) {
    loop {
        let mut pfds = [
            PollFd::new(fd, PollFlags::POLLIN),
            PollFd::new(stop_read_end, PollFlags::POLLIN),
        ];
        match poll(&mut pfds, -1) {
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(e) => {
                log::error!("Failed waiting for show requests: {}", e);
                break;
            }
        }
        if let Some(e) = pfds[1].revents() {
            if !e.is_empty() {
                break;
            }
        }
        if let Some(e) = pfds[0].revents() {
            if e.contains(PollFlags::POLLIN) {
                if let Drained::Failed(e) = drain_channel(fd, handler.as_ref()) {
                    log::error!("Failed reading show requests: {}", e);
                    break;
                }
            }
        }
    }
    close(fd).ok();
    close(stop_read_end).ok();
    log::debug!("Show request watcher thread exiting");
}

fn set_cloexec(fd: RawFd) -> nix::Result<()> {
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map(|_| ())
}

fn stop_pipe() -> nix::Result<(RawFd, RawFd)> {
    let (read_end, write_end) = pipe()?;
    if let Err(e) = set_cloexec(read_end).and_then(|_| set_cloexec(write_end)) {
        close(read_end).ok();
        close(write_end).ok();
        return Err(e);
    }
    Ok((read_end, write_end))
}

impl BroadcastSignal for PlatformSignal {
    type Listener = PlatformListener;

    fn register_listener(
        &self,
        key: &InstanceKey,
        handler: Arc<dyn ShowHandler>,
    ) -> Result<Self::Listener, Error> {
        let path = self
            .channel_path(key)
            .map_err(|e| Error::unregistered(key, e))?;
        let mode = file_mode(key.scope());
        // A FIFO left behind by a crashed instance is reused
        match mkfifo(&path, mode) {
            Ok(_) => {}
            Err(Errno::EEXIST) => {}
            Err(e) => return Err(Error::unregistered(key, e)),
        }
        // Opening read-write never blocks waiting for a writer, and the read end never sees
        // end-of-file when a sender disconnects
        let fd = open(
            &path,
            OFlag::O_RDWR | OFlag::O_NONBLOCK | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(|e| Error::unregistered(key, e))?;
        if key.scope() == Scope::System {
            // Undo the umask, and widen a FIFO reused from an earlier run
            if let Err(e) = fchmod(fd, mode) {
                log::debug!("Unable to share {}: {}", path.display(), e);
            }
        }
        let (stop_read_end, stop_write_end) = match stop_pipe() {
            Ok(p) => p,
            Err(e) => {
                close(fd).ok();
                return Err(Error::unregistered(key, e));
            }
        };
        let watcher_thread = match std::thread::Builder::new()
            .name("show-request-watcher".to_owned())
            .spawn(move || watch_channel(fd, stop_read_end, handler))
        {
            Ok(t) => t,
            Err(e) => {
                close(fd).ok();
                close(stop_read_end).ok();
                close(stop_write_end).ok();
                return Err(Error::unregistered(key, e));
            }
        };
        log::info!("Listening for show requests on {}", path.display());
        Ok(PlatformListener {
            stop_write_end,
            path,
            watcher_thread: Some(watcher_thread),
        })
    }

    fn send(&self, key: &InstanceKey) -> Result<(), Error> {
        let path = self
            .channel_path(key)
            .map_err(|e| Error::undelivered(key, e))?;
        // ENXIO means nobody is reading, ENOENT means nobody ever did
        let fd = open(
            &path,
            OFlag::O_WRONLY | OFlag::O_NONBLOCK | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(|e| Error::undelivered(key, e))?;
        let written = write(fd, &[MSG_SHOW_WINDOW]);
        close(fd).ok();
        written.map_err(|e| Error::undelivered(key, e))?;
        log::debug!("Sent show request on {}", path.display());
        Ok(())
    }
}

impl Drop for PlatformListener {
    fn drop(&mut self) {
        log::info!("Stopping show request watcher");
        // Closing the write end wakes the watcher too, should the write itself fail
        if let Err(e) = write(self.stop_write_end, &[0]) {
            log::debug!("Unable to signal show request watcher: {}", e);
        }
        close(self.stop_write_end).ok();
        if let Some(thread) = self.watcher_thread.take() {
            thread.join().ok();
        }
        unlink(&self.path).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ApplicationIdentity;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    fn setup(dir: &Path, guid: &str) -> (PlatformSignal, InstanceKey) {
        setup_scoped(dir, guid, Scope::Session)
    }

    fn setup_scoped(dir: &Path, guid: &str, scope: Scope) -> (PlatformSignal, InstanceKey) {
        let config = CoordinatorConfig {
            scope,
            runtime_dir: Some(dir.to_owned()),
            ..Default::default()
        };
        let identity = ApplicationIdentity::parse(guid).unwrap();
        (PlatformSignal::new(&config), identity.key(scope))
    }

    fn mode_of(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    fn channel_handler() -> (Arc<dyn ShowHandler>, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let handler: Arc<dyn ShowHandler> = Arc::new(move || {
            tx.lock().unwrap().send(()).ok();
        });
        (handler, rx)
    }

    #[test]
    fn send_reaches_listener() {
        let dir = tempfile::tempdir().unwrap();
        let (signal, key) = setup(dir.path(), "5b0e5f0e-3c1a-4c55-8a9e-5d1f7a2b9c01");
        let (handler, rx) = channel_handler();
        let _listener = signal.register_listener(&key, handler).unwrap();
        signal.send(&key).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn send_without_listener_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (signal, key) = setup(dir.path(), "5b0e5f0e-3c1a-4c55-8a9e-5d1f7a2b9c01");
        assert!(matches!(
            signal.send(&key),
            Err(Error::SignalDeliveryFailed { .. })
        ));
    }

    #[test]
    fn stale_fifo_without_reader_fails_then_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let (signal, key) = setup(dir.path(), "5b0e5f0e-3c1a-4c55-8a9e-5d1f7a2b9c01");
        let path = signal.channel_path(&key).unwrap();
        mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR).unwrap();
        assert!(signal.send(&key).is_err());

        let (handler, rx) = channel_handler();
        let _listener = signal.register_listener(&key, handler).unwrap();
        signal.send(&key).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn other_keys_are_not_notified() {
        let dir = tempfile::tempdir().unwrap();
        let (signal, key_a) = setup(dir.path(), "5b0e5f0e-3c1a-4c55-8a9e-5d1f7a2b9c01");
        let (_, key_b) = setup(dir.path(), "e3a1b8c4-77d2-4f4e-9b1a-2c3d4e5f6a7b");
        let (handler_a, rx_a) = channel_handler();
        let (handler_b, rx_b) = channel_handler();
        let _listener_a = signal.register_listener(&key_a, handler_a).unwrap();
        let _listener_b = signal.register_listener(&key_b, handler_b).unwrap();

        signal.send(&key_a).unwrap();
        rx_a.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(rx_b.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn dropping_listener_removes_channel() {
        let dir = tempfile::tempdir().unwrap();
        let (signal, key) = setup(dir.path(), "5b0e5f0e-3c1a-4c55-8a9e-5d1f7a2b9c01");
        let (handler, rx) = channel_handler();
        let listener = signal.register_listener(&key, handler).unwrap();
        let path = listener.path().to_owned();
        assert!(path.exists());
        drop(listener);
        assert!(!path.exists());
        assert!(signal.send(&key).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn session_scope_channel_is_private() {
        let dir = tempfile::tempdir().unwrap();
        let (signal, key) = setup(dir.path(), "5b0e5f0e-3c1a-4c55-8a9e-5d1f7a2b9c01");
        let (handler, _rx) = channel_handler();
        let listener = signal.register_listener(&key, handler).unwrap();
        assert_eq!(mode_of(listener.path()), 0o600);
    }

    #[test]
    fn system_scope_channel_is_shared() {
        let dir = tempfile::tempdir().unwrap();
        let (signal, key) = setup_scoped(
            dir.path(),
            "5b0e5f0e-3c1a-4c55-8a9e-5d1f7a2b9c01",
            Scope::System,
        );
        let (handler, _rx) = channel_handler();
        let listener = signal.register_listener(&key, handler).unwrap();
        assert!(listener.path().ends_with(format!("{}.ipc", key)));
        assert_eq!(mode_of(listener.path()), 0o666);
    }

    #[test]
    fn system_scope_reused_channel_is_widened() {
        let dir = tempfile::tempdir().unwrap();
        let (signal, key) = setup_scoped(
            dir.path(),
            "5b0e5f0e-3c1a-4c55-8a9e-5d1f7a2b9c01",
            Scope::System,
        );
        let path = signal.channel_path(&key).unwrap();
        mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR).unwrap();
        assert_eq!(mode_of(&path), 0o600);

        let (handler, _rx) = channel_handler();
        let _listener = signal.register_listener(&key, handler).unwrap();
        assert_eq!(mode_of(&path), 0o666);
    }

    #[test]
    fn system_scope_send_reaches_listener() {
        let dir = tempfile::tempdir().unwrap();
        let guid = "5b0e5f0e-3c1a-4c55-8a9e-5d1f7a2b9c01";
        let (signal, key) = setup_scoped(dir.path(), guid, Scope::System);
        let (_, session_key) = setup(dir.path(), guid);
        let (handler, rx) = channel_handler();
        let _listener = signal.register_listener(&key, handler).unwrap();

        // The session channel of the same application is a different FIFO
        assert!(signal.send(&session_key).is_err());
        signal.send(&key).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn every_queued_request_is_dispatched() {
        let dir = tempfile::tempdir().unwrap();
        let (signal, key) = setup(dir.path(), "5b0e5f0e-3c1a-4c55-8a9e-5d1f7a2b9c01");
        let (handler, rx) = channel_handler();
        let _listener = signal.register_listener(&key, handler).unwrap();
        for _ in 0..5 {
            signal.send(&key).unwrap();
        }
        for _ in 0..5 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn drop_waits_for_busy_handler_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let (signal, key) = setup(dir.path(), "5b0e5f0e-3c1a-4c55-8a9e-5d1f7a2b9c01");
        let (started_tx, started_rx) = mpsc::channel();
        let started_tx = Mutex::new(started_tx);
        let shown = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = shown.clone();
        let handler: Arc<dyn ShowHandler> = Arc::new(move || {
            started_tx.lock().unwrap().send(()).ok();
            std::thread::sleep(Duration::from_millis(200));
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        let listener = signal.register_listener(&key, handler).unwrap();
        let path = listener.path().to_owned();

        signal.send(&key).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // Requests queued behind the busy handler, the stop pipe is still seen
        for _ in 0..3 {
            signal.send(&key).ok();
        }
        drop(listener);

        let after_drop = shown.load(std::sync::atomic::Ordering::SeqCst);
        assert!(after_drop >= 1);
        assert!(!path.exists());
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(shown.load(std::sync::atomic::Ordering::SeqCst), after_drop);
    }

    #[test]
    fn listener_can_be_registered_again_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let (signal, key) = setup(dir.path(), "5b0e5f0e-3c1a-4c55-8a9e-5d1f7a2b9c01");
        for _ in 0..3 {
            let (handler, rx) = channel_handler();
            let listener = signal.register_listener(&key, handler).unwrap();
            signal.send(&key).unwrap();
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
            drop(listener);
        }
    }
}
