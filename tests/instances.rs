//! Launches the demo host as real processes racing for the same identity
#![cfg(unix)]

use assert_cmd::cargo::CommandCargoExt;
use lone_instance::EXIT_DEFERRED;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::mpsc;
use std::time::Duration;
use uuid::Uuid;

const TIMEOUT: Duration = Duration::from_secs(10);

fn host(runtime_dir: &Path, identity: &str) -> Command {
    let mut cmd = Command::cargo_bin("lone-instance").unwrap();
    cmd.arg("--identity")
        .arg(identity)
        .arg("--runtime-dir")
        .arg(runtime_dir)
        .arg("--config")
        .arg(runtime_dir.join("no-config.json"))
        .stderr(Stdio::null());
    cmd
}

/// Runs the host to completion with stdin closed, so a primary exits right away
fn run_once(runtime_dir: &Path, identity: &str) -> Output {
    host(runtime_dir, identity)
        .stdin(Stdio::null())
        .output()
        .unwrap()
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_owned()
}

/// A long running host, kept alive until its stdin is closed
struct Running {
    child: Child,
    lines: mpsc::Receiver<String>,
}

impl Running {
    fn spawn(mut cmd: Command) -> Self {
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        let (tx, lines) = mpsc::channel();
        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });
        Self { child, lines }
    }

    fn next_line(&self) -> String {
        self.lines.recv_timeout(TIMEOUT).unwrap()
    }

    /// Close stdin and collect whatever else the host printed
    fn finish(mut self) -> (ExitStatus, Vec<String>) {
        drop(self.child.stdin.take());
        let status = self.child.wait().unwrap();
        let rest = self.lines.iter().collect();
        (status, rest)
    }
}

#[test]
fn second_launch_defers_and_shows_first_once() {
    let dir = tempfile::tempdir().unwrap();
    let identity = Uuid::new_v4().to_string();

    let first = Running::spawn(host(dir.path(), &identity));
    assert_eq!(first.next_line(), "primary");

    let second = run_once(dir.path(), &identity);
    assert_eq!(second.status.code(), Some(EXIT_DEFERRED));
    assert_eq!(stdout_of(&second), "deferred to existing instance");

    assert_eq!(first.next_line(), "show requested");
    std::thread::sleep(Duration::from_millis(300));
    let (status, rest) = first.finish();
    assert!(status.success());
    assert!(rest.is_empty(), "unexpected output {:?}", rest);
}

#[test]
fn distinct_identities_do_not_interfere() {
    let dir = tempfile::tempdir().unwrap();
    let first = Running::spawn(host(dir.path(), &Uuid::new_v4().to_string()));
    assert_eq!(first.next_line(), "primary");

    let other = run_once(dir.path(), &Uuid::new_v4().to_string());
    assert!(other.status.success());
    assert_eq!(stdout_of(&other), "primary");

    assert!(first
        .lines
        .recv_timeout(Duration::from_millis(300))
        .is_err());
    let (status, rest) = first.finish();
    assert!(status.success());
    assert!(rest.is_empty(), "unexpected output {:?}", rest);
}

#[test]
fn clean_shutdown_leaves_no_stale_lock() {
    let dir = tempfile::tempdir().unwrap();
    let identity = Uuid::new_v4().to_string();

    let first = Running::spawn(host(dir.path(), &identity));
    assert_eq!(first.next_line(), "primary");
    let (status, _) = first.finish();
    assert!(status.success());

    let next = run_once(dir.path(), &identity);
    assert!(next.status.success());
    assert_eq!(stdout_of(&next), "primary");
}

#[test]
fn crashed_primary_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let identity = Uuid::new_v4().to_string();

    let mut first = Running::spawn(host(dir.path(), &identity));
    assert_eq!(first.next_line(), "primary");
    first.child.kill().unwrap();
    first.child.wait().unwrap();

    // The OS releases the lock of a dead process, allow it a moment in case it is slow to do so
    let mut attempts = 0;
    let next = loop {
        let output = run_once(dir.path(), &identity);
        attempts += 1;
        if stdout_of(&output) == "primary" || attempts == 10 {
            break output;
        }
        std::thread::sleep(Duration::from_millis(100));
    };
    assert!(next.status.success());
    assert_eq!(stdout_of(&next), "primary");
}

#[test]
fn missing_identity_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_once(dir.path(), "00000000-0000-0000-0000-000000000000");
    assert_eq!(output.status.code(), Some(lone_instance::EXIT_FAILURE));
    assert!(stdout_of(&output).is_empty());
}
