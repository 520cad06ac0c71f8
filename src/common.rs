//! Common constants and helper functions used by the library and the demo host

use crate::config::{CoordinatorConfig, Scope};
use anyhow::Context;
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, SharedLogger, TermLogger, TerminalMode, WriteLogger};
use std::fs;
use std::fs::File;
use std::io;
use std::path::PathBuf;

pub const APP_NAME: &str = "Lone Instance";

pub const APP_DIRECTORY_NAME: &str = "lone-instance";

/// Path to the local application data folder
/// This is where the logs will be stored
pub fn local_data_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIRECTORY_NAME)
}

/// Path to the local application config folder
pub fn config_directory() -> PathBuf {
    dirs::config_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIRECTORY_NAME)
}

/// Directory holding the lock and channel files for a scope, created if necessary.
///
/// Session scope uses the per user runtime directory (`$XDG_RUNTIME_DIR`), which lives exactly
/// as long as the login session. System scope uses the shared temporary directory.
///
/// In system scope the directory is made `1777` like `/tmp` itself: every user may create their
/// lock and channel files in it, but only the owner of a file may remove or rename it.
pub fn runtime_directory(config: &CoordinatorConfig) -> io::Result<PathBuf> {
    let path = match (&config.runtime_dir, config.scope) {
        (Some(p), _) => p.clone(),
        (None, Scope::Session) => dirs::runtime_dir()
            .map(|p| p.join(APP_DIRECTORY_NAME))
            .unwrap_or_else(|| local_data_directory().join("run")),
        (None, Scope::System) => std::env::temp_dir().join(APP_DIRECTORY_NAME),
    };
    fs::create_dir_all(&path)?;
    #[cfg(unix)]
    if config.scope == Scope::System {
        share_directory(&path);
    }
    Ok(path)
}

/// Only the owner may change the mode, a directory created by another user is left alone
#[cfg(unix)]
fn share_directory(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    const SHARED_STICKY: u32 = 0o1777;
    match fs::metadata(path) {
        Ok(m) if m.permissions().mode() & 0o7777 == SHARED_STICKY => {}
        _ => {
            if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(SHARED_STICKY)) {
                log::debug!("Unable to share {}: {}", path.display(), e);
            }
        }
    }
}

pub fn install_logger(debug: bool, to_disk: bool) -> anyhow::Result<()> {
    let filter = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let config = simplelog::ConfigBuilder::default()
        .set_target_level(LevelFilter::Debug)
        .build();
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        filter,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if to_disk {
        fs::create_dir_all(local_data_directory()).context("Unable to create data directory")?;
        let file = File::create(get_log_path()).context("Unable to create log file")?;
        let file_logger = WriteLogger::new(filter, config, file);
        loggers.push(file_logger);
    }
    CombinedLogger::init(loggers)?;
    if debug {
        log::warn!("Debug logging enabled");
    }
    Ok(())
}

pub fn get_log_path() -> PathBuf {
    local_data_directory().join("log.txt")
}
