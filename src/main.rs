//! Demo host: a headless application with a single "window", showing how a UI layer wires
//! itself to the instance coordinator
use anyhow::Context;
use clap::Parser;
use lone_instance::common::{install_logger, APP_NAME};
use lone_instance::{
    ApplicationIdentity, CoordinatorConfig, InstanceCoordinator, Scope, Startup, EXIT_DEFERRED,
    EXIT_FAILURE,
};
use std::io::Read;
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
    /// Also write the log to disk
    #[arg(long)]
    log_to_disk: bool,
    /// Override the config file path
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the application GUID embedded at build time
    #[arg(long)]
    identity: Option<String>,
    /// Confine the instance to the login session or share it across the system
    #[arg(long, value_enum)]
    scope: Option<Scope>,
    /// Override the directory holding the lock and channel files
    #[arg(long)]
    runtime_dir: Option<PathBuf>,
}

#[derive(Debug)]
enum UserEvent {
    // Another instance was launched - we should restore and bring forward the window
    OpenWindow(&'static str),
    // The application should exit
    Exit(&'static str),
}

/// Stand-in for the real window, only tracks what the UI toolkit would be asked to do
#[derive(Debug)]
struct Window {
    minimised: bool,
    restored_count: usize,
}

impl Window {
    fn create() -> Self {
        log::info!("Creating main window");
        Self {
            minimised: true,
            restored_count: 0,
        }
    }

    fn restore(&mut self) {
        if self.minimised {
            log::debug!("Window was minimised, un-minimising");
        }
        self.minimised = false;
        self.restored_count += 1;
    }
}

fn load_config(args: &Args) -> anyhow::Result<CoordinatorConfig> {
    let mut config = CoordinatorConfig::load(args.config.clone())
        .context("Unable to load config file")?
        .unwrap_or_default();
    if let Some(scope) = args.scope {
        config.scope = scope;
    }
    if let Some(dir) = &args.runtime_dir {
        config.runtime_dir = Some(dir.clone());
    }
    Ok(config)
}

fn identity(args: &Args) -> anyhow::Result<ApplicationIdentity> {
    match &args.identity {
        Some(guid) => ApplicationIdentity::parse(guid).context("Invalid --identity"),
        None => ApplicationIdentity::from_build_metadata(option_env!("LONE_INSTANCE_APP_GUID"))
            .context("This build has no usable application identity"),
    }
}

/// Closing stdin or pressing Ctrl-C asks the event loop to exit
fn watch_for_exit(sender: Sender<UserEvent>) -> anyhow::Result<()> {
    let ctrlc_sender = Mutex::new(sender.clone());
    ctrlc::set_handler(move || {
        if let Ok(s) = ctrlc_sender.lock() {
            s.send(UserEvent::Exit("Ctrl-C")).ok();
        }
    })
    .context("Error setting Ctrl-C handler")?;
    std::thread::spawn(move || {
        let mut sink = [0_u8; 256];
        let mut stdin = std::io::stdin();
        while matches!(stdin.read(&mut sink), Ok(n) if n > 0) {}
        sender.send(UserEvent::Exit("stdin closed")).ok();
    });
    Ok(())
}

fn run(args: Args) -> anyhow::Result<i32> {
    log::info!("Starting {}, version: {}", APP_NAME, env!("CARGO_PKG_VERSION"));
    let identity = identity(&args)?;
    let config = load_config(&args)?;

    let (tx, rx) = mpsc::channel();
    let proxy = Mutex::new(tx.clone());
    let mut coordinator = InstanceCoordinator::platform(&identity, config);

    // Must happen before any window exists
    let startup = coordinator
        .start(move || {
            if let Ok(p) = proxy.lock() {
                p.send(UserEvent::OpenWindow("Another instance")).ok();
            }
        })
        .context("Unable to check whether the application is already running")?;
    if startup == Startup::Yield {
        println!("deferred to existing instance");
        return Ok(EXIT_DEFERRED);
    }
    println!("primary");

    let result = (|| -> anyhow::Result<()> {
        watch_for_exit(tx)?;
        let mut window = Window::create();
        for event in rx {
            log::debug!("Received event {:?}", event);
            match event {
                UserEvent::OpenWindow(reason) => {
                    log::info!("Restoring window ({})", reason);
                    window.restore();
                    println!("show requested");
                }
                UserEvent::Exit(reason) => {
                    log::info!("Exiting ({})", reason);
                    break;
                }
            }
        }
        log::debug!("Window was restored {} times", window.restored_count);
        Ok(())
    })();

    // Released on every exit path, errors included
    let stopped = coordinator.stop();
    result?;
    stopped?;
    Ok(0)
}

fn main() {
    let args: Args = Args::parse();

    if let Err(e) = install_logger(args.debug, args.log_to_disk) {
        eprintln!("Unable to install logger: {:#}", e);
        std::process::exit(EXIT_FAILURE);
    }
    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            log::error!("{:#}", e);
            std::process::exit(EXIT_FAILURE);
        }
    }
}
