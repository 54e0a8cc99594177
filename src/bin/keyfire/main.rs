// Keyfire CLI
// Global keyboard shortcut daemon reading evdev devices directly

mod lock;
mod terminal;

use std::os::unix::net::UnixStream;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use keyfire_core::event::DEFAULT_WAIT_TIMEOUT;
use keyfire_core::{
    list_devices, resolve_config_path, Config, EvdevOpener, EventLoop, EventLoopError, LoopConfig,
    ProcessLauncher, UdevMonitor,
};

use lock::{default_lock_path, InstanceLock, LockError};
use terminal::EchoGuard;

mod exit {
    pub const RUNTIME: u8 = 1;
    pub const ALREADY_RUNNING: u8 = 3;
    pub const NO_SHORTCUTS: u8 = 4;
    pub const NO_DEVICES: u8 = 5;
}

/// Run commands when key combinations are held, on any keyboard
#[derive(Parser, Debug)]
#[command(name = "keyfire")]
#[command(version)]
#[command(about = "Global keyboard shortcut daemon", long_about = None)]
struct Args {
    /// Shortcut file (line format, or TOML when it ends in .toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log commands instead of running them
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Print the pressed keys after every input event
    #[arg(short, long)]
    print_keys: bool,

    /// Seconds without input before held keys are forgotten
    #[arg(short, long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// List keyboard devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Validate the config and exit
    #[arg(long)]
    check_config: bool,

    /// Instance lock file
    #[arg(long, value_name = "PATH")]
    lock_file: Option<std::path::PathBuf>,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn print_devices() -> anyhow::Result<()> {
    let mut monitor = UdevMonitor::new()?;
    let devices = list_devices(&mut monitor)?;
    println!("Found {} keyboard device(s):", devices.len());
    for device in &devices {
        match &device.name {
            Some(name) => println!("  {} ({})", device.path.display(), name),
            None => println!("  {} (not usable)", device.path.display()),
        }
    }
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let path = resolve_config_path(args.config.as_deref())?;
    let config =
        Config::load(&path).with_context(|| format!("loading {}", path.display()))?;
    if config.shortcuts.is_empty() {
        return Err(EventLoopError::NoShortcutsLoaded)
            .with_context(|| format!("nothing usable in {}", path.display()));
    }
    Ok(config)
}

fn check_config(config: &Config) {
    for shortcut in &config.shortcuts {
        println!("{}", shortcut);
    }
    println!(
        "Configuration is valid ({} shortcut(s))",
        config.shortcuts.len()
    );
}

fn loop_config(args: &Args, config: &Config) -> LoopConfig {
    LoopConfig {
        wait_timeout: args
            .timeout
            .map(Duration::from_secs)
            .or(config.timeout)
            .unwrap_or(DEFAULT_WAIT_TIMEOUT),
        print_keys: args.print_keys,
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    if args.list_devices {
        return print_devices();
    }

    let config = load_config(&args)?;
    if args.check_config {
        check_config(&config);
        return Ok(());
    }

    let lock_path = args.lock_file.clone().unwrap_or_else(default_lock_path);
    let lock = InstanceLock::acquire(&lock_path)?;
    log::debug!("Holding instance lock {}", lock.path().display());

    // The flag is set before the wakeup byte is written, so the loop sees it
    // as soon as the wait returns.
    let shutdown = Arc::new(AtomicBool::new(false));
    let (wakeup, wakeup_writer) = UnixStream::pair().context("creating signal pipe")?;
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("installing signal handlers")?;
        signal_hook::low_level::pipe::register(signal, wakeup_writer.try_clone()?)
            .context("installing signal handlers")?;
    }
    ProcessLauncher::install_reaper().context("ignoring SIGCHLD")?;

    let monitor = UdevMonitor::new().map_err(EventLoopError::from)?;
    let launcher = ProcessLauncher::new(args.dry_run);
    let settings = loop_config(&args, &config);
    log::debug!("Wait timeout {:?}", settings.wait_timeout);

    let _echo = if args.print_keys {
        EchoGuard::disable(libc::STDIN_FILENO).context("disabling terminal echo")?
    } else {
        None
    };

    let mut event_loop =
        EventLoop::start(settings, EvdevOpener, monitor, launcher, config.shortcuts)?;
    event_loop
        .watch_wakeups(wakeup)
        .context("watching the signal pipe")?;
    log::info!("keyfire is running. Press Ctrl+C to exit.");
    event_loop.run(&shutdown)?;
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(LockError::AlreadyRunning(_)) = err.downcast_ref::<LockError>() {
        return exit::ALREADY_RUNNING;
    }
    match err.downcast_ref::<EventLoopError>() {
        Some(EventLoopError::NoShortcutsLoaded) => exit::NO_SHORTCUTS,
        Some(EventLoopError::NoDevicesAvailable) => exit::NO_DEVICES,
        _ => exit::RUNTIME,
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyfire_core::{Key, Shortcut};

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["keyfire", "--config", "~/keys.conf"]);
        assert_eq!(args.config.as_deref(), Some("~/keys.conf"));
        assert!(!args.verbose);
        assert!(!args.dry_run);
        assert!(!args.print_keys);
        assert!(args.timeout.is_none());
        assert!(!args.list_devices);
        assert!(!args.check_config);
        assert!(args.lock_file.is_none());
    }

    #[test]
    fn test_args_with_options() {
        let args = Args::parse_from([
            "keyfire",
            "-v",
            "--dry-run",
            "--print-keys",
            "--timeout",
            "5",
            "--lock-file",
            "/tmp/k.lock",
        ]);
        assert!(args.verbose);
        assert!(args.dry_run);
        assert!(args.print_keys);
        assert_eq!(args.timeout, Some(5));
        assert_eq!(args.lock_file, Some(std::path::PathBuf::from("/tmp/k.lock")));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let err = Args::try_parse_from(["keyfire", "--timeout", "0"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_timeout_precedence() {
        let mut config = Config::default();
        let args = Args::parse_from(["keyfire"]);
        assert_eq!(loop_config(&args, &config).wait_timeout, DEFAULT_WAIT_TIMEOUT);

        config.timeout = Some(Duration::from_secs(10));
        assert_eq!(
            loop_config(&args, &config).wait_timeout,
            Duration::from_secs(10)
        );

        let args = Args::parse_from(["keyfire", "--timeout", "3"]);
        assert_eq!(loop_config(&args, &config).wait_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_exit_codes() {
        let err = anyhow::Error::from(EventLoopError::NoShortcutsLoaded).context("loading");
        assert_eq!(exit_code(&err), exit::NO_SHORTCUTS);

        let err = anyhow::Error::from(EventLoopError::NoDevicesAvailable);
        assert_eq!(exit_code(&err), exit::NO_DEVICES);

        let err = anyhow::Error::from(LockError::AlreadyRunning("/tmp/x".into()));
        assert_eq!(exit_code(&err), exit::ALREADY_RUNNING);

        let err = anyhow::anyhow!("something else");
        assert_eq!(exit_code(&err), exit::RUNTIME);
    }

    #[test]
    fn test_load_config_rejects_empty_file() {
        let path = std::env::temp_dir().join(format!("keyfire-empty-{}.conf", std::process::id()));
        std::fs::write(&path, "# nothing here\n").unwrap();
        let args = Args::parse_from(["keyfire", "--config", path.to_str().unwrap()]);
        let err = load_config(&args).unwrap_err();
        assert_eq!(exit_code(&err), exit::NO_SHORTCUTS);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_check_config_accepts_shortcuts() {
        let config = Config {
            shortcuts: vec![Shortcut::new([Key::LEFTMETA, Key::T], "foot").unwrap()],
            ..Config::default()
        };
        check_config(&config);
    }
}
