// Keyfire Output Layer - Process Launcher
// Fire-and-forget execution of shortcut commands through the shell

use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

const SHELL: &str = "/bin/sh";

/// Highest descriptor the child sweeps when close_range is unavailable
const FD_SWEEP_CAP: libc::c_int = 65536;

/// CLOSE_RANGE_CLOEXEC from linux/close_range.h
const CLOSE_RANGE_CLOEXEC: libc::c_uint = 1 << 2;

/// Errors from launching a command
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to launch '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Receives the commands of activated shortcuts
pub trait CommandSink {
    fn launch(&mut self, command: &str) -> Result<(), LaunchError>;
}

/// Runs commands as `/bin/sh -c <command>` without waiting for them.
///
/// Children never inherit the daemon's device nodes, hotplug socket or lock
/// file: every descriptor above stderr is marked close-on-exec before the
/// shell is executed.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    dry_run: bool,
    fd_limit: libc::c_int,
    launched: usize,
}

impl ProcessLauncher {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            fd_limit: fd_limit(),
            launched: 0,
        }
    }

    /// Let the kernel reap exited children so they never linger as zombies.
    ///
    /// Installed once by the daemon before the first launch.
    pub fn install_reaper() -> io::Result<()> {
        // SAFETY: SIG_IGN is a valid disposition for SIGCHLD.
        if unsafe { libc::signal(libc::SIGCHLD, libc::SIG_IGN) } == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Number of commands handed to the shell so far
    pub fn launched(&self) -> usize {
        self.launched
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = Command::new(SHELL);
        cmd.arg("-c").arg(command).stdin(Stdio::null());

        let fd_limit = self.fd_limit;
        // SAFETY: the hook only calls async-signal-safe functions.
        unsafe {
            cmd.pre_exec(move || prepare_child(fd_limit));
        }
        cmd
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new(false)
    }
}

impl CommandSink for ProcessLauncher {
    fn launch(&mut self, command: &str) -> Result<(), LaunchError> {
        if self.dry_run {
            log::info!("Would launch '{}'", command);
            return Ok(());
        }

        log::info!("Launching '{}'", command);
        let child = self
            .command(command)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                command: command.to_string(),
                source,
            })?;
        log::debug!("Spawned pid {}", child.id());
        self.launched += 1;

        // Dropping a Child neither waits for nor kills it.
        drop(child);
        Ok(())
    }
}

/// Runs in the child between fork and exec.
fn prepare_child(fd_limit: libc::c_int) -> io::Result<()> {
    // SAFETY: signal and fcntl are async-signal-safe; no allocation here.
    unsafe {
        if libc::signal(libc::SIGCHLD, libc::SIG_DFL) == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }

        let swept = libc::syscall(
            libc::SYS_close_range,
            3 as libc::c_uint,
            libc::c_uint::MAX,
            CLOSE_RANGE_CLOEXEC,
        );
        if swept != 0 {
            for fd in 3..fd_limit {
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
        }
    }
    Ok(())
}

/// Upper bound for the descriptor sweep, computed in the parent
fn fd_limit() -> libc::c_int {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit writes into the struct we pass.
    let ok = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } == 0;
    if !ok || limit.rlim_cur == libc::RLIM_INFINITY {
        return FD_SWEEP_CAP;
    }
    libc::c_int::try_from(limit.rlim_cur)
        .unwrap_or(FD_SWEEP_CAP)
        .min(FD_SWEEP_CAP)
}

/// Records commands instead of running them.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    commands: Vec<String>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.commands)
    }
}

impl CommandSink for RecordingSink {
    fn launch(&mut self, command: &str) -> Result<(), LaunchError> {
        self.commands.push(command.to_string());
        Ok(())
    }
}
