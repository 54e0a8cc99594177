// Keyfire CLI - Terminal Echo
// Keeps typed keys off the terminal while --print-keys shows them

use std::io;
use std::os::unix::io::RawFd;

/// Restores the saved terminal attributes on drop
pub struct EchoGuard {
    fd: RawFd,
    saved: libc::termios,
}

impl EchoGuard {
    /// Turn off echo on `fd`. Returns `None` when `fd` is not a terminal.
    pub fn disable(fd: RawFd) -> io::Result<Option<Self>> {
        // SAFETY: isatty only inspects the descriptor.
        if unsafe { libc::isatty(fd) } == 0 {
            return Ok(None);
        }

        // SAFETY: termios is plain data; tcgetattr fills it in.
        let mut saved: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut saved) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let mut quiet = saved;
        quiet.c_lflag &= !libc::ECHO;
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &quiet) } != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Some(Self { fd, saved }))
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        // SAFETY: restoring attributes read from the same descriptor.
        if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &self.saved) } != 0 {
            log::warn!(
                "Failed to restore terminal echo: {}",
                io::Error::last_os_error()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_a_terminal() {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        assert!(EchoGuard::disable(fds[0]).unwrap().is_none());
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}
