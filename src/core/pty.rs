//! Pseudo-terminal wrapper for Unix
//!
//! This module spawns a shell on the slave end of a pseudo terminal and
//! exposes the master end for non-blocking reads and writes. Running the
//! shell on a real pty (rather than pipes) is what makes it behave
//! interactively: it prints its prompt and the line discipline echoes input.

use std::collections::BTreeMap;
use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::poll::{PollFd, PollFlags, PollTimeout};
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{self, Signal};
use nix::unistd::{self, Pid};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open pseudo terminal: {0}")]
    Open(#[source] Errno),

    #[error("Failed to spawn process: {0}")]
    Spawn(#[source] io::Error),

    #[error("Failed to configure pseudo terminal: {0}")]
    Configure(#[source] Errno),

    #[error("Failed to read from PTY: {0}")]
    Read(#[source] Errno),

    #[error("Failed to write to PTY: {0}")]
    Write(#[source] Errno),

    #[error("Failed to poll PTY: {0}")]
    Poll(#[source] Errno),

    #[error("Failed to signal process: {0}")]
    Signal(#[source] Errno),

    #[error("Failed to wait for process: {0}")]
    Wait(#[source] io::Error),

    #[error("Write to PTY stalled after {0:?}")]
    WriteStalled(Duration),
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// How long a write may keep hitting a full buffer before giving up
const WRITE_STALL_LIMIT: Duration = Duration::from_secs(5);

/// A child process running on a pseudo terminal
pub struct Pty {
    master: OwnedFd,
    child: Child,
}

impl Pty {
    /// Spawn `program` with `args` on a fresh pty of the given size.
    ///
    /// The child inherits the host environment plus `env`, and the host's
    /// current directory. It becomes a session leader with the pty as its
    /// controlling terminal. The master is set non-blocking.
    pub fn spawn(
        program: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        cols: u16,
        rows: u16,
    ) -> Result<Self> {
        let size = winsize(cols, rows);
        let pty = openpty(Some(&size), None).map_err(PtyError::Open)?;

        // The master must not leak into the child, or EOF never arrives
        fcntl(pty.master.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(PtyError::Configure)?;

        let stdin = pty.slave.try_clone().map_err(PtyError::Spawn)?;
        let stdout = pty.slave.try_clone().map_err(PtyError::Spawn)?;
        let stderr = pty.slave;

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(env)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        // Safety: only async-signal-safe calls between fork and exec
        unsafe {
            command.pre_exec(|| {
                unistd::setsid()?;
                if libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY as _, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = command.spawn().map_err(PtyError::Spawn)?;
        // `command` still holds the slave ends; close them in the parent
        drop(command);

        let flags = fcntl(pty.master.as_raw_fd(), FcntlArg::F_GETFL).map_err(PtyError::Configure)?;
        let flags = OFlag::from_bits_truncate(flags);
        fcntl(
            pty.master.as_raw_fd(),
            FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK),
        )
        .map_err(PtyError::Configure)?;

        tracing::debug!("Spawned {} (pid {}) on {}x{} pty", program, child.id(), cols, rows);

        Ok(Pty {
            master: pty.master,
            child,
        })
    }

    /// Read bytes from the PTY (output from shell) - non-blocking
    ///
    /// Returns `Ok(0)` when nothing is available, and also once the child
    /// has closed its end (EIO on Linux).
    pub fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        match unistd::read(self.master.as_raw_fd(), buffer) {
            Ok(n) => Ok(n),
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => Ok(0),
            Err(Errno::EIO) => Ok(0),
            Err(e) => Err(PtyError::Read(e)),
        }
    }

    /// Write all bytes to the PTY (input to shell)
    pub fn write_all(&self, data: &[u8]) -> Result<()> {
        let started = Instant::now();
        let mut written = 0;
        while written < data.len() {
            match unistd::write(&self.master, &data[written..]) {
                Ok(n) => written += n,
                Err(Errno::EAGAIN) | Err(Errno::EINTR) => {
                    if started.elapsed() > WRITE_STALL_LIMIT {
                        return Err(PtyError::WriteStalled(WRITE_STALL_LIMIT));
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(PtyError::Write(e)),
            }
        }
        Ok(())
    }

    /// Send a line of text to the shell (appends newline)
    pub fn send_line(&self, text: &str) -> Result<()> {
        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text.as_bytes());
        data.push(b'\n');
        self.write_all(&data)
    }

    /// Wait up to `timeout` for the master to become readable.
    ///
    /// Returns `true` if data (or a hangup) is pending.
    pub fn poll_readable(&self, timeout: Duration) -> Result<bool> {
        let mut fds = [PollFd::new(self.master.as_fd(), PollFlags::POLLIN)];
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let timeout = PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX);

        match nix::poll::poll(&mut fds, timeout) {
            Ok(0) => Ok(false),
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                Ok(revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP))
            }
            Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(PtyError::Poll(e)),
        }
    }

    /// Check if the process is still running
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Exit code if the process has exited
    ///
    /// Termination by signal reports the negated signal number.
    pub fn exit_code(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(exit_code_of(status)),
            _ => None,
        }
    }

    /// Send SIGTERM to the child process
    pub fn terminate(&self) -> Result<()> {
        signal::kill(self.pid(), Signal::SIGTERM).map_err(PtyError::Signal)
    }

    /// Wait up to `grace` for the child to exit on its own.
    pub fn wait_exit(&mut self, grace: Duration) -> Result<Option<i32>> {
        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait().map_err(PtyError::Wait)? {
                Some(status) => return Ok(Some(exit_code_of(status))),
                None if Instant::now() >= deadline => return Ok(None),
                None => std::thread::sleep(Duration::from_millis(10)),
            }
        }
    }

    /// Wait up to `grace` for the child to exit, escalating to SIGKILL.
    pub fn wait_timeout(&mut self, grace: Duration) -> Result<i32> {
        if let Some(code) = self.wait_exit(grace)? {
            return Ok(code);
        }

        tracing::warn!("Process {} did not exit in {:?}, killing", self.child.id(), grace);
        // Already-exited races surface from wait() below
        let _ = self.child.kill();
        let status = self.child.wait().map_err(PtyError::Wait)?;
        Ok(exit_code_of(status))
    }

    /// The child's process ID
    pub fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }

    /// The child's working directory, where the OS exposes it
    pub fn cwd(&self) -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            std::fs::read_link(format!("/proc/{}/cwd", self.child.id())).ok()
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        // Best-effort: terminate if still alive, then reap to avoid zombies
        if matches!(self.child.try_wait(), Ok(None)) {
            let _ = self.terminate();
            let _ = self.wait_timeout(Duration::from_millis(200));
        }
        // OwnedFd closes the master when dropped
    }
}

fn winsize(cols: u16, rows: u16) -> Winsize {
    Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(0)
}
