//! Shell session driver
//!
//! Owns one interactive shell on a pty and turns "run this command line"
//! into "here is what the terminal showed". Completion is detected by
//! waiting for the shell's prompt (the sentinel) to reappear at the end of
//! the output. After a `cd` the host process moves to wherever the shell
//! ended up, so relative paths resolve the same way on both sides.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::command;
use super::pty::{Pty, PtyError};
use super::term::remove_ansi_escapes;
use crate::cassette::{Cassette, CassetteError};
use crate::config::SessionConfig;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("Shell did not show its prompt during startup:\n\n{partial}")]
    SessionInit { partial: String },

    #[error("Terminal output does not end with the prompt:\n\n{partial}")]
    ShellDesync { partial: String },

    #[error("'{output}' does not start with '{command}'. Is non-ASCII terminal input involved?")]
    EchoMismatch { command: String, output: String },

    #[error("Shell exited (code {code:?}) while running a command:\n\n{partial}")]
    ProcessExited { code: Option<i32>, partial: String },

    #[error("Could not follow the shell into {}: {source}", target.display())]
    CwdMirror {
        target: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Command was cancelled")]
    Cancelled,

    #[error("Another command is already running in this session")]
    Busy,

    #[error("Session lost track of the shell after an earlier failure")]
    Desynced,

    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error(transparent)]
    Cassette(#[from] CassetteError),
}

pub type Result<T> = std::result::Result<T, ShellError>;

/// Cooperative cancellation for an in-flight command
///
/// Cancelling only stops the wait. The shell keeps whatever it was doing,
/// so the session is unusable afterwards.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One command on its way through the shell
#[derive(Debug)]
struct PendingCommand<'a> {
    command: &'a str,
    buffer: Vec<u8>,
    elapsed: Duration,
}

impl<'a> PendingCommand<'a> {
    fn new(command: &'a str) -> Self {
        Self {
            command,
            buffer: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}

/// Why the read loop stopped before seeing the prompt
enum ReadFailure {
    TimedOut,
    Exited(Option<i32>),
    Cancelled,
    Pty(PtyError),
}

impl From<PtyError> for ReadFailure {
    fn from(e: PtyError) -> Self {
        ReadFailure::Pty(e)
    }
}

struct Inner {
    pty: Pty,
    /// Prompt exactly as the shell renders it
    sentinel: String,
    cassette: Option<Cassette>,
    desynced: bool,
}

/// A long-lived interactive shell
///
/// Commands run one at a time. A second caller arriving while a command is
/// in flight gets [`ShellError::Busy`] instead of sharing the read loop.
pub struct ShellSession {
    config: SessionConfig,
    inner: Mutex<Inner>,
}

impl ShellSession {
    /// Spawn the shell and consume its startup banner.
    pub fn open(config: SessionConfig) -> Result<Self> {
        let mut env = config.env.clone();
        env.insert("PS1".to_string(), config.prompt.clone());
        env.entry("PROMPT_COMMAND".to_string()).or_default();

        let mut pty = Pty::spawn(&config.shell, &config.args, &env, config.cols, config.rows)?;
        thread::sleep(config.init_delay());

        let mut banner = PendingCommand::new("");
        if let Err(failure) = read_until_settled(&mut pty, &mut banner, &config) {
            if let ReadFailure::Pty(e) = failure {
                return Err(e.into());
            }
            // Dropping the pty reaps the child
            return Err(ShellError::SessionInit {
                partial: banner.text(),
            });
        }

        let banner = banner.text();
        let sentinel = match banner.rfind('\n') {
            Some(idx) => banner[idx + 1..].to_string(),
            None => banner,
        };

        info!(
            "Opened {} (pid {}), prompt {:?}",
            config.shell,
            pty.pid(),
            sentinel
        );

        Ok(Self {
            config,
            inner: Mutex::new(Inner {
                pty,
                sentinel,
                cassette: None,
                desynced: false,
            }),
        })
    }

    /// Serve non-state commands from (and record them into) `cassette`.
    pub fn with_cassette(self, cassette: Cassette) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.cassette = Some(cassette);
        }
        self
    }

    /// Run one command line and return its rendered output.
    pub fn run_command(&self, command: &str) -> Result<String> {
        self.run(command, None)
    }

    /// Like [`run_command`](Self::run_command), giving up once `cancel` fires.
    pub fn run_command_with_cancel(&self, command: &str, cancel: &CancelToken) -> Result<String> {
        self.run(command, Some(cancel))
    }

    /// The prompt used to detect command completion
    pub fn sentinel(&self) -> Option<String> {
        self.inner.lock().ok().map(|inner| inner.sentinel.clone())
    }

    /// Whether an earlier failure left the shell in an unknown state
    pub fn is_desynced(&self) -> bool {
        self.inner.lock().map(|inner| inner.desynced).unwrap_or(true)
    }

    /// Ask the shell to exit, then terminate it if it does not.
    ///
    /// Returns the shell's exit code (negative for a signal).
    pub fn close(self) -> Result<i32> {
        let grace = self.config.close_grace();
        let Inner { mut pty, .. } = self
            .inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // A shell that is gone already cannot take input
        let _ = pty.send_line("exit");
        let code = match pty.wait_exit(grace)? {
            Some(code) => code,
            None => {
                warn!("Shell ignored exit, sending SIGTERM");
                let _ = pty.terminate();
                pty.wait_timeout(grace)?
            }
        };

        info!("Closed shell (exit code {})", code);
        Ok(code)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        match self.inner.try_lock() {
            Ok(inner) => Ok(inner),
            Err(TryLockError::WouldBlock) => Err(ShellError::Busy),
            Err(TryLockError::Poisoned(_)) => Err(ShellError::Desynced),
        }
    }

    fn run(&self, command: &str, cancel: Option<&CancelToken>) -> Result<String> {
        let mut inner = self.lock()?;
        if inner.desynced {
            return Err(ShellError::Desynced);
        }

        let raw = inner.raw_output(command, &self.config, cancel)?;
        render_output(command, &raw, &inner.sentinel)
    }
}

impl Inner {
    /// Raw output for `command`, from the cassette when allowed.
    fn raw_output(
        &mut self,
        command: &str,
        config: &SessionConfig,
        cancel: Option<&CancelToken>,
    ) -> Result<String> {
        let replayable = !command::is_state_command(command);

        if replayable {
            if let Some(recorded) = self.cassette.as_ref().and_then(|c| c.get(command)) {
                debug!("Replaying {:?} from cassette", command);
                return Ok(recorded.to_string());
            }
        } else if self.cassette.as_ref().and_then(|c| c.get(command)).is_some() {
            warn!("Ignoring cassette entry for state-changing command {:?}", command);
        }

        let raw = self.execute(command, config, cancel)?;

        if !replayable {
            self.follow_directory(config)?;
        } else if let Some(cassette) = self.cassette.as_mut() {
            cassette.record(command, &raw)?;
        }
        Ok(raw)
    }

    /// Send `command` to the shell and collect everything up to the prompt.
    fn execute(
        &mut self,
        command: &str,
        config: &SessionConfig,
        cancel: Option<&CancelToken>,
    ) -> Result<String> {
        debug!("Running {:?}", command);

        if let Err(e) = self.pty.send_line(command) {
            self.desynced = true;
            return Err(e.into());
        }

        let mut pending = PendingCommand::new(command);
        let read = read_until_prompt(
            &mut self.pty,
            &mut pending,
            self.sentinel.as_bytes(),
            config,
            config.read_timeout(),
            cancel,
        );

        match read {
            Ok(()) => {
                debug!(
                    "{:?} finished after {:?} ({} bytes)",
                    pending.command,
                    pending.elapsed,
                    pending.buffer.len()
                );
                Ok(pending.text())
            }
            Err(failure) => {
                self.desynced = true;
                let partial = pending.text();
                warn!("{:?} failed after {:?}", pending.command, pending.elapsed);
                Err(match failure {
                    ReadFailure::TimedOut => ShellError::ShellDesync { partial },
                    ReadFailure::Exited(code) => ShellError::ProcessExited { code, partial },
                    ReadFailure::Cancelled => ShellError::Cancelled,
                    ReadFailure::Pty(e) => ShellError::Pty(e),
                })
            }
        }
    }

    /// Move the host process into the shell's working directory.
    ///
    /// Failing to do so leaves the two sides disagreeing about what relative
    /// paths mean, so the session is marked desynced.
    fn follow_directory(&mut self, config: &SessionConfig) -> Result<()> {
        let target = match self.pty.cwd() {
            Some(dir) => dir,
            None => self.query_directory(config)?,
        };
        if std::env::current_dir().ok().as_ref() == Some(&target) {
            return Ok(());
        }

        match std::env::set_current_dir(&target) {
            Ok(()) => {
                info!("Host working directory is now {}", target.display());
                Ok(())
            }
            Err(source) => {
                self.desynced = true;
                Err(ShellError::CwdMirror { target, source })
            }
        }
    }

    /// Ask the shell where it is, for systems without `/proc`.
    ///
    /// This clobbers `$?` from the preceding `cd`.
    fn query_directory(&mut self, config: &SessionConfig) -> Result<PathBuf> {
        const QUERY: &str = "builtin pwd";
        let raw = self.execute(QUERY, config, None)?;
        let output = render_output(QUERY, &raw, &self.sentinel)?;
        Ok(PathBuf::from(output.trim_end_matches('\n')))
    }
}

/// Read the startup banner until the shell goes quiet on a prompt line.
///
/// Returns early when the literal configured prompt shows up. Otherwise a
/// refresh interval without output, after a non-empty last line, counts as
/// the prompt, so `PS1` values with escapes such as `\u` or `\w` work.
fn read_until_settled(
    pty: &mut Pty,
    banner: &mut PendingCommand<'_>,
    config: &SessionConfig,
) -> std::result::Result<(), ReadFailure> {
    let started = Instant::now();
    let timeout = config.init_timeout();
    let refresh = config.refresh_interval();
    let literal = config.prompt.as_bytes();
    let mut chunk = vec![0u8; config.output_size.max(1)];

    loop {
        banner.elapsed = started.elapsed();

        if !literal.is_empty() && banner.buffer.ends_with(literal) {
            return Ok(());
        }
        if banner.elapsed >= timeout {
            return Err(ReadFailure::TimedOut);
        }

        let wait = refresh.min(timeout - banner.elapsed);
        let ready = pty.poll_readable(wait)?;
        if ready {
            let n = pty.read(&mut chunk)?;
            if n > 0 {
                banner.buffer.extend_from_slice(&chunk[..n]);
                continue;
            }
        }

        if !pty.is_running() {
            return Err(ReadFailure::Exited(pty.exit_code()));
        }
        if !ready && wait >= refresh && ends_on_prompt_line(&banner.buffer) {
            return Ok(());
        }
    }
}

/// Whether the text after the last line break is something visible.
fn ends_on_prompt_line(buffer: &[u8]) -> bool {
    let last = match buffer.iter().rposition(|&b| b == b'\n') {
        Some(idx) => &buffer[idx + 1..],
        None => buffer,
    };
    last.iter().any(|b| !b.is_ascii_whitespace())
}

/// Poll the shell until the buffer ends with `prompt`.
fn read_until_prompt(
    pty: &mut Pty,
    pending: &mut PendingCommand<'_>,
    prompt: &[u8],
    config: &SessionConfig,
    timeout: Duration,
    cancel: Option<&CancelToken>,
) -> std::result::Result<(), ReadFailure> {
    let started = Instant::now();
    let refresh = config.refresh_interval();
    let mut chunk = vec![0u8; config.output_size.max(1)];

    loop {
        pending.elapsed = started.elapsed();

        if pending.buffer.ends_with(prompt) {
            return Ok(());
        }
        if cancel.map(CancelToken::is_cancelled).unwrap_or(false) {
            return Err(ReadFailure::Cancelled);
        }
        if pending.elapsed >= timeout {
            return Err(ReadFailure::TimedOut);
        }

        let wait = refresh.min(timeout - pending.elapsed);
        if pty.poll_readable(wait)? {
            let n = pty.read(&mut chunk)?;
            if n > 0 {
                pending.buffer.extend_from_slice(&chunk[..n]);
                continue;
            }
        }

        if !pty.is_running() {
            return Err(ReadFailure::Exited(pty.exit_code()));
        }
    }
}

/// Turn raw shell output for `command` into what the terminal showed.
///
/// The raw text must start with the echoed command. The echo, its line
/// break and the trailing `sentinel` are removed before rendering.
pub fn render_output(command: &str, raw: &str, sentinel: &str) -> Result<String> {
    let mismatch = || ShellError::EchoMismatch {
        command: command.to_string(),
        output: raw.to_string(),
    };

    if !raw.starts_with(command) {
        return Err(mismatch());
    }

    // Replayed output recorded under another prompt lands here
    let body = raw
        .strip_suffix(sentinel)
        .ok_or_else(|| ShellError::ShellDesync {
            partial: raw.to_string(),
        })?;
    let unix = body.replace("\r\n", "\n");
    let after_echo = unix.strip_prefix(command).ok_or_else(mismatch)?;
    let output = after_echo.strip_prefix('\n').unwrap_or(after_echo);

    Ok(remove_ansi_escapes(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::MutexGuard;

    /// Sessions inherit and mutate the process-wide cwd
    static CWD_LOCK: Mutex<()> = Mutex::new(());

    struct CwdGuard {
        original: PathBuf,
        _lock: MutexGuard<'static, ()>,
    }

    impl CwdGuard {
        fn enter(dir: &Path) -> Self {
            let lock = CWD_LOCK.lock().unwrap_or_else(|p| p.into_inner());
            let original = std::env::current_dir().unwrap();
            std::env::set_current_dir(dir).unwrap();
            Self {
                original,
                _lock: lock,
            }
        }
    }

    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.original);
        }
    }

    fn test_config() -> SessionConfig {
        let mut config = SessionConfig {
            refresh_interval_ms: 20,
            read_timeout_ms: 10_000,
            ..SessionConfig::default()
        };
        config.env.insert("TERM".to_string(), "dumb".to_string());
        config
    }

    #[test]
    fn test_render_output_strips_echo_and_prompt() {
        let raw = "ls Makefile\r\nMakefile\r\nzamm$ ";
        assert_eq!(render_output("ls Makefile", raw, "zamm$ ").unwrap(), "Makefile\n");
        assert_eq!(render_output("true", "true\r\nzamm$ ", "zamm$ ").unwrap(), "");
    }

    #[test]
    fn test_render_output_requires_prompt() {
        let err = render_output("true", "true\r\nbash$ ", "zamm$ ").unwrap_err();
        assert!(matches!(err, ShellError::ShellDesync { .. }));
    }

    #[test]
    fn test_prompt_line_detection() {
        assert!(ends_on_prompt_line(b"welcome\r\nroot$ "));
        assert!(ends_on_prompt_line(b"$ "));
        assert!(!ends_on_prompt_line(b"welcome\r\n"));
        assert!(!ends_on_prompt_line(b""));
    }

    #[test]
    fn test_render_output_rejects_bad_echo() {
        let err = render_output("echo hé", "echo h?\r\nhé\r\nzamm$ ", "zamm$ ").unwrap_err();
        assert!(matches!(err, ShellError::EchoMismatch { .. }));
    }

    #[test]
    fn test_ls_single_match() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Makefile"), "all:\n").unwrap();
        fs::write(dir.path().join("README"), "hi\n").unwrap();
        let _cwd = CwdGuard::enter(dir.path());

        let session = ShellSession::open(test_config()).expect("open failed");
        assert_eq!(session.sentinel().as_deref(), Some("zamm$ "));
        assert_eq!(session.run_command("ls Makefile").unwrap(), "Makefile\n");
        assert_eq!(session.close().expect("close failed"), 0);
    }

    #[test]
    fn test_prompt_with_escapes_is_rendered_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let _cwd = CwdGuard::enter(dir.path());

        let config = SessionConfig {
            prompt: r"\s$ ".to_string(),
            init_timeout_ms: 3_000,
            ..test_config()
        };
        let session = ShellSession::open(config).expect("open failed");
        assert_eq!(session.sentinel().as_deref(), Some("bash$ "));
        assert_eq!(session.run_command("echo hi").unwrap(), "hi\n");
    }

    #[test]
    fn test_cd_moves_host_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("tests")).unwrap();
        let _cwd = CwdGuard::enter(dir.path());

        let session = ShellSession::open(test_config()).expect("open failed");
        assert_eq!(session.run_command("cd tests").unwrap(), "");
        assert!(std::env::current_dir().unwrap().ends_with("tests"));

        let pwd = session.run_command("pwd").unwrap();
        assert!(pwd.trim().ends_with("/tests"), "unexpected pwd: {pwd:?}");
    }

    #[test]
    fn test_cd_dash_returns_host_to_previous_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        let _cwd = CwdGuard::enter(dir.path());
        let start = std::env::current_dir().unwrap();

        let session = ShellSession::open(test_config()).expect("open failed");
        session.run_command("cd a").unwrap();
        assert_eq!(std::env::current_dir().unwrap(), start.join("a"));

        let output = session.run_command("cd -").unwrap();
        assert_eq!(output.trim_end(), start.to_str().unwrap());
        assert_eq!(std::env::current_dir().unwrap(), start);
        assert!(!session.is_desynced());
    }

    #[test]
    fn test_cd_with_variable_is_followed() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a").join("b")).unwrap();
        let _cwd = CwdGuard::enter(dir.path());
        let start = std::env::current_dir().unwrap();

        let session = ShellSession::open(test_config()).expect("open failed");
        session.run_command("export BASE=a").unwrap();
        assert_eq!(session.run_command("cd $BASE/b").unwrap(), "");
        assert_eq!(std::env::current_dir().unwrap(), start.join("a").join("b"));
    }

    #[test]
    fn test_unreachable_shell_directory_desyncs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("gone")).unwrap();
        let _cwd = CwdGuard::enter(dir.path());
        let start = std::env::current_dir().unwrap();

        let session = ShellSession::open(test_config()).expect("open failed");
        let err = session.run_command("cd gone && rmdir ../gone").unwrap_err();
        assert!(matches!(err, ShellError::CwdMirror { .. }), "got {err:?}");
        assert!(session.is_desynced());
        assert_eq!(std::env::current_dir().unwrap(), start);
    }

    #[test]
    fn test_failed_cd_leaves_host_directory() {
        let dir = tempfile::tempdir().unwrap();
        let _cwd = CwdGuard::enter(dir.path());
        let before = std::env::current_dir().unwrap();

        let session = ShellSession::open(test_config()).expect("open failed");
        let output = session.run_command("cd no-such-dir").unwrap();
        assert!(output.contains("no-such-dir"), "unexpected output: {output:?}");
        assert_eq!(std::env::current_dir().unwrap(), before);
        assert!(!session.is_desynced());
    }

    #[test]
    fn test_escapes_are_rendered() {
        let dir = tempfile::tempdir().unwrap();
        let _cwd = CwdGuard::enter(dir.path());

        let session = ShellSession::open(test_config()).expect("open failed");
        assert_eq!(
            session.run_command(r"printf '\033[31mred\033[0m\n'").unwrap(),
            "red\n"
        );
        assert_eq!(session.run_command(r"printf 'AAA\rBB\n'").unwrap(), "BB\n");
        assert_eq!(session.run_command(r"printf '\ta\n'").unwrap(), "\ta\n");
    }

    #[test]
    fn test_timeout_desyncs_session() {
        let dir = tempfile::tempdir().unwrap();
        let _cwd = CwdGuard::enter(dir.path());

        let config = SessionConfig {
            read_timeout_ms: 300,
            ..test_config()
        };
        let session = ShellSession::open(config).expect("open failed");

        let err = session.run_command("sleep 5").unwrap_err();
        match err {
            ShellError::ShellDesync { partial } => assert!(partial.starts_with("sleep 5")),
            other => panic!("expected desync, got {other:?}"),
        }
        assert!(session.is_desynced());
        assert!(matches!(session.run_command("echo hi"), Err(ShellError::Desynced)));
    }

    #[test]
    fn test_cancel_stops_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let _cwd = CwdGuard::enter(dir.path());

        let session = ShellSession::open(test_config()).expect("open failed");
        let token = CancelToken::new();
        token.cancel();

        let err = session.run_command_with_cancel("sleep 5", &token).unwrap_err();
        assert!(matches!(err, ShellError::Cancelled));
        assert!(matches!(session.run_command("echo hi"), Err(ShellError::Desynced)));
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let dir = tempfile::tempdir().unwrap();
        let _cwd = CwdGuard::enter(dir.path());

        let session = ShellSession::open(test_config()).expect("open failed");
        let token = CancelToken::new();
        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                token.cancel();
            })
        };

        let started = Instant::now();
        let err = session.run_command_with_cancel("sleep 5", &token).unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, ShellError::Cancelled), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(session.is_desynced());
    }

    #[test]
    fn test_concurrent_command_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let _cwd = CwdGuard::enter(dir.path());

        let session = Arc::new(ShellSession::open(test_config()).expect("open failed"));
        let background = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.run_command("sleep 1; echo done"))
        };

        thread::sleep(Duration::from_millis(300));
        assert!(matches!(session.run_command("echo hi"), Err(ShellError::Busy)));

        assert_eq!(background.join().unwrap().unwrap(), "done\n");
        assert_eq!(session.run_command("echo hi").unwrap(), "hi\n");
    }

    #[test]
    fn test_shell_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let _cwd = CwdGuard::enter(dir.path());

        let session = ShellSession::open(test_config()).expect("open failed");
        let err = session.run_command("exit 3").unwrap_err();
        assert!(matches!(err, ShellError::ProcessExited { .. }), "got {err:?}");
    }

    #[test]
    fn test_corrupted_echo_from_cassette() {
        let dir = tempfile::tempdir().unwrap();
        let _cwd = CwdGuard::enter(dir.path());

        let mut cassette = Cassette::in_memory();
        cassette.record("echo hi", "ech? hi\r\nhi\r\nzamm$ ").unwrap();
        let session = ShellSession::open(test_config())
            .expect("open failed")
            .with_cassette(cassette);

        let err = session.run_command("echo hi").unwrap_err();
        assert!(matches!(err, ShellError::EchoMismatch { .. }));
        // The shell itself never saw the command
        assert!(!session.is_desynced());
        assert_eq!(session.run_command("echo ok").unwrap(), "ok\n");
    }

    #[test]
    fn test_replay_under_another_prompt_is_desync() {
        let dir = tempfile::tempdir().unwrap();
        let _cwd = CwdGuard::enter(dir.path());

        let mut cassette = Cassette::in_memory();
        cassette.record("echo hi", "echo hi\r\nhi\r\nother$ ").unwrap();
        let session = ShellSession::open(test_config())
            .expect("open failed")
            .with_cassette(cassette);

        let err = session.run_command("echo hi").unwrap_err();
        assert!(matches!(err, ShellError::ShellDesync { .. }), "got {err:?}");
        assert!(!session.is_desynced());
    }

    #[test]
    fn test_cassette_replays_but_cd_runs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let _cwd = CwdGuard::enter(dir.path());
        let tape = dir.path().join("tape.toml");

        let mut cassette = Cassette::open(&tape).unwrap();
        cassette
            .record("echo fake", "echo fake\r\nreplayed\r\nzamm$ ")
            .unwrap();
        cassette.record("cd sub", "cd sub\r\nbogus\r\nzamm$ ").unwrap();

        let session = ShellSession::open(test_config())
            .expect("open failed")
            .with_cassette(cassette);

        assert_eq!(session.run_command("echo fake").unwrap(), "replayed\n");
        assert_eq!(session.run_command("cd sub").unwrap(), "");
        assert!(std::env::current_dir().unwrap().ends_with("sub"));

        // Fresh output is recorded for next time
        assert_eq!(session.run_command("echo live").unwrap(), "live\n");
        let reloaded = Cassette::open(&tape).unwrap();
        assert!(reloaded.get("echo live").is_some());
    }

    #[test]
    fn test_open_without_prompt_fails() {
        let dir = tempfile::tempdir().unwrap();
        let _cwd = CwdGuard::enter(dir.path());

        let config = SessionConfig {
            shell: "/bin/cat".to_string(),
            args: Vec::new(),
            init_timeout_ms: 300,
            ..test_config()
        };
        assert!(matches!(
            ShellSession::open(config),
            Err(ShellError::SessionInit { .. })
        ));
    }

    #[test]
    fn test_open_missing_shell_fails() {
        let config = SessionConfig {
            shell: "/nonexistent/shell".to_string(),
            ..test_config()
        };
        assert!(matches!(
            ShellSession::open(config),
            Err(ShellError::Pty(PtyError::Spawn(_)))
        ));
    }
}
