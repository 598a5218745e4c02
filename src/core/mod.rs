//! Core shell driving components.
//!
//! - **pty**: Unix pseudo-terminal wrapper that owns the shell process
//! - **term**: best-effort rendering of escape sequences and `\r` overwrites
//! - **command**: shell-word classification of state-changing commands
//! - **session**: the driver combining PTY + prompt sentinel + rendering
//!
//! # Architecture
//!
//! ```text
//! ShellSession
//! ├── Pty (shell process on a pseudo terminal)
//! ├── sentinel (prompt that marks "command finished")
//! ├── Cassette (optional record/replay of raw output)
//! └── term::remove_ansi_escapes (raw text -> on-screen text)
//! ```

pub mod command;
pub mod pty;
pub mod session;
pub mod term;
