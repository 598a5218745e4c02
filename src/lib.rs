//! pshell - drive a persistent interactive shell and read what it shows
//!
//! A [`ShellSession`] keeps one shell alive across commands, so state such
//! as the working directory or exported variables carries over. Each call to
//! [`ShellSession::run_command`] returns the command's output as a person
//! would see it on screen: no echoed command, no trailing prompt, no color
//! codes, and with `\r` progress-bar overwrites collapsed.
//!
//! ```no_run
//! use pshell::{SessionConfig, ShellSession};
//!
//! let session = ShellSession::open(SessionConfig::default())?;
//! let listing = session.run_command("ls Makefile")?;
//! session.close()?;
//! # Ok::<(), pshell::ShellError>(())
//! ```

#[cfg(not(unix))]
compile_error!("pshell drives shells through Unix pseudo terminals");

pub mod cassette;
pub mod config;
pub mod core;

pub use crate::cassette::{Cassette, CassetteError};
pub use crate::config::{Config, SessionConfig};
pub use crate::core::session::{CancelToken, ShellError, ShellSession};
pub use crate::core::term::{interpret_terminal_output, remove_ansi_escapes};
