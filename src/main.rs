//! pshell - run commands in a persistent shell and print what the terminal shows
//!
//! # Quick Start
//!
//! ```text
//! pshell                       # Read commands from stdin, one per line
//! pshell -c 'cd src' -c ls     # Run commands in one shell and exit
//! pshell --cassette tape.toml  # Record/replay output of non-cd commands
//! ```

use std::env;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use crossterm::execute;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use pshell::{Cassette, Config as PshellConfig, ShellError, ShellSession};

/// Command line options
#[derive(Default)]
struct Options {
    /// Shell program override
    shell: Option<String>,
    /// Prompt sentinel override
    prompt: Option<String>,
    /// Per-command timeout override
    timeout: Option<Duration>,
    /// Cassette override
    cassette: Option<PathBuf>,
    /// Commands given with -c, run in order
    commands: Vec<String>,
    /// Write a starter config file and exit
    init_config: bool,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("pshell {}", VERSION);
}

fn print_help() {
    eprintln!("pshell {} - run commands in a persistent shell", VERSION);
    eprintln!();
    eprintln!("Usage: pshell [OPTIONS]");
    eprintln!();
    eprintln!("Shell options:");
    eprintln!("  -s, --shell <PATH>    Shell program (default: /bin/bash)");
    eprintln!("  -p, --prompt <STR>    Prompt used to detect command completion");
    eprintln!("  -t, --timeout <SECS>  Give up on a command after SECS seconds");
    eprintln!();
    eprintln!("Run options:");
    eprintln!("  -c, --command <CMD>   Run CMD and print its output (repeatable)");
    eprintln!("      --cassette <PATH> Replay/record output of non-cd commands");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("      --init-config     Write ~/.pshell/config.toml with defaults");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Without -c, commands are read from stdin one per line.");
    eprintln!();
    eprintln!("Configuration: ~/.pshell/config.toml");
    eprintln!("Log file:      ~/.pshell/pshell.log (level via PSHELL_LOG)");
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut options = Options::default();
    let mut i = 1;

    let value = |i: usize, name: &str| -> Result<String, String> {
        args.get(i)
            .cloned()
            .ok_or_else(|| format!("Missing argument for {}", name))
    };

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-s" | "--shell" => {
                i += 1;
                options.shell = Some(value(i, "--shell")?);
            }
            "-p" | "--prompt" => {
                i += 1;
                options.prompt = Some(value(i, "--prompt")?);
            }
            "-t" | "--timeout" => {
                i += 1;
                let secs: f64 = value(i, "--timeout")?
                    .parse()
                    .map_err(|_| "Timeout must be a number of seconds".to_string())?;
                if !secs.is_finite() || secs <= 0.0 {
                    return Err("Timeout must be positive".to_string());
                }
                options.timeout = Some(Duration::from_secs_f64(secs));
            }
            "-c" | "--command" => {
                i += 1;
                options.commands.push(value(i, "--command")?);
            }
            "--cassette" => {
                i += 1;
                options.cassette = Some(PathBuf::from(value(i, "--cassette")?));
            }
            "--init-config" => {
                options.init_config = true;
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(options)
}

/// Initialize logging to ~/.pshell/pshell.log
fn init_logging() {
    let Some(log_path) = pshell::config::data_dir().map(|d| d.join("pshell.log")) else {
        return;
    };

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_env("PSHELL_LOG")
            .unwrap_or_else(|_| EnvFilter::new(Level::INFO.as_str()));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// Print an error in red on stderr
fn report(message: &str) {
    let mut stderr = io::stderr();
    let _ = execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print(format!("error: {}\n", message)),
        ResetColor
    );
}

/// Whether the session can take further commands after `err`
fn is_fatal(err: &ShellError) -> bool {
    !matches!(err, ShellError::EchoMismatch { .. } | ShellError::Busy)
}

fn main() -> anyhow::Result<()> {
    let options = match parse_args() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging();
    info!("pshell starting...");

    let mut config = PshellConfig::load();

    if options.init_config {
        let path = config.save().map_err(anyhow::Error::msg)?;
        eprintln!("Wrote {}", path.display());
        return Ok(());
    }

    // Command line args override config file
    if let Some(shell) = options.shell {
        config.session.shell = shell;
    }
    if let Some(prompt) = options.prompt {
        config.session.prompt = prompt;
    }
    if let Some(timeout) = options.timeout {
        config.session.read_timeout_ms = timeout.as_millis() as u64;
    }
    if options.cassette.is_some() {
        config.cassette = options.cassette;
    }

    // Match the host terminal width so column layouts look the same
    if io::stdout().is_terminal() {
        if let Ok((cols, _rows)) = crossterm::terminal::size() {
            config.session.cols = cols;
        }
    }

    info!("Shell: {} {:?}", config.session.shell, config.session.args);
    info!("Terminal size: {}x{}", config.session.cols, config.session.rows);

    let mut session = ShellSession::open(config.session.clone())?;
    if let Some(path) = config.cassette_path() {
        info!("Cassette: {}", path.display());
        session = session.with_cassette(Cassette::open(&path)?);
    }

    let status = if options.commands.is_empty() {
        run_interactive(&session)?
    } else {
        run_batch(&session, &options.commands)
    };

    if session.is_desynced() {
        // Drop kills the shell; it may still be busy with the lost command
        drop(session);
    } else {
        session.close()?;
    }
    info!("pshell exiting with status {}", status);

    if status != 0 {
        std::process::exit(status);
    }
    Ok(())
}

/// Run each -c command in order, stopping at the first failure
fn run_batch(session: &ShellSession, commands: &[String]) -> i32 {
    let mut stdout = io::stdout();
    for command in commands {
        match session.run_command(command) {
            Ok(output) => {
                let _ = stdout.write_all(output.as_bytes());
                let _ = stdout.flush();
            }
            Err(e) => {
                error!("{:?} failed: {}", command, e);
                report(&e.to_string());
                return 1;
            }
        }
    }
    0
}

/// Read commands from stdin until EOF or `exit`
fn run_interactive(session: &ShellSession) -> anyhow::Result<i32> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let interactive = stdin.is_terminal();
    let mut status = 0;

    loop {
        if interactive {
            let _ = execute!(
                stdout,
                SetForegroundColor(Color::Green),
                Print("pshell> "),
                ResetColor
            );
        }

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let command = line.trim_end_matches(['\r', '\n']);
        if command.trim().is_empty() {
            continue;
        }
        if command.trim() == "exit" {
            break;
        }

        match session.run_command(command) {
            Ok(output) => {
                stdout.write_all(output.as_bytes())?;
                stdout.flush()?;
            }
            Err(e) => {
                error!("{:?} failed: {}", command, e);
                report(&e.to_string());
                status = 1;
                if is_fatal(&e) {
                    break;
                }
            }
        }
    }

    Ok(status)
}
