//! Command classification
//!
//! Decides which commands change shell state that the host has to follow
//! (currently only the working directory). Such commands always run live.

/// Split a command line with shell quoting rules.
///
/// Returns `None` for unbalanced quotes.
pub fn split(command: &str) -> Option<Vec<String>> {
    shell_words::split(command).ok()
}

/// Whether `command` changes shell state and must never be replayed from
/// a cassette.
pub fn is_state_command(command: &str) -> bool {
    match split(command) {
        Some(words) => words.first().map(|w| w == "cd").unwrap_or(false),
        None => command.trim_start().starts_with("cd "),
    }
}
