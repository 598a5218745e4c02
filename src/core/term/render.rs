//! Line-oriented output rendering
//!
//! Rewrites raw terminal output into what a person watching the screen
//! would read. This is deliberately not a terminal emulator: there is no
//! cursor grid, only a per-line rewrite driven by [`EscapeToken`]s.

use super::parser::{next_escape, EscapeMatch, EscapeToken};

/// Render output that may still contain `\r\n` line endings.
pub fn interpret_terminal_output(input: &str) -> String {
    remove_ansi_escapes(&input.replace("\r\n", "\n"))
}

/// Render output whose `\r\n` pairs were already normalized to `\n`.
///
/// Never fails: sequences the dispatch table does not know are deleted and
/// the surrounding text is left alone.
pub fn remove_ansi_escapes(input: &str) -> String {
    let mut cleaned: Vec<String> = Vec::new();

    for raw_line in input.split('\n') {
        let mut line = raw_line.to_string();
        while let Some(found) = next_escape(&line) {
            line = apply(&line, &found, &mut cleaned);
        }
        cleaned.push(line);
    }

    cleaned.join("\n")
}

/// Apply one token to the current line and the finalized lines above it.
fn apply(line: &str, found: &EscapeMatch, cleaned: &mut Vec<String>) -> String {
    let before = &line[..found.span.start];
    let after = &line[found.span.end..];

    match found.token {
        // Cursor back to column 0: later output overwrites the line
        EscapeToken::CarriageReturn => after.to_string(),
        EscapeToken::CursorUp(count) => {
            let keep = cleaned.len().saturating_sub(count);
            cleaned.truncate(keep);
            after.to_string()
        }
        // Cursor position is not tracked, so erasing below it is a no-op
        EscapeToken::EraseDisplay(_) => splice(before, after),
        EscapeToken::EraseLine(0) => splice(before, after),
        // Whole line (or start of line) erased
        EscapeToken::EraseLine(_) => after.to_string(),
        EscapeToken::GraphicsReset | EscapeToken::Unrecognized => splice(before, after),
    }
}

fn splice(before: &str, after: &str) -> String {
    let mut out = String::with_capacity(before.len() + after.len());
    out.push_str(before);
    out.push_str(after);
    out
}
