//! Escape sequence tokenizer
//!
//! Recognizes carriage returns and a narrow subset of ANSI/VT escape
//! sequences in already line-split terminal output. Each match is turned
//! into an [`EscapeToken`] by a small dispatch table keyed on the final
//! letter and its parameter. Anything outside that table is reported as
//! [`EscapeToken::Unrecognized`] so callers can delete it without guessing.

use std::ops::Range;
use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Combined pattern for every sequence the normalizer reacts to.
///
/// Alternatives, in order:
/// - bare `\r` and its textual form `\r`
/// - an introducer (`ESC`, textual `\033` or `\e`) followed by `[` or `(`,
///   parameter bytes and a final letter
/// - an OSC string (`ESC ]` ... terminated by BEL or `ESC \`)
const ESCAPE_PATTERN: &str = concat!(
    r"(?P<cr>\r|\\r)",
    r"|(?P<intro>\x1b|\\033|\\e)[\[(](?P<params>[0-9;?]*)(?P<cmd>[A-Za-z])",
    r"|(?P<osc>\x1b\][^\x07\x1b]*(?:\x07|\x1b\\))",
);

static ESCAPE_RE: OnceLock<Regex> = OnceLock::new();

/// The compiled [`ESCAPE_PATTERN`].
pub fn escape_regex() -> &'static Regex {
    ESCAPE_RE.get_or_init(|| Regex::new(ESCAPE_PATTERN).expect("ESCAPE_PATTERN should compile"))
}

/// A single recognized control sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeToken {
    /// `\r`: the cursor returns to column 0
    CarriageReturn,
    /// `CSI n A`: the cursor moves up `n` lines
    CursorUp(usize),
    /// `CSI n J`
    EraseDisplay(u16),
    /// `CSI n K`
    EraseLine(u16),
    /// `CSI ... m` (SGR)
    GraphicsReset,
    /// Anything else the pattern picked up
    Unrecognized,
}

impl EscapeToken {
    /// Dispatch on the final letter of a CSI-like sequence.
    ///
    /// `params` is the raw parameter string between the introducer and the
    /// final letter. Private-mode sequences (`?` prefix) never get a
    /// structural meaning.
    pub fn from_parts(params: &str, command: char) -> Self {
        let is_private = params.starts_with('?');
        let first = first_param(params);

        match (is_private, command) {
            (false, 'A') => EscapeToken::CursorUp(first.unwrap_or(1).max(1) as usize),
            (false, 'J') => EscapeToken::EraseDisplay(first.unwrap_or(0)),
            (false, 'K') => EscapeToken::EraseLine(first.unwrap_or(0)),
            (false, 'm') => EscapeToken::GraphicsReset,
            _ => {
                tracing::debug!("Unknown escape: params={:?}, final={:?}", params, command);
                EscapeToken::Unrecognized
            }
        }
    }

    fn from_captures(caps: &Captures<'_>) -> Self {
        if caps.name("cr").is_some() {
            return EscapeToken::CarriageReturn;
        }
        match (caps.name("params"), caps.name("cmd")) {
            (Some(params), Some(cmd)) => {
                let command = cmd.as_str().chars().next().unwrap_or('\0');
                Self::from_parts(params.as_str(), command)
            }
            // OSC strings and anything else
            _ => EscapeToken::Unrecognized,
        }
    }
}

/// First numeric parameter, if any. Empty means "use the default".
fn first_param(params: &str) -> Option<u16> {
    let first = params.trim_start_matches('?').split(';').next()?;
    if first.is_empty() {
        return None;
    }
    // Overlong counts saturate instead of being dropped
    Some(first.parse::<u16>().unwrap_or(u16::MAX))
}

/// A token together with where it was found in the scanned line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscapeMatch {
    pub token: EscapeToken,
    pub span: Range<usize>,
}

/// Find the first recognized sequence in `line`.
pub fn next_escape(line: &str) -> Option<EscapeMatch> {
    let caps = escape_regex().captures(line)?;
    let whole = caps.get(0)?;
    Some(EscapeMatch {
        token: EscapeToken::from_captures(&caps),
        span: whole.range(),
    })
}
