//! Terminal output normalization
//!
//! - **parser**: escape-sequence tokenizer and dispatch table
//! - **render**: per-line rewrite into on-screen text

pub mod parser;
pub mod render;

pub use parser::EscapeToken;
pub use render::{interpret_terminal_output, remove_ansi_escapes};
