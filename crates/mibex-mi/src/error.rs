//! Codec error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ParseError>;

/// A single malformed MI line.
///
/// Never fatal to a stream: the reader reports the line as a diagnostic and
/// resumes at the next line boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line does not start with a recognized record prefix
    #[error("unrecognized record prefix {found:?} at column {column}")]
    UnknownPrefix { found: char, column: usize },

    /// Unexpected character inside a record body
    #[error("unexpected character {found:?} at column {column}, expected {expected}")]
    Unexpected {
        found: char,
        column: usize,
        expected: &'static str,
    },

    /// Line ended inside an unterminated construct
    #[error("unexpected end of line, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    /// Result class is not one of done/running/connected/error/exit
    #[error("unknown result class {0:?}")]
    UnknownResultClass(String),

    /// Invalid escape sequence inside a c-string
    #[error("invalid escape sequence '\\{0}'")]
    InvalidEscape(char),

    /// Empty line or lone whitespace where a record was required
    #[error("empty line")]
    EmptyLine,
}
