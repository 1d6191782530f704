//! Outgoing MI command construction and serialization
//!
//! `[token]-operation [options] [--] [parameters]\n`, e.g.
//! `12-break-insert -f "main.c:10"`.
//!
//! Path-shaped parameters go through a [`PathQuoting`] strategy selected per
//! backend variant, keeping workaround behavior for known-buggy argument
//! parsers out of the core serializer.

use crate::error::{ParseError, Result};
use crate::value::escape_c_string;
use serde::Serialize;
use std::fmt;

/// Backend-capability strategy for serializing path parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PathQuoting {
    /// Quote-and-escape, no transformation
    #[default]
    Standard,
    /// Additionally strip one leading path separator. Some MI backends fail
    /// to parse an absolute quoted location and need the degraded form.
    StripLeadingSeparator,
}

/// One command parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MiParam {
    /// Emitted verbatim (already well-formed MI, e.g. an option value)
    Literal(String),
    /// Quoted as a c-string with escaping
    Quoted(String),
    /// File-system location, subject to the path-quoting strategy
    Path(String),
}

impl MiParam {
    fn serialize(&self, quoting: PathQuoting) -> String {
        match self {
            MiParam::Literal(s) => s.clone(),
            MiParam::Quoted(s) => format!("\"{}\"", escape_c_string(s)),
            MiParam::Path(p) => {
                let p = match quoting {
                    PathQuoting::Standard => p.as_str(),
                    PathQuoting::StripLeadingSeparator => p.strip_prefix('/').unwrap_or(p),
                };
                if p.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\') {
                    format!("\"{}\"", escape_c_string(p))
                } else {
                    p.to_string()
                }
            }
        }
    }
}

/// An immutable outgoing command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MiCommand {
    /// Correlation token; assigned by the dispatcher at transmission time
    pub token: Option<u32>,
    /// Operation name without the leading dash, e.g. `break-insert`
    pub operation: String,
    /// Options (`-f`, `--thread 2`), emitted before parameters
    pub options: Vec<String>,
    /// Positional parameters
    pub parameters: Vec<MiParam>,
}

impl MiCommand {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            token: None,
            operation: operation.into(),
            options: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    pub fn parameter(mut self, param: impl Into<String>) -> Self {
        self.parameters.push(MiParam::Literal(param.into()));
        self
    }

    pub fn quoted_parameter(mut self, param: impl Into<String>) -> Self {
        self.parameters.push(MiParam::Quoted(param.into()));
        self
    }

    pub fn path_parameter(mut self, path: impl Into<String>) -> Self {
        self.parameters.push(MiParam::Path(path.into()));
        self
    }

    pub fn with_token(mut self, token: u32) -> Self {
        self.token = Some(token);
        self
    }

    /// Serialize to a single newline-terminated wire line.
    pub fn serialize(&self, quoting: PathQuoting) -> String {
        let mut line = String::new();
        if let Some(token) = self.token {
            line.push_str(&token.to_string());
        }
        line.push('-');
        line.push_str(&self.operation);
        for option in &self.options {
            line.push(' ');
            line.push_str(option);
        }
        for param in &self.parameters {
            line.push(' ');
            line.push_str(&param.serialize(quoting));
        }
        line.push('\n');
        line
    }

    /// Parse a serialized command line back into its parts.
    ///
    /// Used by loopback test harnesses standing in for a backend; quoted
    /// parameters are unescaped, everything else splits on whitespace.
    ///
    /// Dash-words count as options only up to the first positional
    /// parameter, mirroring the order [`serialize`](Self::serialize)
    /// emits. A dash-word after a parameter stays a parameter — MI has no
    /// marker to tell a late option from a negative argument, and commands
    /// built through this type never interleave the two.
    pub fn parse(line: &str) -> Result<MiCommand> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut chars = line.char_indices().peekable();

        let mut token_digits = String::new();
        while let Some(&(_, c)) = chars.peek() {
            if c.is_ascii_digit() {
                token_digits.push(c);
                chars.next();
            } else {
                break;
            }
        }
        let token = if token_digits.is_empty() {
            None
        } else {
            Some(token_digits.parse::<u64>().map_err(|_| {
                ParseError::UnexpectedEnd { expected: "token" }
            })? as u32)
        };

        match chars.next() {
            Some((_, '-')) => {}
            Some((pos, c)) => {
                return Err(ParseError::Unexpected {
                    found: c,
                    column: pos,
                    expected: "'-'",
                })
            }
            None => {
                return Err(ParseError::UnexpectedEnd {
                    expected: "operation",
                })
            }
        }

        let rest_start = chars.peek().map(|&(i, _)| i).unwrap_or(line.len());
        let rest = &line[rest_start..];
        let mut words = split_words(rest)?;
        if words.is_empty() {
            return Err(ParseError::UnexpectedEnd {
                expected: "operation",
            });
        }
        let operation = match words.remove(0) {
            MiParam::Literal(op) => op,
            _ => {
                return Err(ParseError::UnexpectedEnd {
                    expected: "operation",
                })
            }
        };

        let mut options = Vec::new();
        let mut parameters = Vec::new();
        for word in words {
            match word {
                MiParam::Literal(w) if w.starts_with('-') && parameters.is_empty() => {
                    options.push(w);
                }
                other => parameters.push(other),
            }
        }

        Ok(MiCommand {
            token,
            operation,
            options,
            parameters,
        })
    }
}

/// Split on whitespace, honoring c-string quoting
fn split_words(input: &str) -> Result<Vec<MiParam>> {
    let mut words = Vec::new();
    let mut chars = input.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        match chars.peek() {
            None => break,
            Some('"') => {
                chars.next();
                let mut word = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('"') => word.push('"'),
                            Some('\\') => word.push('\\'),
                            Some('n') => word.push('\n'),
                            Some('t') => word.push('\t'),
                            Some('r') => word.push('\r'),
                            Some(other) => return Err(ParseError::InvalidEscape(other)),
                            None => {
                                return Err(ParseError::UnexpectedEnd {
                                    expected: "escape sequence",
                                })
                            }
                        },
                        Some(c) => word.push(c),
                        None => {
                            return Err(ParseError::UnexpectedEnd {
                                expected: "closing '\"'",
                            })
                        }
                    }
                }
                words.push(MiParam::Quoted(word));
            }
            Some(_) => {
                let mut word = String::new();
                while matches!(chars.peek(), Some(c) if !c.is_whitespace()) {
                    word.push(chars.next().unwrap());
                }
                words.push(MiParam::Literal(word));
            }
        }
    }
    Ok(words)
}

impl fmt::Display for MiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.serialize(PathQuoting::Standard).trim_end())
    }
}
