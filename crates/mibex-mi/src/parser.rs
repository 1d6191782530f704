//! Recursive-descent parser for MI output lines
//!
//! One line in, one [`MiRecord`] out. A malformed line yields a
//! [`ParseError`] and nothing else; the caller resumes at the next line
//! boundary, so a single bad line never aborts the stream.

use crate::error::{ParseError, Result};
use crate::record::{AsyncKind, MiRecord, ResultClass, StreamChannel};
use crate::value::{MiListItem, MiResults, MiValue};

/// Parse a single MI output line (without the trailing newline).
pub fn parse_line(line: &str) -> Result<MiRecord> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(ParseError::EmptyLine);
    }
    if line.trim() == "(gdb)" {
        return Ok(MiRecord::Prompt);
    }
    Cursor::new(line).record()
}

struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn eat(&mut self, expected: u8, what: &'static str) -> Result<()> {
        match self.bump() {
            Some(b) if b == expected => Ok(()),
            Some(b) => Err(ParseError::Unexpected {
                found: b as char,
                column: self.pos - 1,
                expected: what,
            }),
            None => Err(ParseError::UnexpectedEnd { expected: what }),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn record(&mut self) -> Result<MiRecord> {
        let token = self.token()?;

        match self.peek() {
            Some(b'^') => {
                self.pos += 1;
                let class_str = self.identifier("result class")?;
                let class = class_str
                    .parse::<ResultClass>()
                    .map_err(|_| ParseError::UnknownResultClass(class_str))?;
                let results = self.results()?;
                self.expect_end()?;
                Ok(MiRecord::Result {
                    token,
                    class,
                    results,
                })
            }
            Some(prefix @ (b'*' | b'=')) => {
                self.pos += 1;
                let kind = if prefix == b'*' {
                    AsyncKind::Exec
                } else {
                    AsyncKind::Notify
                };
                let class = self.identifier("async class")?;
                let results = self.results()?;
                self.expect_end()?;
                Ok(MiRecord::Async {
                    token,
                    kind,
                    class,
                    results,
                })
            }
            Some(prefix @ (b'~' | b'@' | b'&')) if token.is_none() => {
                self.pos += 1;
                let channel = match prefix {
                    b'~' => StreamChannel::Console,
                    b'@' => StreamChannel::Target,
                    _ => StreamChannel::Log,
                };
                let text = self.c_string()?;
                self.expect_end()?;
                Ok(MiRecord::Stream { channel, text })
            }
            Some(other) => Err(ParseError::UnknownPrefix {
                found: other as char,
                column: self.pos,
            }),
            None => Err(ParseError::UnexpectedEnd {
                expected: "record prefix",
            }),
        }
    }

    fn token(&mut self) -> Result<Option<u32>> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.pos == start {
            return Ok(None);
        }
        let digits = std::str::from_utf8(&self.input[start..self.pos]).expect("ascii digits");
        // Wraparound-tolerant: a token wider than u32 keeps its low bits,
        // matching the dispatcher's wrapping counter.
        let value = digits
            .parse::<u64>()
            .map(|v| v as u32)
            .unwrap_or_else(|_| digits.chars().fold(0u32, |acc, c| {
                acc.wrapping_mul(10).wrapping_add(c as u32 - '0' as u32)
            }));
        Ok(Some(value))
    }

    fn identifier(&mut self, what: &'static str) -> Result<String> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_')) {
            self.pos += 1;
        }
        if self.pos == start {
            return match self.peek() {
                Some(b) => Err(ParseError::Unexpected {
                    found: b as char,
                    column: self.pos,
                    expected: what,
                }),
                None => Err(ParseError::UnexpectedEnd { expected: what }),
            };
        }
        Ok(std::str::from_utf8(&self.input[start..self.pos])
            .expect("ascii identifier")
            .to_string())
    }

    /// `("," variable "=" value)*` to end of construct
    fn results(&mut self) -> Result<MiResults> {
        let mut results = MiResults::new();
        while self.peek() == Some(b',') {
            self.pos += 1;
            let (key, value) = self.keyed_value()?;
            results.insert(key, value);
        }
        Ok(results)
    }

    fn keyed_value(&mut self) -> Result<(String, MiValue)> {
        let key = self.identifier("variable name")?;
        self.eat(b'=', "'='")?;
        let value = self.value()?;
        Ok((key, value))
    }

    fn value(&mut self) -> Result<MiValue> {
        match self.peek() {
            Some(b'"') => Ok(MiValue::Const(self.c_string()?)),
            Some(b'{') => self.tuple(),
            Some(b'[') => self.list(),
            Some(b) => Err(ParseError::Unexpected {
                found: b as char,
                column: self.pos,
                expected: "value",
            }),
            None => Err(ParseError::UnexpectedEnd { expected: "value" }),
        }
    }

    fn tuple(&mut self) -> Result<MiValue> {
        self.eat(b'{', "'{'")?;
        let mut fields = MiResults::new();
        if self.peek() != Some(b'}') {
            loop {
                let (key, value) = self.keyed_value()?;
                fields.insert(key, value);
                match self.peek() {
                    Some(b',') => {
                        self.pos += 1;
                    }
                    _ => break,
                }
            }
        }
        self.eat(b'}', "'}'")?;
        Ok(MiValue::Tuple(fields))
    }

    fn list(&mut self) -> Result<MiValue> {
        self.eat(b'[', "'['")?;
        let mut items = Vec::new();
        if self.peek() != Some(b']') {
            loop {
                // A pair starts with an identifier followed by '='; anything
                // else is a bare value. Disambiguate by lookahead.
                let item = if self.looking_at_pair() {
                    let (key, value) = self.keyed_value()?;
                    MiListItem::Pair(key, value)
                } else {
                    MiListItem::Value(self.value()?)
                };
                items.push(item);
                match self.peek() {
                    Some(b',') => {
                        self.pos += 1;
                    }
                    _ => break,
                }
            }
        }
        self.eat(b']', "']'")?;
        Ok(MiValue::List(items))
    }

    fn looking_at_pair(&self) -> bool {
        let mut i = self.pos;
        while matches!(
            self.input.get(i),
            Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_')
        ) {
            i += 1;
        }
        i > self.pos && self.input.get(i) == Some(&b'=')
    }

    fn c_string(&mut self) -> Result<String> {
        self.eat(b'"', "'\"'")?;
        let mut out = Vec::new();
        loop {
            match self.bump() {
                Some(b'"') => break,
                Some(b'\\') => match self.bump() {
                    Some(b'"') => out.push(b'"'),
                    Some(b'\\') => out.push(b'\\'),
                    Some(b'n') => out.push(b'\n'),
                    Some(b't') => out.push(b'\t'),
                    Some(b'r') => out.push(b'\r'),
                    Some(b'0') => out.push(0),
                    // Octal escapes pass through untouched so non-UTF-8
                    // target output is not corrupted further.
                    Some(d @ b'1'..=b'7') => {
                        out.push(b'\\');
                        out.push(d);
                    }
                    Some(other) => return Err(ParseError::InvalidEscape(other as char)),
                    None => {
                        return Err(ParseError::UnexpectedEnd {
                            expected: "escape sequence",
                        })
                    }
                },
                Some(b) => out.push(b),
                None => {
                    return Err(ParseError::UnexpectedEnd {
                        expected: "closing '\"'",
                    })
                }
            }
        }
        // Non-UTF-8 target output is replaced, not dropped
        Ok(String::from_utf8(out)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
    }

    fn expect_end(&mut self) -> Result<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(ParseError::Unexpected {
                found: self.input[self.pos] as char,
                column: self.pos,
                expected: "end of line",
            })
        }
    }
}
