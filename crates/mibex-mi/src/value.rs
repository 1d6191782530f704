//! The recursive MI value grammar
//!
//! ```text
//! value  ::= c-string | tuple | list
//! tuple  ::= "{}" | "{" result ("," result)* "}"
//! list   ::= "[]" | "[" value ("," value)* "]" | "[" result ("," result)* "]"
//! result ::= variable "=" value
//! ```
//!
//! Tuples preserve backend field order (`IndexMap`), which matters when a
//! result is rendered back to a user verbatim.

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// An ordered set of `variable=value` results, as carried by result and
/// async records and by tuples.
pub type MiResults = IndexMap<String, MiValue>;

/// A single MI value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MiValue {
    /// A c-string constant, already unescaped
    Const(String),
    /// `{k=v,...}`
    Tuple(MiResults),
    /// `[...]` — items may be bare values or keyed pairs
    List(Vec<MiListItem>),
}

/// One element of an MI list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MiListItem {
    Value(MiValue),
    Pair(String, MiValue),
}

impl MiValue {
    /// String contents, if this is a constant
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MiValue::Const(s) => Some(s),
            _ => None,
        }
    }

    /// Tuple contents, if this is a tuple
    pub fn as_tuple(&self) -> Option<&MiResults> {
        match self {
            MiValue::Tuple(t) => Some(t),
            _ => None,
        }
    }

    /// List contents, if this is a list
    pub fn as_list(&self) -> Option<&[MiListItem]> {
        match self {
            MiValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a field in a tuple value
    pub fn field(&self, key: &str) -> Option<&MiValue> {
        self.as_tuple().and_then(|t| t.get(key))
    }

    /// Look up a string field in a tuple value
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(MiValue::as_str)
    }

    /// Look up and parse a numeric field in a tuple value
    pub fn field_u32(&self, key: &str) -> Option<u32> {
        self.field_str(key).and_then(|s| s.parse().ok())
    }

    /// Parse a constant as a number
    pub fn as_u32(&self) -> Option<u32> {
        self.as_str().and_then(|s| s.parse().ok())
    }
}

impl fmt::Display for MiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiValue::Const(s) => write!(f, "\"{}\"", escape_c_string(s)),
            MiValue::Tuple(t) => {
                write!(f, "{{")?;
                for (i, (k, v)) in t.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                write!(f, "}}")
            }
            MiValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    match item {
                        MiListItem::Value(v) => write!(f, "{v}")?,
                        MiListItem::Pair(k, v) => write!(f, "{k}={v}")?,
                    }
                }
                write!(f, "]")
            }
        }
    }
}

/// Escape a string for embedding in an MI c-string literal
pub fn escape_c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_accessors_walk_tuples() {
        let mut frame = MiResults::new();
        frame.insert("func".into(), MiValue::Const("main".into()));
        frame.insert("line".into(), MiValue::Const("4".into()));
        let value = MiValue::Tuple(frame);

        assert_eq!(value.field_str("func"), Some("main"));
        assert_eq!(value.field_u32("line"), Some(4));
        assert_eq!(value.field("missing"), None);
    }

    #[test]
    fn display_round_trips_escaping() {
        let value = MiValue::Const("say \"hi\"\\done".into());
        assert_eq!(value.to_string(), r#""say \"hi\"\\done""#);
    }
}
