//! MI wire codec for GDB-family debugger backends
//!
//! The machine interface is a line-oriented text protocol on the backend's
//! stdio: outgoing commands are `[token]-operation args`, incoming lines are
//! result records (`^`), async records (`*`/`=`), stream records
//! (`~`/`@`/`&`), or the `(gdb)` prompt.
//!
//! This crate is a leaf: pure parsing and serialization, no I/O, no
//! session semantics. The dispatcher in `mibex-session` feeds it one line
//! at a time and interprets the records.

mod command;
mod error;
mod parser;
mod record;
mod value;

pub use command::{MiCommand, MiParam, PathQuoting};
pub use error::{ParseError, Result};
pub use parser::parse_line;
pub use record::{AsyncKind, MiRecord, ResultClass, StreamChannel};
pub use value::{escape_c_string, MiListItem, MiResults, MiValue};
