//! GDB/MI version 2 wire format
//!
//! Parsing of GDB output lines into [`Record`]s, the record model with its
//! dotted-path accessor, and the outgoing command builder.

pub mod codec;
mod command;
pub mod cstring;
mod parser;
mod record;

pub use command::MiCommand;
pub use parser::{classify, parse_record, Line, SyntaxError};
pub use record::{
    AsyncKind, AsyncRecord, Field, ListItem, Record, ResultClass, ResultRecord, StreamKind,
    StreamRecord, Tuple, Value, CHILD_VALUES_KEY,
};
