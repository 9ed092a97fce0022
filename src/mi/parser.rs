//! MI2 output grammar
//!
//! ```text
//! output        = ( out-of-band )* [ result-record ] "(gdb)"
//! result-record = [ token ] "^" result-class ( "," result )*
//! async-record  = [ token ] ( "*" | "+" | "=" ) async-class ( "," result )*
//! stream-record = ( "~" | "@" | "&" ) c-string
//! result        = variable "=" value
//! value         = const | tuple | list
//! tuple         = "{}" | "{" result ( "," result )* "}"
//! list          = "[]" | "[" value ( "," value )* "]" | "[" result ( "," result )* "]"
//! ```
//!
//! GDB deviates from the grammar in two places that the parser accepts:
//! a tuple-valued result may be followed by further `,{...}` tuples (multi
//! location breakpoints), which are attached to the first tuple as
//! continuations, and a record body may be a single bare tuple.

use thiserror::Error;

use super::cstring;
use super::record::{
    AsyncKind, AsyncRecord, Field, ListItem, Record, ResultClass, ResultRecord, StreamKind,
    StreamRecord, Tuple, Value,
};

/// Malformed MI line
///
/// Carries the complete line and the part that was not consumed yet so the
/// location of the problem is obvious in logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}\n    of: {line}\n  near: {remaining}")]
pub struct SyntaxError {
    pub message: String,
    pub line: String,
    pub remaining: String,
    pub offset: usize,
}

/// Classification of one line of GDB standard output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A parsed MI record
    Record(Record),
    /// The `(gdb)` end-of-output marker
    Prompt,
    /// Anything that is not MI (inferior output on a shared tty, banners)
    Text(String),
}

const RECORD_PREFIXES: [char; 7] = ['*', '+', '=', '^', '~', '@', '&'];

/// Classify and parse one line of GDB output
pub fn classify(line: &str) -> Result<Line, SyntaxError> {
    let trimmed = line.trim();

    if is_prompt(trimmed) {
        return Ok(Line::Prompt);
    }

    let after_token = trimmed.trim_start_matches(|c: char| c.is_ascii_digit());
    if !after_token.starts_with(RECORD_PREFIXES) {
        return Ok(Line::Text(line.trim_end().to_string()));
    }

    parse_record(trimmed).map(Line::Record)
}

fn is_prompt(line: &str) -> bool {
    line.strip_prefix("(gdb)")
        .is_some_and(|rest| rest.trim().is_empty())
}

/// Parse one MI record line
pub fn parse_record(line: &str) -> Result<Record, SyntaxError> {
    Parser::new(line.trim()).record()
}

struct Parser<'a> {
    line: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(line: &'a str) -> Self {
        Self { line, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            message: message.into(),
            line: self.line.to_string(),
            remaining: self.rest().to_string(),
            offset: self.pos,
        }
    }

    fn rest(&self) -> &'a str {
        &self.line[self.pos..]
    }

    fn peek(&self) -> Option<u8> {
        self.line.as_bytes().get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.line.len()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), SyntaxError> {
        if self.eat(byte) {
            Ok(())
        } else {
            Err(self.error(format!("missing '{}'", byte as char)))
        }
    }

    fn record(mut self) -> Result<Record, SyntaxError> {
        let token = self.token()?;

        let prefix = self
            .peek()
            .ok_or_else(|| self.error("missing record type"))?;
        self.pos += 1;

        let record = match prefix {
            b'~' | b'@' | b'&' => {
                let kind = match prefix {
                    b'~' => StreamKind::Console,
                    b'@' => StreamKind::Target,
                    _ => StreamKind::Log,
                };
                let text = self.c_string()?;
                Record::Stream(StreamRecord { kind, text })
            }
            b'*' | b'+' | b'=' => {
                let kind = match prefix {
                    b'*' => AsyncKind::Exec,
                    b'+' => AsyncKind::Status,
                    _ => AsyncKind::Notify,
                };
                let class = self.identifier()?.to_string();
                let results = self.record_results()?;
                Record::Async(AsyncRecord {
                    kind,
                    token,
                    class,
                    results,
                })
            }
            b'^' => {
                let class_start = self.pos;
                let name = self.identifier()?;
                let class: ResultClass = name.parse().map_err(|_| {
                    self.pos = class_start;
                    self.error(format!("unknown result class '{name}'"))
                })?;
                let results = self.record_results()?;
                Record::Result(ResultRecord {
                    token,
                    class,
                    results,
                })
            }
            other => {
                self.pos -= 1;
                return Err(self.error(format!("unknown record type '{}'", other as char)));
            }
        };

        if !self.at_end() {
            return Err(self.error("expected end of line"));
        }
        Ok(record)
    }

    fn token(&mut self) -> Result<Option<u64>, SyntaxError> {
        let digits = self
            .rest()
            .bytes()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits == 0 {
            return Ok(None);
        }
        let text = &self.rest()[..digits];
        let token = text
            .parse()
            .map_err(|_| self.error(format!("token '{text}' out of range")))?;
        self.pos += digits;
        Ok(Some(token))
    }

    fn identifier(&mut self) -> Result<&'a str, SyntaxError> {
        let rest = self.rest();
        let len = rest
            .bytes()
            .enumerate()
            .take_while(|(i, b)| {
                b.is_ascii_alphabetic()
                    || *b == b'_'
                    || *b == b'-'
                    || (*i > 0 && b.is_ascii_digit())
            })
            .count();
        if len == 0 {
            return Err(self.error("expected an identifier"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn c_string(&mut self) -> Result<String, SyntaxError> {
        if self.peek() != Some(b'"') {
            return Err(self.error("missing '\"'"));
        }
        let bytes = self.line.as_bytes();
        let start = self.pos + 1;
        let mut i = start;
        let mut escaping = false;
        while i < bytes.len() {
            let b = bytes[i];
            if escaping {
                escaping = false;
            } else if b == b'\\' {
                escaping = true;
            } else if b == b'"' {
                let text = cstring::decode(&self.line[start..i]);
                self.pos = i + 1;
                return Ok(text);
            }
            i += 1;
        }
        Err(self.error("missing string ending"))
    }

    fn value(&mut self) -> Result<Value, SyntaxError> {
        match self.peek() {
            Some(b'"') => self.c_string().map(Value::Const),
            Some(b'{') => self.tuple().map(Value::Tuple),
            Some(b'[') => self.list().map(Value::List),
            _ => Err(self.error("expected a value")),
        }
    }

    fn tuple(&mut self) -> Result<Tuple, SyntaxError> {
        self.expect(b'{')?;
        let mut tuple = Tuple::new();
        if self.eat(b'}') {
            return Ok(tuple);
        }
        loop {
            tuple.fields.push(self.result()?);
            if self.eat(b',') {
                continue;
            }
            self.expect(b'}')?;
            return Ok(tuple);
        }
    }

    fn list(&mut self) -> Result<Vec<ListItem>, SyntaxError> {
        self.expect(b'[')?;
        let mut items = Vec::new();
        if self.eat(b']') {
            return Ok(items);
        }
        loop {
            let item = match self.peek() {
                Some(b'"' | b'{' | b'[') => ListItem::Value(self.value()?),
                _ => ListItem::Result(self.result()?),
            };
            items.push(item);
            if self.eat(b',') {
                continue;
            }
            self.expect(b']')?;
            return Ok(items);
        }
    }

    fn result(&mut self) -> Result<Field, SyntaxError> {
        let name = self.identifier()?.to_string();
        self.expect(b'=')?;
        let mut value = self.value()?;

        if let Value::Tuple(tuple) = &mut value {
            while self.rest().starts_with(",{") {
                self.pos += 1;
                let continuation = self.tuple()?;
                tuple.children.push(continuation);
            }
        }

        Ok(Field { name, value })
    }

    /// `( "," result )*` after a class name, or a single bare tuple
    fn record_results(&mut self) -> Result<Tuple, SyntaxError> {
        let mut results = Tuple::new();
        if self.at_end() {
            return Ok(results);
        }
        self.expect(b',')?;

        if self.peek() == Some(b'{') {
            return self.tuple();
        }

        loop {
            results.fields.push(self.result()?);
            if self.at_end() {
                return Ok(results);
            }
            if !self.eat(b',') {
                return Err(self.error("expected ',' or end of line"));
            }
        }
    }
}
