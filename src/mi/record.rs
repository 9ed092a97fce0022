//! Typed MI record model
//!
//! Every line GDB prints in MI2 mode parses to exactly one [`Record`]. The
//! record is a closed enum so that consumers handle each kind explicitly.
//!
//! Field values form a small tree of constants, tuples and lists. Fields are
//! kept in arrival order and duplicate names are allowed, because GDB emits
//! both (e.g. `thread-ids={thread-id="1",thread-id="2"}`).

use std::fmt;
use std::str::FromStr;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use super::cstring;

/// Synthetic key under which `,{...}` continuations of a tuple are exposed
/// to the path accessor (`bkpt.@children.0.addr`).
pub const CHILD_VALUES_KEY: &str = "@children";

/// A field value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Quoted C string constant, already decoded
    Const(String),
    /// `{name=value,...}`
    Tuple(Tuple),
    /// `[...]`
    List(Vec<ListItem>),
}

/// An element of an MI list: either a bare value or a `name=value` result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ListItem {
    Value(Value),
    Result(Field),
}

/// One `name=value` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: Value,
}

/// Ordered set of fields plus any `,{...}` continuations that followed it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple {
    pub fields: Vec<Field>,
    pub children: Vec<Tuple>,
}

// Tuples serialise as JSON objects (duplicate names are emitted as-is) and a
// list result element as a single-entry object, mirroring the MI text.
impl Serialize for Tuple {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra = usize::from(!self.children.is_empty());
        let mut map = serializer.serialize_map(Some(self.fields.len() + extra))?;
        for field in &self.fields {
            map.serialize_entry(&field.name, &field.value)?;
        }
        if !self.children.is_empty() {
            map.serialize_entry(CHILD_VALUES_KEY, &self.children)?;
        }
        map.end()
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &self.value)?;
        map.end()
    }
}

impl Tuple {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push(Field {
            name: name.into(),
            value,
        });
    }

    /// First field with the given name
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.children.is_empty()
    }

    /// Resolve a dotted path such as `frame.addr`, `stack.0.frame.line` or
    /// `bkpt.@children.0.addr`
    pub fn get(&self, path: &str) -> Option<&Value> {
        match self.walk(path)? {
            Cursor::Value(v) => Some(v),
            Cursor::Field(f) => Some(&f.value),
            _ => None,
        }
    }

    /// String constant at `path`
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// String constant at `path`, parsed
    pub fn get_parsed<T: FromStr>(&self, path: &str) -> Option<T> {
        self.get_str(path).and_then(|s| s.trim().parse().ok())
    }

    /// Tuple at `path`; an empty path yields the tuple itself
    pub fn get_tuple(&self, path: &str) -> Option<&Tuple> {
        match self.walk(path)? {
            Cursor::Value(Value::Tuple(t)) | Cursor::Tuple(t) => Some(t),
            Cursor::Field(f) => f.value.as_tuple(),
            _ => None,
        }
    }

    /// List at `path`
    pub fn get_list(&self, path: &str) -> Option<&[ListItem]> {
        self.get(path).and_then(Value::as_list)
    }

    fn walk(&self, path: &str) -> Option<Cursor<'_>> {
        path.split('.')
            .filter(|s| !s.is_empty())
            .try_fold(Cursor::Tuple(self), |cursor, segment| cursor.step(segment))
    }
}

/// Position reached while walking a field path
#[derive(Clone, Copy)]
enum Cursor<'a> {
    Value(&'a Value),
    Tuple(&'a Tuple),
    /// `name=value` element of a list
    Field(&'a Field),
    Children(&'a [Tuple]),
}

impl<'a> Cursor<'a> {
    fn step(self, segment: &str) -> Option<Cursor<'a>> {
        match self {
            Cursor::Value(Value::Const(_)) => None,
            Cursor::Value(Value::Tuple(t)) | Cursor::Tuple(t) => {
                if segment == CHILD_VALUES_KEY {
                    Some(Cursor::Children(&t.children))
                } else {
                    t.field(segment).map(Cursor::Value)
                }
            }
            Cursor::Value(Value::List(items)) => {
                let index: usize = segment.parse().ok()?;
                items.get(index).map(|item| match item {
                    ListItem::Value(v) => Cursor::Value(v),
                    ListItem::Result(f) => Cursor::Field(f),
                })
            }
            Cursor::Field(f) if f.name == segment => Some(Cursor::Value(&f.value)),
            Cursor::Field(f) => Cursor::Value(&f.value).step(segment),
            Cursor::Children(children) => {
                let index: usize = segment.parse().ok()?;
                children.get(index).map(Cursor::Tuple)
            }
        }
    }
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Const(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&Tuple> {
        match self {
            Value::Tuple(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ListItem]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl ListItem {
    /// The element's value, looking through `name=` for results
    pub fn value(&self) -> &Value {
        match self {
            ListItem::Value(v) => v,
            ListItem::Result(field) => &field.value,
        }
    }

    /// Tuple content of the element, if any
    pub fn as_tuple(&self) -> Option<&Tuple> {
        self.value().as_tuple()
    }
}

/// Stream record channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// `~` CLI console output
    Console,
    /// `@` output of the running target
    Target,
    /// `&` GDB internal log
    Log,
}

/// Async record channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncKind {
    /// `*` execution state changes
    Exec,
    /// `+` progress of long running operations
    Status,
    /// `=` supplementary notifications
    Notify,
}

/// Result record class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

impl ResultClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Running => "running",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Exit => "exit",
        }
    }
}

impl FromStr for ResultClass {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "done" => Ok(Self::Done),
            "running" => Ok(Self::Running),
            "connected" => Ok(Self::Connected),
            "error" => Ok(Self::Error),
            "exit" => Ok(Self::Exit),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamRecord {
    pub kind: StreamKind,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AsyncRecord {
    pub kind: AsyncKind,
    pub token: Option<u64>,
    pub class: String,
    pub results: Tuple,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRecord {
    pub token: Option<u64>,
    pub class: ResultClass,
    pub results: Tuple,
}

impl ResultRecord {
    /// The `msg` field of an `^error` record
    pub fn error_message(&self) -> Option<&str> {
        self.results.get_str("msg")
    }
}

/// One parsed MI output line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Record {
    Stream(StreamRecord),
    Async(AsyncRecord),
    Result(ResultRecord),
}

impl Record {
    pub fn token(&self) -> Option<u64> {
        match self {
            Record::Stream(_) => None,
            Record::Async(r) => r.token,
            Record::Result(r) => r.token,
        }
    }
}

// === Serialisation back to MI text ===

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Const(s) => f.write_str(&cstring::encode(s)),
            Value::Tuple(t) => {
                write_tuple_body(f, t)?;
                for child in &t.children {
                    f.write_str(",")?;
                    write_tuple_body(f, child)?;
                }
                Ok(())
            }
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    match item {
                        ListItem::Value(v) => write!(f, "{v}")?,
                        ListItem::Result(field) => write!(f, "{field}")?,
                    }
                }
                f.write_str("]")
            }
        }
    }
}

fn write_tuple_body(f: &mut fmt::Formatter<'_>, t: &Tuple) -> fmt::Result {
    f.write_str("{")?;
    write_fields(f, &t.fields)?;
    f.write_str("}")
}

fn write_fields(f: &mut fmt::Formatter<'_>, fields: &[Field]) -> fmt::Result {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{field}")?;
    }
    Ok(())
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Stream(s) => {
                let prefix = match s.kind {
                    StreamKind::Console => '~',
                    StreamKind::Target => '@',
                    StreamKind::Log => '&',
                };
                write!(f, "{prefix}{}", cstring::encode(&s.text))
            }
            Record::Async(a) => {
                if let Some(token) = a.token {
                    write!(f, "{token}")?;
                }
                let prefix = match a.kind {
                    AsyncKind::Exec => '*',
                    AsyncKind::Status => '+',
                    AsyncKind::Notify => '=',
                };
                write!(f, "{prefix}{}", a.class)?;
                if !a.results.fields.is_empty() {
                    f.write_str(",")?;
                    write_fields(f, &a.results.fields)?;
                }
                Ok(())
            }
            Record::Result(r) => {
                if let Some(token) = r.token {
                    write!(f, "{token}")?;
                }
                write!(f, "^{}", r.class.as_str())?;
                if !r.results.fields.is_empty() {
                    f.write_str(",")?;
                    write_fields(f, &r.results.fields)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(s: &str) -> Value {
        Value::Const(s.to_string())
    }

    fn sample() -> Tuple {
        let mut frame = Tuple::new();
        frame.push("addr", c("0x80000010"));
        frame.push("func", c("main"));

        let mut stack_frame = Tuple::new();
        stack_frame.push("level", c("0"));
        stack_frame.push("line", c("12"));

        let mut results = Tuple::new();
        results.push("reason", c("breakpoint-hit"));
        results.push("frame", Value::Tuple(frame));
        results.push(
            "stack",
            Value::List(vec![ListItem::Result(Field {
                name: "frame".to_string(),
                value: Value::Tuple(stack_frame),
            })]),
        );
        results
    }

    #[test]
    fn test_path_accessor() {
        let t = sample();
        assert_eq!(t.get_str("reason"), Some("breakpoint-hit"));
        assert_eq!(t.get_str("frame.func"), Some("main"));
        assert_eq!(t.get_parsed::<u32>("stack.0.frame.line"), Some(12));
        assert_eq!(t.get_str("stack.1.frame.line"), None);
        assert_eq!(t.get_str("frame.missing"), None);
        assert_eq!(t.get_str("reason.deeper"), None);
    }

    #[test]
    fn test_path_through_children() {
        let mut bkpt = Tuple::new();
        bkpt.push("number", c("2"));
        bkpt.push("addr", c("<MULTIPLE>"));
        let mut loc = Tuple::new();
        loc.push("number", c("2.1"));
        loc.push("addr", c("0x1000"));
        bkpt.children.push(loc);

        let mut results = Tuple::new();
        results.push("bkpt", Value::Tuple(bkpt));

        assert_eq!(results.get_str("bkpt.@children.0.addr"), Some("0x1000"));
        assert_eq!(results.get_str("bkpt.addr"), Some("<MULTIPLE>"));
        assert_eq!(
            results.get_tuple("bkpt.@children.0").and_then(|t| t.get_str("number")),
            Some("2.1")
        );
        assert!(results.get_tuple("bkpt.@children.1").is_none());
    }

    #[test]
    fn test_serialize_as_json_object() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["frame"]["func"], "main");
        assert_eq!(json["stack"][0]["frame"]["line"], "12");
    }

    #[test]
    fn test_display_record() {
        let record = Record::Result(ResultRecord {
            token: Some(7),
            class: ResultClass::Done,
            results: sample(),
        });
        assert_eq!(
            record.to_string(),
            r#"7^done,reason="breakpoint-hit",frame={addr="0x80000010",func="main"},stack=[frame={level="0",line="12"}]"#
        );
    }
}
