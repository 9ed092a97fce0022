//! Data GDB reports about threads, frames and locals

use serde::Serialize;

use crate::mi::{ListItem, Tuple};

/// A thread from `-thread-info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Thread {
    pub id: u32,
    pub target_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Thread {
    pub fn from_tuple(tuple: &Tuple) -> Option<Self> {
        Some(Self {
            id: tuple.get_parsed("id")?,
            target_id: tuple.get_str("target-id").unwrap_or_default().to_string(),
            name: tuple.get_str("name").map(str::to_string),
        })
    }

    /// Label shown to the user
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({})", name, self.target_id),
            None => self.target_id.clone(),
        }
    }
}

/// A frame from `-stack-list-frames`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    /// Frame id as handed to clients, see [`encode_frame_id`]
    pub id: i64,
    pub level: u32,
    pub address: String,
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_path: Option<String>,
    pub line: u32,
}

impl StackFrame {
    pub fn from_tuple(frame: &Tuple, thread: u32) -> Option<Self> {
        let level = frame.get_parsed("level")?;
        Some(Self {
            id: encode_frame_id(thread, level),
            level,
            address: frame.get_str("addr").unwrap_or_default().to_string(),
            function: frame
                .get_str("func")
                .or_else(|| frame.get_str("from"))
                .unwrap_or("??")
                .to_string(),
            file: frame.get_str("file").map(str::to_string),
            full_path: frame.get_str("fullname").map(str::to_string),
            line: frame.get_parsed("line").unwrap_or(0),
        })
    }
}

/// A local from `-stack-list-variables --simple-values`
///
/// Compound locals come back without a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackVariable {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

impl StackVariable {
    pub fn from_tuple(tuple: &Tuple) -> Option<Self> {
        Some(Self {
            name: tuple.get_str("name")?.to_string(),
            value: tuple.get_str("value").map(str::to_string),
            type_name: tuple.get_str("type").map(str::to_string),
        })
    }
}

/// Collect the tuples of a list, looking through `name=` wrappers
pub fn list_tuples<'a>(items: &'a [ListItem]) -> impl Iterator<Item = &'a Tuple> + 'a {
    items.iter().filter_map(ListItem::as_tuple)
}

/// Frame id sent to clients: `level << 8 | thread`
pub fn encode_frame_id(thread: u32, level: u32) -> i64 {
    (i64::from(level) << 8) | i64::from(thread & 0xff)
}

/// Split a frame id into `(thread, level)`
pub fn decode_frame_id(id: i64) -> (u32, u32) {
    ((id & 0xff) as u32, (id >> 8) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mi::{parse_record, Record};

    fn results(line: &str) -> Tuple {
        match parse_record(line).unwrap() {
            Record::Result(r) => r.results,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_frame_id_encoding() {
        assert_eq!(encode_frame_id(1, 0), 1);
        assert_eq!(encode_frame_id(2, 3), 0x302);
        assert_eq!(decode_frame_id(0x302), (2, 3));
        assert_eq!(decode_frame_id(encode_frame_id(7, 511)), (7, 511));
    }

    #[test]
    fn test_threads_and_frames() {
        let r = results(
            r#"2^done,threads=[{id="1",target-id="Thread 1",name="main",frame={level="0",addr="0x10"}},{id="2",target-id="Thread 2"}],current-thread-id="1""#,
        );
        let threads: Vec<Thread> = list_tuples(r.get_list("threads").unwrap())
            .filter_map(Thread::from_tuple)
            .collect();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].display_name(), "main (Thread 1)");
        assert_eq!(threads[1].display_name(), "Thread 2");

        let r = results(
            r#"3^done,stack=[frame={level="0",addr="0x80000044",func="main",file="main.c",fullname="/src/main.c",line="12"},frame={level="1",addr="0x80000000",from="crt0.o"}]"#,
        );
        let frames: Vec<StackFrame> = list_tuples(r.get_list("stack").unwrap())
            .filter_map(|f| StackFrame::from_tuple(f, 1))
            .collect();
        assert_eq!(frames[0].function, "main");
        assert_eq!(frames[0].line, 12);
        assert_eq!(frames[1].function, "crt0.o");
        assert_eq!(frames[1].id, encode_frame_id(1, 1));
    }

    #[test]
    fn test_stack_variables() {
        let r = results(
            r#"4^done,variables=[{name="i",type="int",value="3"},{name="buf",type="char [16]"}]"#,
        );
        let vars: Vec<StackVariable> = list_tuples(r.get_list("variables").unwrap())
            .filter_map(StackVariable::from_tuple)
            .collect();
        assert_eq!(vars[0].value.as_deref(), Some("3"));
        assert_eq!(vars[1].value, None);
        assert_eq!(vars[1].type_name.as_deref(), Some("char [16]"));
    }
}
