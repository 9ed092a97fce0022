//! Outgoing MI command builder
//!
//! A command is an operation name (without the leading `-`) followed by
//! arguments. The correlator adds the token and the dash when writing it.

use std::fmt;

use super::cstring;

/// One MI command, e.g. `break-insert -f "main.c:10"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiCommand {
    operation: String,
    args: Vec<String>,
}

impl MiCommand {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            args: Vec::new(),
        }
    }

    /// Append a raw argument
    pub fn arg(mut self, arg: impl fmt::Display) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Append an argument quoted as a C string
    pub fn quoted(mut self, arg: &str) -> Self {
        self.args.push(cstring::encode(arg));
        self
    }

    /// Append a quoted file path with `/` separators
    pub fn path(mut self, path: &str) -> Self {
        self.args.push(cstring::encode_path(path));
        self
    }

    /// Append `flag value` when the value is present
    pub fn option(mut self, flag: &str, value: Option<impl fmt::Display>) -> Self {
        if let Some(value) = value {
            self.args.push(flag.to_string());
            self.args.push(value.to_string());
        }
        self
    }

    /// Operation name, used to label errors and log lines
    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl fmt::Display for MiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.operation)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Raw command text as typed by a user (`break-list`, `var-create - * x`)
impl From<&str> for MiCommand {
    fn from(text: &str) -> Self {
        let text = text.trim().trim_start_matches('-');
        match text.split_once(char::is_whitespace) {
            Some((operation, rest)) => Self::new(operation).arg(rest.trim()),
            None => Self::new(text),
        }
    }
}

impl From<String> for MiCommand {
    fn from(text: String) -> Self {
        Self::from(text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_quotes_and_options() {
        let cmd = MiCommand::new("break-insert")
            .arg("-f")
            .option("-c", Some(cstring::encode("i > 3")))
            .option("-t", None::<u32>)
            .path(r"src\main.c:10");
        assert_eq!(
            cmd.to_string(),
            r#"break-insert -f -c "i > 3" "src/main.c:10""#
        );
        assert_eq!(cmd.operation(), "break-insert");
    }

    #[test]
    fn test_from_raw_text() {
        let cmd = MiCommand::from("-data-evaluate-expression  x + 1");
        assert_eq!(cmd.operation(), "data-evaluate-expression");
        assert_eq!(cmd.to_string(), "data-evaluate-expression x + 1");
        assert_eq!(MiCommand::from("gdb-exit").to_string(), "gdb-exit");
    }
}
