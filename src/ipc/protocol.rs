//! Control channel message format
//!
//! A request is one line, `methodName jsonArgs`, where the arguments are a
//! JSON array and may be left out. The answer is one line holding the
//! result as text, or `error: <CODE>: <message>`.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::common::{Error, Result};

/// Prefix of failed responses
const ERROR_PREFIX: &str = "error: ";

/// Requests accepted on the control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// Hex dump of `length` bytes at `from`
    ExamineMemory { from: u64, length: u64 },
    /// Replace (or with `None`, clear) a breakpoint's condition
    SetBreakPointCondition { number: i64, condition: Option<String> },
    Interrupt,
    Continue,
    /// Download the program again
    Load,
    Evaluate { expression: String },
    Status,
}

impl ControlRequest {
    /// Parse a request line
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (method, args) = match line.split_once(char::is_whitespace) {
            Some((method, args)) => (method, args.trim()),
            None => (line, ""),
        };
        let args: Vec<Value> = if args.is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(args).map_err(|e| Error::InvalidArguments {
                method: method.to_string(),
                message: format!("arguments must be a JSON array: {}", e),
            })?
        };

        let request = match method {
            "examineMemory" => Self::ExamineMemory {
                from: address(method, args.first())?,
                length: arg(method, &args, 1)?,
            },
            "setBreakPointCondition" => Self::SetBreakPointCondition {
                number: arg(method, &args, 0)?,
                condition: optional(method, &args, 1)?,
            },
            "interrupt" => Self::Interrupt,
            "continue" => Self::Continue,
            "load" => Self::Load,
            "evaluate" => Self::Evaluate {
                expression: arg(method, &args, 0)?,
            },
            "status" => Self::Status,
            other => return Err(Error::UnknownMethod(other.to_string())),
        };
        Ok(request)
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::ExamineMemory { .. } => "examineMemory",
            Self::SetBreakPointCondition { .. } => "setBreakPointCondition",
            Self::Interrupt => "interrupt",
            Self::Continue => "continue",
            Self::Load => "load",
            Self::Evaluate { .. } => "evaluate",
            Self::Status => "status",
        }
    }

    /// Request line as sent by clients
    pub fn to_line(&self) -> String {
        let args = match self {
            Self::ExamineMemory { from, length } => serde_json::json!([from, length]),
            Self::SetBreakPointCondition { number, condition } => {
                serde_json::json!([number, condition])
            }
            Self::Evaluate { expression } => serde_json::json!([expression]),
            Self::Interrupt | Self::Continue | Self::Load | Self::Status => {
                return self.method().to_string()
            }
        };
        format!("{} {}", self.method(), args)
    }
}

fn arg<T: DeserializeOwned>(method: &str, args: &[Value], index: usize) -> Result<T> {
    let value = args.get(index).ok_or_else(|| Error::InvalidArguments {
        method: method.to_string(),
        message: format!("missing argument {}", index + 1),
    })?;
    serde_json::from_value(value.clone()).map_err(|e| Error::InvalidArguments {
        method: method.to_string(),
        message: format!("argument {}: {}", index + 1, e),
    })
}

fn optional<T: DeserializeOwned>(method: &str, args: &[Value], index: usize) -> Result<Option<T>> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => arg(method, args, index).map(Some),
    }
}

/// Addresses may be numbers or `0x` strings
fn address(method: &str, value: Option<&Value>) -> Result<u64> {
    let invalid = |message: String| Error::InvalidArguments {
        method: method.to_string(),
        message,
    };
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| invalid(format!("invalid address {}", n))),
        Some(Value::String(s)) => {
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => s.parse(),
            };
            parsed.map_err(|_| invalid(format!("invalid address '{}'", s)))
        }
        Some(other) => Err(invalid(format!("invalid address {}", other))),
        None => Err(invalid("missing argument 1".to_string())),
    }
}

/// Response line for a failure
pub fn error_response(error: &Error) -> String {
    let message = match error {
        Error::Remote { message, .. } => message.clone(),
        other => other.to_string(),
    };
    format!("{}{}: {}", ERROR_PREFIX, error.code(), message.replace('\n', " "))
}

/// Turn a response line back into a result
pub fn parse_response(line: &str) -> Result<String> {
    let Some(rest) = line.strip_prefix(ERROR_PREFIX) else {
        return Ok(line.to_string());
    };
    let (code, message) = rest.split_once(": ").unwrap_or(("UNKNOWN", rest));
    Err(Error::Remote {
        code: code.to_string(),
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requests() {
        assert_eq!(
            ControlRequest::parse("examineMemory [2147483648, 16]").unwrap(),
            ControlRequest::ExamineMemory {
                from: 0x8000_0000,
                length: 16
            }
        );
        assert_eq!(
            ControlRequest::parse(r#"examineMemory ["0x80000000", 4]"#).unwrap(),
            ControlRequest::ExamineMemory {
                from: 0x8000_0000,
                length: 4
            }
        );
        assert_eq!(
            ControlRequest::parse(r#"setBreakPointCondition [3, "i == 2"]"#).unwrap(),
            ControlRequest::SetBreakPointCondition {
                number: 3,
                condition: Some("i == 2".to_string())
            }
        );
        assert_eq!(
            ControlRequest::parse("setBreakPointCondition [3]").unwrap(),
            ControlRequest::SetBreakPointCondition {
                number: 3,
                condition: None
            }
        );
        assert_eq!(ControlRequest::parse("interrupt").unwrap(), ControlRequest::Interrupt);
        assert_eq!(ControlRequest::parse("continue []").unwrap(), ControlRequest::Continue);
        assert_eq!(ControlRequest::parse("  status  ").unwrap(), ControlRequest::Status);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            ControlRequest::parse("reboot []"),
            Err(Error::UnknownMethod(m)) if m == "reboot"
        ));
        assert!(matches!(
            ControlRequest::parse("evaluate"),
            Err(Error::InvalidArguments { .. })
        ));
        assert!(matches!(
            ControlRequest::parse("evaluate {\"x\": 1}"),
            Err(Error::InvalidArguments { .. })
        ));
        assert!(matches!(
            ControlRequest::parse(r#"examineMemory ["zz", 4]"#),
            Err(Error::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_request_lines_parse_back() {
        let requests = [
            ControlRequest::ExamineMemory { from: 16, length: 8 },
            ControlRequest::SetBreakPointCondition {
                number: 1,
                condition: None,
            },
            ControlRequest::Evaluate {
                expression: "a[\"b\"]".to_string(),
            },
            ControlRequest::Load,
        ];
        for request in requests {
            assert_eq!(ControlRequest::parse(&request.to_line()).unwrap(), request);
        }
    }

    #[test]
    fn test_error_responses() {
        let line = error_response(&Error::SessionNotConnected);
        assert_eq!(line, "error: SESSION_NOT_CONNECTED: Not connected to a target. Wait for the connection to complete first");

        match parse_response(&line) {
            Err(Error::Remote { code, message }) => {
                assert_eq!(code, "SESSION_NOT_CONNECTED");
                assert_eq!(message, "Not connected to a target. Wait for the connection to complete first");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(parse_response("deadbeef").unwrap(), "deadbeef");
    }
}
