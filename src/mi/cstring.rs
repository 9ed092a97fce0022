//! C string literal decoding and encoding
//!
//! GDB quotes every MI constant as a C string literal. Non-ASCII output is
//! emitted byte-wise as octal escapes (`\303\251`), so decoded bytes are
//! collected first and converted to UTF-8 at the end.

/// Decode the *inside* of a C string literal (without the surrounding quotes)
///
/// Unrecognised escape sequences are kept literally, backslash included.
pub fn decode(body: &str) -> String {
    let bytes = body.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }

        let rest = &body[i + 1..];
        match decode_escape(rest) {
            Some((decoded, consumed)) => {
                out.extend_from_slice(&decoded);
                i += 1 + consumed;
            }
            None => {
                out.push(b'\\');
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Decode one escape sequence; `rest` starts right after the backslash.
/// Returns the produced bytes and the number of input bytes consumed.
fn decode_escape(rest: &str) -> Option<(Vec<u8>, usize)> {
    let first = *rest.as_bytes().first()?;

    let simple = match first {
        b'a' => Some(0x07),
        b'b' => Some(0x08),
        b'f' => Some(0x0c),
        b'n' => Some(b'\n'),
        b'r' => Some(b'\r'),
        b't' => Some(b'\t'),
        b'v' => Some(0x0b),
        b'e' => Some(0x1b),
        b'\\' => Some(b'\\'),
        b'\'' => Some(b'\''),
        b'"' => Some(b'"'),
        b'?' => Some(b'?'),
        _ => None,
    };
    if let Some(byte) = simple {
        return Some((vec![byte], 1));
    }

    match first {
        b'0'..=b'7' => {
            let digits = leading(rest, 3, |c| c.is_digit(8));
            if digits.len() != 3 {
                return None;
            }
            let value = u16::from_str_radix(digits, 8).ok()?;
            Some((vec![u8::try_from(value).ok()?], 3))
        }
        b'x' => {
            let digits = leading(&rest[1..], 2, |c| c.is_ascii_hexdigit());
            if digits.len() != 2 {
                return None;
            }
            let value = u8::from_str_radix(digits, 16).ok()?;
            Some((vec![value], 3))
        }
        b'u' | b'U' => {
            let width = if first == b'u' { 4 } else { 8 };
            let digits = leading(&rest[1..], width, |c| c.is_ascii_hexdigit());
            if digits.len() != width {
                return None;
            }
            let code = u32::from_str_radix(digits, 16).ok()?;
            let ch = char::from_u32(code)?;
            let mut buf = [0u8; 4];
            Some((ch.encode_utf8(&mut buf).as_bytes().to_vec(), 1 + width))
        }
        _ => None,
    }
}

/// Longest prefix of at most `max` ASCII characters satisfying `pred`
fn leading(s: &str, max: usize, pred: impl Fn(char) -> bool) -> &str {
    let end = s
        .char_indices()
        .take(max)
        .take_while(|(_, c)| c.is_ascii() && pred(*c))
        .map(|(idx, c)| idx + c.len_utf8())
        .last()
        .unwrap_or(0);
    &s[..end]
}

/// Encode a string as a quoted C string literal
///
/// Used both when re-serialising records and when quoting command arguments
/// (file names, expressions, conditions).
pub fn encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\x0b' => out.push_str("\\v"),
            '\x0c' => out.push_str("\\f"),
            '\x1b' => out.push_str("\\e"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\{:03o}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Quote a file system path for a command argument, normalising separators
pub fn encode_path(path: &str) -> String {
    encode(&path.replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_letter_escapes() {
        assert_eq!(decode(r"a\tb\nc"), "a\tb\nc");
        assert_eq!(decode(r#"say \"hi\""#), "say \"hi\"");
        assert_eq!(decode(r"back\\slash"), "back\\slash");
        assert_eq!(decode(r"\e[0m\?"), "\x1b[0m?");
    }

    #[test]
    fn test_decode_octal_utf8_bytes() {
        assert_eq!(decode(r"caf\303\251"), "café");
        assert_eq!(decode(r"\101\102"), "AB");
    }

    #[test]
    fn test_decode_hex_and_unicode() {
        assert_eq!(decode(r"\x41\x42"), "AB");
        assert_eq!(decode(r"\u00e9"), "é");
        assert_eq!(decode(r"\U0001F525"), "🔥");
    }

    #[test]
    fn test_decode_unknown_escape_passes_through() {
        assert_eq!(decode(r"\q"), r"\q");
        assert_eq!(decode(r"\x4"), r"\x4");
        assert_eq!(decode(r"\12"), r"\12");
        assert_eq!(decode("trailing\\"), "trailing\\");
    }

    #[test]
    fn test_encode_escapes() {
        assert_eq!(encode("a\"b"), r#""a\"b""#);
        assert_eq!(encode("line\n"), r#""line\n""#);
        assert_eq!(encode("\x01"), r#""\001""#);
        assert_eq!(encode_path(r"C:\src\main.c"), r#""C:/src/main.c""#);
    }

    #[test]
    fn test_encode_then_decode_preserves_text() {
        let text = "tab\there \"quoted\" \\ bell\x07 esc\x1b ünïcode";
        let quoted = encode(text);
        assert_eq!(decode(&quoted[1..quoted.len() - 1]), text);
    }
}
