//! MI line codec
//!
//! GDB speaks one record per line in both directions:
//! ```text
//! <token>-<operation> <args>\n      (to GDB)
//! [token]<prefix><body>\n           (from GDB)
//! ```

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Result;

use super::MiCommand;

/// Read the next line from GDB, without its line terminator
///
/// Returns `None` at end of stream. Invalid UTF-8 is replaced rather than
/// rejected since inferior output can share the stream.
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let mut buf = Vec::new();
    let bytes_read = reader.read_until(b'\n', &mut buf).await?;
    if bytes_read == 0 {
        return Ok(None);
    }

    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Format a tokenised command line
pub fn format_command(token: u64, command: &MiCommand) -> String {
    format!("{token}-{command}\n")
}

/// Write one formatted command line to GDB and flush it
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_lines() {
        let data = b"=thread-group-added,id=\"i1\"\r\n(gdb) \n1^done";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        assert_eq!(
            read_line(&mut reader).await.unwrap().as_deref(),
            Some("=thread-group-added,id=\"i1\"")
        );
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("(gdb) "));
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("1^done"));
        assert_eq!(read_line(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_line_lossy() {
        let data = b"~\"\xff\"\n";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));
        let line = read_line(&mut reader).await.unwrap().unwrap();
        assert!(line.contains('\u{fffd}'));
    }

    #[tokio::test]
    async fn test_write_line() {
        let mut output = Vec::new();
        let cmd = MiCommand::new("exec-continue");
        write_line(&mut output, &format_command(7, &cmd)).await.unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "7-exec-continue\n");
    }
}
