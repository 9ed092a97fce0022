//! Cross-platform local socket transport
//!
//! Abstracts Unix domain sockets (Unix/macOS) and named pipes (Windows)
//! using the interprocess crate. Messages are single lines of text.

use std::io;
use std::path::Path;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::paths;

/// Longest accepted line (1 MB)
const MAX_LINE: usize = 1024 * 1024;

// Platform-specific imports and type aliases
#[cfg(unix)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericFilePath, ListenerOptions};
}

#[cfg(windows)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
}

use platform::*;

pub use platform::{Listener, Stream};

/// Listen on `socket`, replacing a stale socket file
pub fn bind(socket: &Path) -> io::Result<Listener> {
    paths::ensure_socket_dir(socket)?;
    paths::remove_socket(socket)?;

    #[cfg(unix)]
    let listener = {
        let name = socket.to_fs_name::<GenericFilePath>()?;
        ListenerOptions::new().name(name).create_tokio()?
    };

    #[cfg(windows)]
    let listener = {
        let name = socket.to_string_lossy().into_owned();
        let name = name.to_ns_name::<GenericNamespaced>()?;
        ListenerOptions::new().name(name).create_tokio()?
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(listener)
}

/// Connect to a session's control socket
pub async fn connect(socket: &Path) -> io::Result<Stream> {
    #[cfg(unix)]
    let stream = {
        let name = socket.to_fs_name::<GenericFilePath>()?;
        Stream::connect(name).await?
    };

    #[cfg(windows)]
    let stream = {
        let name = socket.to_string_lossy().into_owned();
        let name = name.to_ns_name::<GenericNamespaced>()?;
        Stream::connect(name).await?
    };

    Ok(stream)
}

/// Read one line without its terminator, `None` at end of stream
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.len() > MAX_LINE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Line too long: more than {} bytes", MAX_LINE),
        ));
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Write `text` followed by a newline
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> io::Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_line_framing() {
        let (a, b) = tokio::io::duplex(1024);
        let (_, mut writer) = tokio::io::split(a);
        let (reader, _keep) = tokio::io::split(b);
        let mut reader = BufReader::new(reader);

        write_line(&mut writer, "status").await.unwrap();
        write_line(&mut writer, "evaluate [\"x + 1\"]").await.unwrap();
        drop(writer);

        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("status"));
        assert_eq!(
            read_line(&mut reader).await.unwrap().as_deref(),
            Some("evaluate [\"x + 1\"]")
        );
        assert_eq!(read_line(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_crlf_is_stripped() {
        let mut reader = BufReader::new(&b"interrupt\r\n"[..]);
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("interrupt"));
    }
}
