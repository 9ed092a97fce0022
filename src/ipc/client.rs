//! Client side of the control channel

use std::path::Path;

use tokio::io::{BufReader, ReadHalf, WriteHalf};

use crate::common::{Error, Result};

use super::protocol::{parse_response, ControlRequest};
use super::transport::{self, Stream};

/// Connection to a running session's control socket
pub struct ControlClient {
    reader: BufReader<ReadHalf<Stream>>,
    writer: WriteHalf<Stream>,
}

impl ControlClient {
    pub async fn connect(socket: &Path) -> Result<Self> {
        let stream = transport::connect(socket).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound
                || e.kind() == std::io::ErrorKind::ConnectionRefused
            {
                Error::Config(format!("no session listening on {}", socket.display()))
            } else {
                Error::Io(e)
            }
        })?;

        let (reader, writer) = tokio::io::split(stream);
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    pub async fn request(&mut self, request: &ControlRequest) -> Result<String> {
        self.send_line(&request.to_line()).await
    }

    /// Send a raw `method jsonArgs` line and wait for the answer
    pub async fn send_line(&mut self, line: &str) -> Result<String> {
        transport::write_line(&mut self.writer, line).await?;
        let response = transport::read_line(&mut self.reader)
            .await?
            .ok_or_else(|| Error::Io(std::io::ErrorKind::UnexpectedEof.into()))?;
        parse_response(&response)
    }
}
