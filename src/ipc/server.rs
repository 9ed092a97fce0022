//! Control socket listener serving a running session

use std::path::{Path, PathBuf};
use std::sync::Arc;

use interprocess::local_socket::traits::tokio::Listener as ListenerTrait;
use tokio::io::BufReader;
use tokio::task::JoinHandle;

use crate::common::{paths, Result};
use crate::session::{DebugSession, EvaluateContext};

use super::protocol::{error_response, ControlRequest};
use super::transport::{self, Listener, Stream};

/// Accepts control connections until closed or dropped
pub struct ControlServer {
    socket: PathBuf,
    task: JoinHandle<()>,
}

impl ControlServer {
    /// Listen on `socket` for requests against `session`
    pub fn start(socket: PathBuf, session: Arc<DebugSession>) -> Result<Self> {
        let listener = transport::bind(&socket)?;
        tracing::info!(socket = %socket.display(), "control channel listening");
        let task = tokio::spawn(accept_loop(listener, session));
        Ok(Self { socket, task })
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }
}

/// Stops listening and removes the socket file
impl Drop for ControlServer {
    fn drop(&mut self) {
        self.task.abort();
        if let Err(e) = paths::remove_socket(&self.socket) {
            tracing::warn!(socket = %self.socket.display(), error = %e, "cannot remove control socket");
        }
    }
}

async fn accept_loop(listener: Listener, session: Arc<DebugSession>) {
    loop {
        match listener.accept().await {
            Ok(stream) => {
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, session).await {
                        tracing::warn!(error = %e, "control connection failed");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "accept error");
                return;
            }
        }
    }
}

async fn handle_client(stream: Stream, session: Arc<DebugSession>) -> std::io::Result<()> {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    while let Some(line) = transport::read_line(&mut reader).await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = dispatch(&session, &line).await;
        transport::write_line(&mut writer, &response).await?;
    }
    Ok(())
}

/// Answer one request line
pub async fn dispatch(session: &DebugSession, line: &str) -> String {
    let request = match ControlRequest::parse(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(line, error = %e, "bad control request");
            return error_response(&e);
        }
    };

    tracing::debug!(method = request.method(), "control request");
    match execute(session, request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "control request failed");
            error_response(&e)
        }
    }
}

async fn execute(session: &DebugSession, request: ControlRequest) -> Result<String> {
    match request {
        ControlRequest::ExamineMemory { from, length } => session.examine_memory(from, length).await,
        ControlRequest::SetBreakPointCondition { number, condition } => {
            session.set_breakpoint_condition(number, condition).await?;
            Ok("ok".to_string())
        }
        ControlRequest::Interrupt => {
            session.interrupt().await?;
            Ok("ok".to_string())
        }
        ControlRequest::Continue => {
            session.continue_execution().await?;
            Ok("ok".to_string())
        }
        ControlRequest::Load => {
            session.load().await?;
            Ok("ok".to_string())
        }
        ControlRequest::Evaluate { expression } => Ok(session
            .evaluate(&expression, None, EvaluateContext::Watch)
            .await?
            .result),
        ControlRequest::Status => Ok(serde_json::to_string(&session.status())?),
    }
}
