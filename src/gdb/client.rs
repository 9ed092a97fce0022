//! Command/response correlation
//!
//! Every outgoing command gets a token from a per-session counter. The
//! reader task hands result records back here and they are matched strictly
//! by token; records that do not belong to a pending command are reported as
//! correlation errors instead of being guessed at.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};

use crate::common::error::is_busy_message;
use crate::common::{Error, Result};
use crate::mi::{codec, AsyncRecord, MiCommand, ResultClass, ResultRecord};

/// Async classes that report progress of a still-pending command
const PROGRESS_CLASSES: &[&str] = &["download"];

/// Receives intermediate status records of one command
pub type ProgressSink = mpsc::UnboundedSender<AsyncRecord>;

struct Pending {
    command: MiCommand,
    result: oneshot::Sender<Result<ResultRecord>>,
    progress: Option<ProgressSink>,
}

/// A command that was queued for writing and awaits its result record
#[derive(Debug)]
pub struct PendingCommand {
    pub token: u64,
    operation: String,
    result: oneshot::Receiver<Result<ResultRecord>>,
}

impl PendingCommand {
    /// Wait for the result record
    ///
    /// `^error` results surface as [`Error::BackendRejection`], or
    /// [`Error::BackendBusy`] when GDB refused because the target runs.
    pub async fn result(self) -> Result<ResultRecord> {
        match self.result.await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(token = self.token, command = %self.operation, "dropped without result");
                Err(Error::ProcessExit)
            }
        }
    }
}

/// Token allocator and pending-command table
pub struct MiClient {
    next_token: AtomicU64,
    pending: Mutex<HashMap<u64, Pending>>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl MiClient {
    /// Create a client that queues formatted command lines on `outgoing`
    pub fn new(outgoing: mpsc::UnboundedSender<String>) -> Self {
        Self {
            next_token: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outgoing,
        }
    }

    fn next_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::SeqCst)
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a command and queue it for the writer task
    ///
    /// The slot is registered before the line is queued so a fast answer can
    /// never arrive ahead of its pending entry.
    pub fn send(&self, command: &MiCommand, progress: Option<ProgressSink>) -> Result<PendingCommand> {
        let token = self.next_token();
        let (tx, rx) = oneshot::channel();

        self.pending().insert(
            token,
            Pending {
                command: command.clone(),
                result: tx,
                progress,
            },
        );

        tracing::debug!(token, command = %command, "-> command");
        if self.outgoing.send(codec::format_command(token, command)).is_err() {
            self.pending().remove(&token);
            return Err(Error::ProcessExit);
        }

        Ok(PendingCommand {
            token,
            operation: command.operation().to_string(),
            result: rx,
        })
    }

    /// Deliver a result record to the command waiting for its token
    pub fn complete(&self, record: ResultRecord) -> Result<()> {
        let Some(token) = record.token else {
            return Err(Error::Correlation(format!(
                "result '{}' carries no token",
                record.class.as_str()
            )));
        };

        let Some(pending) = self.pending().remove(&token) else {
            return Err(Error::Correlation(format!(
                "result '{}' for unknown token {token}",
                record.class.as_str()
            )));
        };

        let operation = pending.command.operation();
        let outcome = if record.class == ResultClass::Error {
            let message = record.error_message().unwrap_or("unknown error").to_string();
            if is_busy_message(&message) {
                Err(Error::BackendBusy {
                    command: operation.to_string(),
                    message,
                })
            } else {
                Err(Error::rejection(operation, &message))
            }
        } else {
            Ok(record)
        };

        tracing::debug!(token, command = operation, ok = outcome.is_ok(), "<- result");
        if pending.result.send(outcome).is_err() {
            tracing::debug!(token, command = operation, "late result discarded, caller gave up");
        }
        Ok(())
    }

    /// Forward a status record to the progress sink of its pending command
    ///
    /// Returns false when the record does not belong to a pending command
    /// that asked for progress.
    pub fn progress(&self, record: &AsyncRecord) -> bool {
        if !PROGRESS_CLASSES.contains(&record.class.as_str()) {
            return false;
        }
        let Some(token) = record.token else {
            return false;
        };
        let pending = self.pending();
        match pending.get(&token).and_then(|p| p.progress.as_ref()) {
            Some(sink) => {
                let _ = sink.send(record.clone());
                true
            }
            None => false,
        }
    }

    /// Reject every pending command, used when GDB's output stream ends
    pub fn fail_all(&self) {
        let drained: Vec<(u64, Pending)> = self.pending().drain().collect();
        for (token, pending) in drained {
            tracing::debug!(token, command = %pending.command, "rejecting, GDB exited");
            let _ = pending.result.send(Err(Error::ProcessExit));
        }
    }

    /// Number of commands still awaiting a result
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mi::{parse_record, Record};

    fn result(line: &str) -> ResultRecord {
        match parse_record(line).unwrap() {
            Record::Result(r) => r,
            other => panic!("not a result: {other:?}"),
        }
    }

    fn status(line: &str) -> AsyncRecord {
        match parse_record(line).unwrap() {
            Record::Async(a) => a,
            other => panic!("not async: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tokens_start_at_one_and_lines_are_queued() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = MiClient::new(tx);

        let first = client.send(&MiCommand::new("gdb-version"), None).unwrap();
        let second = client.send(&MiCommand::new("thread-info"), None).unwrap();
        assert_eq!(first.token, 1);
        assert_eq!(second.token, 2);
        assert_eq!(rx.recv().await.unwrap(), "1-gdb-version\n");
        assert_eq!(rx.recv().await.unwrap(), "2-thread-info\n");
    }

    #[tokio::test]
    async fn test_result_resolves_exactly_once() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = MiClient::new(tx);

        let cmd = client.send(&MiCommand::new("break-insert").arg("main"), None).unwrap();
        client
            .complete(result(r#"1^done,bkpt={number="3",addr="0x1000"}"#))
            .unwrap();

        let record = cmd.result().await.unwrap();
        assert_eq!(record.results.get_str("bkpt.number"), Some("3"));
        assert_eq!(client.pending_count(), 0);

        // A second result for the same token is no longer correlated
        let err = client.complete(result("1^done")).unwrap_err();
        assert!(matches!(err, Error::Correlation(_)));
    }

    #[tokio::test]
    async fn test_error_results_are_classified() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = MiClient::new(tx);

        let busy = client.send(&MiCommand::new("thread-info"), None).unwrap();
        let bad = client.send(&MiCommand::new("data-evaluate-expression").arg("nope"), None).unwrap();
        client
            .complete(result(
                r#"1^error,msg="Cannot execute this command while the target is running.""#,
            ))
            .unwrap();
        client
            .complete(result(r#"2^error,msg="No symbol \"nope\" in current context.""#))
            .unwrap();

        assert!(busy.result().await.unwrap_err().is_busy());
        match bad.result().await.unwrap_err() {
            Error::BackendRejection { command, message } => {
                assert_eq!(command, "data-evaluate-expression");
                assert_eq!(message, "No symbol \"nope\" in current context.");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_or_unknown_token_is_correlation_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = MiClient::new(tx);

        assert!(matches!(
            client.complete(result("^done")).unwrap_err(),
            Error::Correlation(_)
        ));
        assert!(matches!(
            client.complete(result("99^done")).unwrap_err(),
            Error::Correlation(_)
        ));
    }

    #[tokio::test]
    async fn test_late_result_after_caller_gave_up() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = MiClient::new(tx);

        let cmd = client.send(&MiCommand::new("exec-interrupt"), None).unwrap();
        drop(cmd);
        assert!(client.complete(result("1^done")).is_ok());
    }

    #[tokio::test]
    async fn test_progress_goes_to_pending_command() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = MiClient::new(tx);
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        let cmd = client
            .send(&MiCommand::new("target-download"), Some(progress_tx))
            .unwrap();
        assert!(client.progress(&status(
            r#"1+download,{section=".text",section-size="100",total-size="200"}"#
        )));
        assert!(!client.progress(&status(r#"7+download,{section=".data"}"#)));

        let update = progress_rx.recv().await.unwrap();
        assert_eq!(update.results.get_str("section"), Some(".text"));
        drop(cmd);
    }

    #[tokio::test]
    async fn test_fail_all_rejects_pending() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = MiClient::new(tx);

        let a = client.send(&MiCommand::new("exec-continue"), None).unwrap();
        let b = client.send(&MiCommand::new("thread-info"), None).unwrap();
        client.fail_all();

        assert!(matches!(a.result().await, Err(Error::ProcessExit)));
        assert!(matches!(b.result().await, Err(Error::ProcessExit)));
    }

    #[tokio::test]
    async fn test_send_after_writer_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let client = MiClient::new(tx);
        assert!(matches!(
            client.send(&MiCommand::new("gdb-exit"), None),
            Err(Error::ProcessExit)
        ));
        assert_eq!(client.pending_count(), 0);
    }
}
