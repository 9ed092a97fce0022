//! GDB connection controller
//!
//! Owns the reader and writer tasks for one MI stream and exposes the
//! command surface the session is built on. The stream is generic so tests
//! can drive it through an in-memory duplex pipe.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{broadcast, mpsc, watch};

use crate::common::{Error, Result};
use crate::mi::{classify, codec, AsyncKind, AsyncRecord, Line, MiCommand, Record, ResultRecord, StreamKind};

use super::client::{MiClient, ProgressSink};
use super::run_state::{RunState, RunStateEvent, ThreadEvent};

/// Where a piece of GDB output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSource {
    Console,
    Target,
    Log,
    /// Non-MI lines on stdout
    Text,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOutput {
    pub source: OutputSource,
    pub text: String,
}

/// Timeouts for run-state transitions
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// How long to wait for GDB to report a stop or resume
    pub state_wait: Duration,
    /// Extra time after an interrupt/continue result before giving up
    pub command_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            state_wait: Duration::from_millis(6000),
            command_grace: Duration::from_millis(4000),
        }
    }
}

/// One MI connection to GDB
pub struct Gdb {
    client: Arc<MiClient>,
    run_state: Arc<RunState>,
    output: broadcast::Sender<BackendOutput>,
    notifications: broadcast::Sender<AsyncRecord>,
    closed: watch::Receiver<bool>,
    timeouts: Timeouts,
}

impl Gdb {
    /// Start the reader and writer tasks over an MI stream
    pub fn new<R, W>(reader: R, writer: W, timeouts: Timeouts) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (output, _) = broadcast::channel(1024);
        let (notifications, _) = broadcast::channel(256);
        let (closed_tx, closed) = watch::channel(false);

        let client = Arc::new(MiClient::new(line_tx));
        let run_state = Arc::new(RunState::new());

        tokio::spawn(writer_task(writer, line_rx));
        tokio::spawn(reader_task(
            BufReader::new(reader),
            Router {
                client: Arc::clone(&client),
                run_state: Arc::clone(&run_state),
                output: output.clone(),
                notifications: notifications.clone(),
            },
            closed_tx,
        ));

        Self {
            client,
            run_state,
            output,
            notifications,
            closed,
            timeouts,
        }
    }

    pub fn run_state(&self) -> &Arc<RunState> {
        &self.run_state
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn subscribe_run_state(&self) -> broadcast::Receiver<RunStateEvent> {
        self.run_state.subscribe()
    }

    pub fn subscribe_threads(&self) -> broadcast::Receiver<ThreadEvent> {
        self.run_state.subscribe_threads()
    }

    pub fn subscribe_output(&self) -> broadcast::Receiver<BackendOutput> {
        self.output.subscribe()
    }

    /// Raw notify records, after the run-state reconciler has seen them
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<AsyncRecord> {
        self.notifications.subscribe()
    }

    /// Sender for output that does not come through the MI stream (stderr)
    pub(crate) fn output_sender(&self) -> broadcast::Sender<BackendOutput> {
        self.output.clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once GDB's output stream has ended
    pub async fn wait_closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    pub fn pending_count(&self) -> usize {
        self.client.pending_count()
    }

    /// Send a command and wait for its result
    pub async fn command(&self, command: impl Into<MiCommand>) -> Result<ResultRecord> {
        let command = command.into();
        self.client.send(&command, None)?.result().await
    }

    /// Send a command whose status records go to `progress`
    pub async fn command_with_progress(
        &self,
        command: impl Into<MiCommand>,
        progress: ProgressSink,
    ) -> Result<ResultRecord> {
        let command = command.into();
        self.client.send(&command, Some(progress))?.result().await
    }

    /// Send a command, stopping the target for it if GDB refuses while running
    pub async fn command_ensure(&self, command: impl Into<MiCommand>) -> Result<ResultRecord> {
        self.ensure(command.into(), None).await
    }

    /// [`Gdb::command_ensure`] with a progress sink
    pub async fn command_ensure_with_progress(
        &self,
        command: impl Into<MiCommand>,
        progress: ProgressSink,
    ) -> Result<ResultRecord> {
        self.ensure(command.into(), Some(progress)).await
    }

    async fn ensure(&self, command: MiCommand, progress: Option<ProgressSink>) -> Result<ResultRecord> {
        match self.client.send(&command, progress.clone())?.result().await {
            Err(Error::BackendBusy { message, .. }) => {
                tracing::info!(command = %command, reason = %message, "target busy, retrying stopped");
                self.retry_stopped(command, progress).await
            }
            other => other,
        }
    }

    /// Interrupt, re-issue, resume; listeners never see the round trip
    async fn retry_stopped(&self, command: MiCommand, progress: Option<ProgressSink>) -> Result<ResultRecord> {
        let _quiet = self.run_state.suppress();

        self.exec_interrupt().await?;
        let result = match self.client.send(&command, progress) {
            Ok(pending) => pending.result().await,
            Err(e) => Err(e),
        };
        let resumed = self.exec_continue().await;

        match (result, resumed) {
            (Ok(_), Err(e)) => {
                tracing::warn!(command = %command, error = %e, "failed to resume after retry");
                Err(e)
            }
            (result, _) => result,
        }
    }

    /// Send commands back to back, then wait for all of them
    ///
    /// Every result is awaited even if one fails; the first failure in
    /// command order is returned.
    pub async fn command_sequence(&self, commands: Vec<MiCommand>) -> Result<Vec<ResultRecord>> {
        let mut pending = Vec::with_capacity(commands.len());
        for command in &commands {
            pending.push(self.client.send(command, None)?);
        }
        join_all(pending.into_iter().map(|p| p.result()))
            .await
            .into_iter()
            .collect()
    }

    /// Run a CLI command through the console interpreter
    pub async fn cli_command(
        &self,
        text: &str,
        thread: Option<u32>,
        frame: Option<u32>,
    ) -> Result<ResultRecord> {
        let command = MiCommand::new("interpreter-exec")
            .option("--thread", thread)
            .option("--frame", frame)
            .arg("console")
            .quoted(text);
        self.command_ensure(command).await
    }

    /// Stop the target and wait until GDB reports it stopped
    pub async fn exec_interrupt(&self) -> Result<()> {
        if self.run_state.is_running() == Some(false) {
            return Ok(());
        }
        let waiter = self.run_state.stop_waiter();
        self.race_transition(MiCommand::new("exec-interrupt"), waiter.wait(self.timeouts.state_wait))
            .await
    }

    /// Resume the target and wait until GDB reports it running
    pub async fn exec_continue(&self) -> Result<()> {
        if self.run_state.is_running() == Some(true) {
            return Ok(());
        }
        let waiter = self.run_state.run_waiter();
        self.race_transition(MiCommand::new("exec-continue"), waiter.wait(self.timeouts.state_wait))
            .await
    }

    async fn race_transition(
        &self,
        command: MiCommand,
        transition: impl std::future::Future<Output = Result<()>>,
    ) -> Result<()> {
        let grace = self.timeouts.command_grace;
        let operation = command.operation().to_string();
        let pending = self.client.send(&command, None)?;

        let issued = async {
            pending.result().await?;
            tokio::time::sleep(grace).await;
            Err::<(), Error>(Error::timeout(&operation, grace.as_millis() as u64))
        };

        tokio::select! {
            reached = transition => reached,
            failed = issued => failed,
        }
    }
}

/// Routes parsed lines to the correlator, reconciler and listeners
struct Router {
    client: Arc<MiClient>,
    run_state: Arc<RunState>,
    output: broadcast::Sender<BackendOutput>,
    notifications: broadcast::Sender<AsyncRecord>,
}

impl Router {
    fn route(&self, line: &str) {
        tracing::trace!("<- {}", line);

        let parsed = match classify(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %Error::from(e), "dropping unparsable line");
                return;
            }
        };

        match parsed {
            Line::Prompt => {}
            Line::Text(text) => {
                if !text.is_empty() {
                    self.emit(OutputSource::Text, text);
                }
            }
            Line::Record(Record::Stream(stream)) => {
                let source = match stream.kind {
                    StreamKind::Console => OutputSource::Console,
                    StreamKind::Target => OutputSource::Target,
                    StreamKind::Log => OutputSource::Log,
                };
                self.emit(source, stream.text);
            }
            Line::Record(Record::Result(result)) => {
                if let Err(e) = self.client.complete(result) {
                    tracing::warn!(error = %e, "desynchronised result");
                }
            }
            Line::Record(Record::Async(record)) => match record.kind {
                AsyncKind::Exec => {
                    self.run_state.handle_exec(&record);
                }
                AsyncKind::Status => {
                    if !self.client.progress(&record) {
                        tracing::debug!(class = %record.class, token = ?record.token, "unclaimed status record");
                    }
                }
                AsyncKind::Notify => {
                    self.run_state.handle_notify(&record);
                    let _ = self.notifications.send(record);
                }
            },
        }
    }

    fn emit(&self, source: OutputSource, text: String) {
        let _ = self.output.send(BackendOutput { source, text });
    }
}

async fn reader_task<R: AsyncRead + Unpin>(
    mut reader: BufReader<R>,
    router: Router,
    closed: watch::Sender<bool>,
) {
    loop {
        match codec::read_line(&mut reader).await {
            Ok(Some(line)) => router.route(&line),
            Ok(None) => {
                tracing::debug!("GDB output closed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "reading GDB output failed");
                break;
            }
        }
    }
    router.client.fail_all();
    let _ = closed.send(true);
}

async fn writer_task<W: AsyncWrite + Unpin>(mut writer: W, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        tracing::trace!("-> {}", line.trim_end());
        if let Err(e) = codec::write_line(&mut writer, &line).await {
            tracing::warn!(error = %e, "writing to GDB failed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdb::run_state::StopReason;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, DuplexStream};

    /// Scripted GDB: the test reads command lines and writes replies
    struct Script {
        commands: tokio::io::Lines<BufReader<DuplexStream>>,
        replies: DuplexStream,
    }

    impl Script {
        async fn expect(&mut self, operation: &str) -> u64 {
            let line = self.commands.next_line().await.unwrap().unwrap();
            let (token, rest) = line.split_once('-').unwrap();
            assert!(
                rest.starts_with(operation),
                "expected {operation}, got {rest}"
            );
            token.parse().unwrap()
        }

        async fn reply(&mut self, text: &str) {
            self.replies.write_all(text.as_bytes()).await.unwrap();
            self.replies.write_all(b"\n").await.unwrap();
        }
    }

    fn setup(timeouts: Timeouts) -> (Gdb, Script) {
        let (gdb_out, our_in) = tokio::io::duplex(64 * 1024);
        let (our_out, gdb_in) = tokio::io::duplex(64 * 1024);
        let gdb = Gdb::new(our_in, our_out, timeouts);
        let script = Script {
            commands: BufReader::new(gdb_in).lines(),
            replies: gdb_out,
        };
        (gdb, script)
    }

    fn quick() -> Timeouts {
        Timeouts {
            state_wait: Duration::from_millis(500),
            command_grace: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let (gdb, mut script) = setup(quick());
        let task = tokio::spawn(async move {
            let token = script.expect("break-insert").await;
            script.reply("=breakpoint-created,bkpt={number=\"3\"}").await;
            script
                .reply(&format!(r#"{token}^done,bkpt={{number="3",addr="0x1000"}}"#))
                .await;
            script.reply("(gdb) ").await;
            script
        });

        let record = gdb.command("break-insert main.c:10").await.unwrap();
        assert_eq!(record.results.get_str("bkpt.addr"), Some("0x1000"));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_output_is_forwarded() {
        let (gdb, mut script) = setup(quick());
        let mut output = gdb.subscribe_output();
        script.reply(r#"~"hello\n""#).await;
        script.reply("plain text").await;
        script.reply("this is { not mi").await;

        let first = output.recv().await.unwrap();
        assert_eq!(first.source, OutputSource::Console);
        assert_eq!(first.text, "hello\n");
        let second = output.recv().await.unwrap();
        assert_eq!(second.source, OutputSource::Text);
        assert_eq!(second.text, "plain text");
    }

    #[tokio::test]
    async fn test_syntax_error_does_not_stop_reader() {
        let (gdb, mut script) = setup(quick());
        let task = tokio::spawn(async move {
            let token = script.expect("gdb-version").await;
            script.reply(r#"^done,broken={"#).await;
            script.reply(&format!("{token}^done")).await;
            script
        });
        assert!(gdb.command("gdb-version").await.is_ok());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_busy_retry_is_transparent() {
        let (gdb, mut script) = setup(quick());
        let mut events = gdb.subscribe_run_state();

        script.reply(r#"*running,thread-id="all""#).await;
        let first = events.recv().await.unwrap();
        assert!(first.is_running);

        let task = tokio::spawn(async move {
            let token = script.expect("thread-info").await;
            script
                .reply(&format!(
                    r#"{token}^error,msg="Cannot execute this command while the target is running.""#
                ))
                .await;

            let token = script.expect("exec-interrupt").await;
            script.reply(&format!("{token}^done")).await;
            script
                .reply(r#"*stopped,reason="signal-received",signal-name="SIGINT",thread-id="1",stopped-threads="all""#)
                .await;

            let token = script.expect("thread-info").await;
            script
                .reply(&format!(r#"{token}^done,threads=[{{id="1",target-id="Thread 1"}}]"#))
                .await;

            let token = script.expect("exec-continue").await;
            script.reply(&format!("{token}^running")).await;
            script.reply(r#"*running,thread-id="all""#).await;
            script
        });

        let record = gdb.command_ensure("thread-info").await.unwrap();
        assert_eq!(record.results.get_str("threads.0.id"), Some("1"));
        assert_eq!(gdb.run_state().is_running(), Some(true));
        assert!(!gdb.run_state().is_suppressed());
        assert_eq!(gdb.pending_count(), 0);
        task.await.unwrap();

        // The interrupt/resume round trip never reached listeners
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_interrupt_times_out_without_stop() {
        let (gdb, mut script) = setup(quick());
        script.reply(r#"*running,thread-id="all""#).await;
        while gdb.run_state().is_running().is_none() {
            tokio::task::yield_now().await;
        }

        let task = tokio::spawn(async move {
            let token = script.expect("exec-interrupt").await;
            script.reply(&format!("{token}^done")).await;
            script
        });
        let err = gdb.exec_interrupt().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        let _script = task.await.unwrap();
    }

    #[tokio::test]
    async fn test_command_sequence_keeps_order() {
        let (gdb, mut script) = setup(quick());
        let task = tokio::spawn(async move {
            let a = script.expect("gdb-set").await;
            let b = script.expect("target-select").await;
            script.reply(&format!("{b}^connected")).await;
            script.reply(&format!("{a}^done")).await;
            script.reply(r#"*stopped,frame={addr="0x0"}"#).await;
            script
        });

        let results = gdb
            .command_sequence(vec![
                MiCommand::new("gdb-set").arg("target-async on"),
                MiCommand::new("target-select").arg("remote").arg("localhost:3333"),
            ])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].class, crate::mi::ResultClass::Connected);
        let _script = task.await.unwrap();

        let mut events = gdb.subscribe_run_state();
        let snapshot = loop {
            let snapshot = gdb.run_state().snapshot();
            if snapshot.running.is_some() {
                break snapshot;
            }
            let _ = tokio::time::timeout(Duration::from_millis(50), events.recv()).await;
        };
        assert_eq!(snapshot.reason, Some(StopReason::Startup));
    }

    #[tokio::test]
    async fn test_eof_rejects_pending_commands() {
        let (gdb, mut script) = setup(quick());
        let task = tokio::spawn(async move {
            script.expect("exec-next").await;
            drop(script);
        });
        let err = gdb.command("exec-next").await.unwrap_err();
        assert!(matches!(err, Error::ProcessExit));
        task.await.unwrap();
        gdb.wait_closed().await;
        assert!(gdb.is_closed());
    }
}
