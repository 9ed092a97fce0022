//! Debug session over one GDB connection
//!
//! Ties the controller, breakpoint registry and variable objects together
//! and turns GDB's notifications into [`SessionEvent`]s.

pub mod events;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::config::{LaunchConfig, TimeoutConfig};
use crate::common::{Error, Result};
use crate::gdb::breakpoints::FUNCTION_KEY;
use crate::gdb::process::{self, ProcessHandle, SpawnOptions};
use crate::gdb::types::{decode_frame_id, list_tuples, StackFrame, StackVariable, Thread};
use crate::gdb::varobj::{varobj_name, Variable, VariableObjects, STACK_HANDLES_START, VAR_HANDLES_START};
use crate::gdb::{
    BackendOutput, Breakpoint, BreakpointInfo, BreakpointRegistry, Gdb, Location, RunStateEvent,
    ThreadEvent,
};
use crate::mi::{MiCommand, ResultRecord};

pub use events::{LoadProgress, LoadTracker, OutputCategory, SessionEvent};

/// Debug session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// GDB is up but not attached to a target
    Disconnected,
    /// `target-select` in flight
    Connecting,
    /// Connected, target halted
    Stopped,
    /// Connected, target executing
    Running,
    /// GDB is being shut down
    Terminating,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Terminating => write!(f, "terminating"),
        }
    }
}

/// Connection phase; stopped/running is read from the run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disconnected,
    Connecting,
    Connected,
    Terminating,
}

/// Behaviour of one session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Argument of `target-select remote`
    pub target: String,
    /// Download the program after connecting
    pub load: bool,
    pub auto_continue: bool,
    pub timeouts: TimeoutConfig,
}

impl From<&LaunchConfig> for SessionOptions {
    fn from(config: &LaunchConfig) -> Self {
        Self {
            target: config.target.clone(),
            load: config.load,
            auto_continue: config.auto_continue,
            timeouts: config.timeouts,
        }
    }
}

/// A line breakpoint as requested by the client
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: u32,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub log_message: Option<String>,
}

impl SourceBreakpoint {
    pub fn new(line: u32) -> Self {
        Self {
            line,
            ..Self::default()
        }
    }
}

/// A function breakpoint as requested by the client
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FunctionBreakpoint {
    pub name: String,
    #[serde(default)]
    pub condition: Option<String>,
}

/// Variable scope of a stack frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub name: String,
    pub variables_reference: i64,
    pub expensive: bool,
}

/// Where an expression is evaluated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluateContext {
    Watch,
    Hover,
    /// Typed into the debug console, treated as user input
    Repl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
    pub result: String,
    pub variables_reference: i64,
}

/// Summary answered to `status` requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<u32>,
    pub target: String,
    pub pending_commands: usize,
}

/// One debug session
pub struct DebugSession {
    gdb: Arc<Gdb>,
    process: Option<ProcessHandle>,
    phase: Arc<Mutex<Phase>>,
    events: broadcast::Sender<SessionEvent>,
    breakpoints: tokio::sync::Mutex<BreakpointRegistry>,
    variables: tokio::sync::Mutex<VariableObjects>,
    options: SessionOptions,
    /// The first thread listing tolerates a running target
    threads_listed: AtomicBool,
    forwarder: JoinHandle<()>,
}

impl DebugSession {
    /// Start GDB for the configured program
    #[tracing::instrument(skip(config), fields(executable = %config.executable.display()))]
    pub fn launch(config: &LaunchConfig) -> Result<Self> {
        let spawn = SpawnOptions {
            gdb: config.gdb.clone(),
            executable: config.executable.clone(),
            args: config.gdb_args.clone(),
        };
        let (gdb, process) = process::spawn(&spawn, config.timeouts.controller())?;
        Ok(Self::new(gdb, Some(process), SessionOptions::from(config)))
    }

    /// Build a session over an existing controller
    pub fn new(gdb: Gdb, process: Option<ProcessHandle>, options: SessionOptions) -> Self {
        let gdb = Arc::new(gdb);
        let phase = Arc::new(Mutex::new(Phase::Disconnected));
        let (events, _) = broadcast::channel(1024);

        let forwarder = tokio::spawn(forward_events(
            Arc::clone(&gdb),
            Arc::clone(&phase),
            events.clone(),
            Receivers {
                run_state: gdb.subscribe_run_state(),
                threads: gdb.subscribe_threads(),
                output: gdb.subscribe_output(),
            },
        ));

        Self {
            gdb,
            process,
            phase,
            events,
            breakpoints: tokio::sync::Mutex::new(BreakpointRegistry::new()),
            variables: tokio::sync::Mutex::new(VariableObjects::new()),
            options,
            threads_listed: AtomicBool::new(false),
            forwarder,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn gdb(&self) -> &Gdb {
        &self.gdb
    }

    pub fn process(&self) -> Option<&ProcessHandle> {
        self.process.as_ref()
    }

    pub fn state(&self) -> SessionState {
        match *self.phase() {
            Phase::Disconnected => SessionState::Disconnected,
            Phase::Connecting => SessionState::Connecting,
            Phase::Terminating => SessionState::Terminating,
            Phase::Connected => match self.gdb.run_state().is_running() {
                Some(true) => SessionState::Running,
                _ => SessionState::Stopped,
            },
        }
    }

    pub fn status(&self) -> SessionStatus {
        let snapshot = self.gdb.run_state().snapshot();
        SessionStatus {
            state: self.state(),
            reason: snapshot.reason.map(|r| r.as_str().to_string()),
            thread_id: snapshot.thread_id,
            target: self.options.target.clone(),
            pending_commands: self.gdb.pending_count(),
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase() = phase;
    }

    fn console(&self, text: impl Into<String>) {
        let _ = self.events.send(SessionEvent::console(text));
    }

    fn ensure_connected(&self, action: &str) -> Result<()> {
        if *self.phase() == Phase::Connected {
            return Ok(());
        }
        tracing::error!(action, state = %self.state(), "request before the target is connected");
        Err(Error::SessionNotConnected)
    }

    // === Connection ===

    /// Attach GDB to the remote target, optionally downloading the program
    pub async fn connect(&self) -> Result<()> {
        {
            let mut phase = self.phase();
            if *phase != Phase::Disconnected {
                return Err(Error::invalid_state("connect", &self.state_of(*phase)));
            }
            *phase = Phase::Connecting;
        }

        tracing::info!(target = %self.options.target, "connecting");
        let connected = self
            .gdb
            .command_sequence(vec![
                MiCommand::new("gdb-set").arg("target-async").arg("on"),
                MiCommand::new("target-select")
                    .arg("remote")
                    .arg(&self.options.target),
            ])
            .await;
        if let Err(e) = connected {
            self.set_phase(Phase::Disconnected);
            return Err(e);
        }

        {
            // GDB may have exited right after connecting
            let mut phase = self.phase();
            if *phase != Phase::Connecting || self.gdb.is_closed() {
                *phase = Phase::Disconnected;
                return Err(Error::ProcessExit);
            }
            *phase = Phase::Connected;
        }
        self.console(format!("connected to: {}", self.options.target));

        if self.options.load {
            self.load().await?;
        }
        Ok(())
    }

    fn state_of(&self, phase: Phase) -> String {
        match phase {
            Phase::Connected => "connected".to_string(),
            Phase::Connecting => SessionState::Connecting.to_string(),
            Phase::Disconnected => SessionState::Disconnected.to_string(),
            Phase::Terminating => SessionState::Terminating.to_string(),
        }
    }

    /// Download the program to the target
    pub async fn load(&self) -> Result<()> {
        self.ensure_connected("load")?;
        self.console("loading program...");

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let download = self
            .gdb
            .command_ensure_with_progress(MiCommand::new("target-download"), progress_tx);
        tokio::pin!(download);

        let mut tracker = LoadTracker::default();
        let result = loop {
            tokio::select! {
                biased;
                Some(record) = progress_rx.recv() => self.report_progress(tracker.update(&record.results)),
                result = &mut download => break result,
            }
        };
        while let Ok(record) = progress_rx.try_recv() {
            self.report_progress(tracker.update(&record.results));
        }

        result?;
        self.console("program loaded.");
        Ok(())
    }

    fn report_progress(&self, progress: LoadProgress) {
        tracing::debug!(section = %progress.section, total_sent = progress.total_sent, "download progress");
        let message = progress.message();
        let _ = self.events.send(SessionEvent::LoadProgress(progress));
        self.console(message);
    }

    /// Stop the target and download the program again
    pub async fn reload(&self) -> Result<()> {
        self.interrupt().await?;
        self.load().await
    }

    /// Shut GDB down, killing it if it does not exit in time
    pub async fn terminate(&self) -> Result<()> {
        self.set_phase(Phase::Terminating);
        self.console("debugger stopping.");

        let exit = async {
            if let Err(e) = self.gdb.command_ensure("gdb-exit").await {
                tracing::debug!(error = %e, "gdb-exit did not complete");
            }
            self.gdb.wait_closed().await;
            if let Some(process) = &self.process {
                process.wait().await;
            }
        };

        let kill = self.options.timeouts.kill();
        if tokio::time::timeout(kill, exit).await.is_err() {
            tracing::error!(millis = kill.as_millis() as u64, "exit timeout, force kill");
            if let Some(process) = &self.process {
                process.kill();
                process.wait().await;
            }
        }

        self.set_phase(Phase::Disconnected);
        self.console("ok.");
        Ok(())
    }

    /// Detach from the target, killing GDB if it does not answer in time
    pub async fn detach(&self) -> Result<()> {
        self.ensure_connected("detach")?;
        let timeout = self.options.timeouts.detach();
        match tokio::time::timeout(timeout, self.gdb.command_ensure("target-detach")).await {
            Ok(Ok(_)) => tracing::info!("detached"),
            Ok(Err(e)) => tracing::warn!(error = %e, "detach failed"),
            Err(_) => {
                tracing::warn!("detach timeout, force kill");
                if let Some(process) = &self.process {
                    process.kill();
                }
            }
        }
        self.set_phase(Phase::Disconnected);
        Ok(())
    }

    /// Client finished its initial requests
    pub async fn configuration_done(&self) -> Result<()> {
        self.ensure_connected("finish configuration")?;
        if self.options.auto_continue && self.state() == SessionState::Stopped {
            self.continue_execution().await?;
        }
        Ok(())
    }

    // === Execution control ===

    /// Resume the target
    ///
    /// When GDB accepts the command but the target does not start, the
    /// current state is re-announced so the client stays in sync.
    pub async fn continue_execution(&self) -> Result<()> {
        self.ensure_connected("continue")?;
        let result = self.gdb.exec_continue().await;
        if self.gdb.run_state().is_running() != Some(true) {
            self.force_status_event();
            return Err(result
                .err()
                .unwrap_or_else(|| Error::invalid_state("continue", "stopped")));
        }
        result
    }

    pub async fn next(&self) -> Result<()> {
        self.step("exec-next").await
    }

    pub async fn step_in(&self) -> Result<()> {
        self.step("exec-step").await
    }

    pub async fn step_out(&self) -> Result<()> {
        self.step("exec-finish").await
    }

    /// Run a stepping command and wait until the target halts again
    async fn step(&self, operation: &str) -> Result<()> {
        self.ensure_connected(operation)?;
        let wait = self.options.timeouts.state_wait_ms;
        let run_state = self.gdb.run_state();

        let resumed = run_state.run_waiter();
        self.gdb.command_ensure(operation).await?;
        match resumed.wait(std::time::Duration::from_millis(wait)).await {
            // Already halted again before we looked
            Ok(()) | Err(Error::StateChanged(_)) => {}
            Err(e) => return Err(e),
        }
        run_state
            .stop_waiter()
            .wait(std::time::Duration::from_millis(wait))
            .await
    }

    /// Stop the target without announcing a pause
    pub async fn interrupt(&self) -> Result<()> {
        self.ensure_connected("interrupt")?;
        self.gdb.exec_interrupt().await
    }

    /// Stop the target on user request
    pub async fn pause(&self) -> Result<()> {
        self.interrupt().await?;
        self.gdb
            .run_state()
            .synthetic_stop(crate::gdb::StopReason::Pausing);
        Ok(())
    }

    /// Re-announce whether the target runs
    pub fn force_status_event(&self) {
        if self.gdb.run_state().force_event().is_none() {
            tracing::debug!("no run state observed yet, nothing to announce");
        }
    }

    // === Breakpoints ===

    /// Replace the line breakpoints of one source file
    pub async fn set_breakpoints(
        &self,
        file: &str,
        requested: Vec<SourceBreakpoint>,
    ) -> Result<Vec<BreakpointInfo>> {
        self.ensure_connected("set breakpoints")?;
        let desired = requested
            .into_iter()
            .map(|bp| {
                let mut breakpoint = Breakpoint::line(file, bp.line);
                breakpoint.condition = bp.condition.filter(|c| !c.is_empty());
                breakpoint.log_message = bp.log_message.filter(|m| !m.is_empty());
                breakpoint
            })
            .collect();
        self.reconcile(file, desired).await
    }

    /// Replace all function breakpoints
    pub async fn set_function_breakpoints(
        &self,
        requested: Vec<FunctionBreakpoint>,
    ) -> Result<Vec<BreakpointInfo>> {
        self.ensure_connected("set function breakpoints")?;
        let desired = requested
            .into_iter()
            .map(|bp| {
                let mut breakpoint = Breakpoint::new(Location::Function { name: bp.name });
                breakpoint.condition = bp.condition.filter(|c| !c.is_empty());
                breakpoint
            })
            .collect();
        self.reconcile(FUNCTION_KEY, desired).await
    }

    async fn reconcile(&self, key: &str, desired: Vec<Breakpoint>) -> Result<Vec<BreakpointInfo>> {
        let outcome = self
            .breakpoints
            .lock()
            .await
            .reconcile(key, desired, &*self.gdb)
            .await;

        for removed in &outcome.removed {
            tracing::info!(id = removed.id, "Delete breakpoint: {}", removed.id);
        }
        for breakpoint in outcome.breakpoints.iter().filter(|b| b.is_verified()) {
            tracing::info!(
                id = breakpoint.id,
                "New breakpoint: {} ({} in {})",
                breakpoint.id,
                breakpoint.function.as_deref().unwrap_or("??"),
                breakpoint.location
            );
        }
        for id in &outcome.rejected {
            let _ = self.events.send(SessionEvent::BreakpointRemoved { id: *id });
        }

        Ok(outcome.breakpoints.iter().map(Breakpoint::to_info).collect())
    }

    /// Change the condition of a breakpoint by GDB number
    pub async fn set_breakpoint_condition(&self, id: i64, condition: Option<String>) -> Result<()> {
        self.ensure_connected("set breakpoint condition")?;
        let condition = condition.filter(|c| !c.is_empty());
        self.breakpoints
            .lock()
            .await
            .set_condition(id, condition, &*self.gdb)
            .await
    }

    // === Inspection ===

    pub async fn threads(&self) -> Result<Vec<Thread>> {
        self.ensure_connected("threads")?;
        let first = !self.threads_listed.swap(true, Ordering::SeqCst);

        let result = if first {
            match self.gdb.command("thread-info").await {
                Err(e) if e.is_busy() => {
                    tracing::debug!("target running, no threads yet");
                    return Ok(Vec::new());
                }
                other => other?,
            }
        } else {
            self.gdb.command_ensure("thread-info").await?
        };

        Ok(list_tuples(result.results.get_list("threads").unwrap_or_default())
            .filter_map(Thread::from_tuple)
            .collect())
    }

    /// Frames of a thread, innermost first; `thread` 0 means the current one
    pub async fn stack_trace(&self, thread: u32, levels: Option<u32>) -> Result<Vec<StackFrame>> {
        self.ensure_connected("stack trace")?;
        let mut command = MiCommand::new("stack-list-frames")
            .option("--thread", Some(thread).filter(|t| *t != 0));
        if let Some(levels) = levels.filter(|l| *l > 0) {
            command = command.arg(0).arg(levels);
        }
        let result = self.gdb.command_ensure(command).await?;

        let thread = if thread == 0 {
            self.gdb.run_state().snapshot().thread_id.unwrap_or(1)
        } else {
            thread
        };
        Ok(list_tuples(result.results.get_list("stack").unwrap_or_default())
            .filter_map(|frame| StackFrame::from_tuple(frame, thread))
            .collect())
    }

    pub fn scopes(&self, frame_id: i64) -> Vec<Scope> {
        vec![Scope {
            name: "Locals".to_string(),
            variables_reference: STACK_HANDLES_START + frame_id,
            expensive: false,
        }]
    }

    /// Expand a scope or a compound variable
    pub async fn variables(&self, reference: i64) -> Result<Vec<Variable>> {
        self.ensure_connected("variables")?;
        if reference >= VAR_HANDLES_START {
            let mut objects = self.variables.lock().await;
            let children = objects.children(&self.gdb, reference).await?;
            return Ok(children.iter().map(|c| c.to_variable()).collect());
        }
        if reference < STACK_HANDLES_START {
            return Err(Error::UnknownReference(reference));
        }

        let (thread, frame) = decode_frame_id(reference - STACK_HANDLES_START);
        let command = MiCommand::new("stack-list-variables")
            .option("--thread", Some(thread))
            .option("--frame", Some(frame))
            .arg("--simple-values");
        let result = self.gdb.command_ensure(command).await?;
        let locals: Vec<StackVariable> = list_tuples(result.results.get_list("variables").unwrap_or_default())
            .filter_map(StackVariable::from_tuple)
            .collect();

        let mut objects = self.variables.lock().await;
        let mut variables = Vec::with_capacity(locals.len());
        for local in locals {
            let name = varobj_name(reference, &local.name);
            match objects.fetch(&self.gdb, &name, &local.name, thread, frame).await {
                Ok(object) => {
                    let mut variable = object.to_variable();
                    variable.name = local.name;
                    variables.push(variable);
                }
                Err(e) => {
                    tracing::warn!(variable = %local.name, error = %e, "cannot create variable object");
                    variables.push(Variable {
                        value: local.value.unwrap_or_else(|| format!("<{}>", e)),
                        type_name: local.type_name,
                        variables_reference: 0,
                        evaluate_name: Some(local.name.clone()),
                        name: local.name,
                    });
                }
            }
        }
        Ok(variables)
    }

    /// Evaluate an expression in a frame
    pub async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: EvaluateContext,
    ) -> Result<EvaluateResult> {
        self.ensure_connected("evaluate")?;
        let location = frame_id.map(decode_frame_id);

        if context == EvaluateContext::Repl {
            let result = self.send_user_input(expression, location).await?;
            return Ok(EvaluateResult {
                result: result
                    .and_then(|r| r.results.get_str("value").map(str::to_string))
                    .unwrap_or_default(),
                variables_reference: 0,
            });
        }

        let command = MiCommand::new("data-evaluate-expression")
            .option("--thread", location.map(|(thread, _)| thread))
            .option("--frame", location.map(|(_, frame)| frame))
            .quoted(expression);
        let result = self.gdb.command_ensure(command).await?;
        Ok(EvaluateResult {
            result: result.results.get_str("value").unwrap_or_default().to_string(),
            variables_reference: 0,
        })
    }

    /// Assign a value to a variable shown under `reference`, returns the new value
    pub async fn set_variable(&self, reference: i64, name: &str, value: &str) -> Result<String> {
        self.ensure_connected("set variable")?;
        let mut objects = self.variables.lock().await;

        let object = if reference >= VAR_HANDLES_START {
            let parent = objects.get(reference).ok_or(Error::UnknownReference(reference))?;
            let child = format!("{}.{}", parent.name, name);
            Some(objects.by_name(&child).ok_or(Error::UnknownReference(reference))?.name.clone())
        } else if reference >= STACK_HANDLES_START {
            objects.by_name(&varobj_name(reference, name)).map(|o| o.name.clone())
        } else {
            return Err(Error::UnknownReference(reference));
        };

        match object {
            Some(object) => objects.assign(&self.gdb, &object, value).await,
            None => {
                let command = MiCommand::new("gdb-set")
                    .arg("var")
                    .arg(format!("{}={}", name, value));
                self.gdb.command_ensure(command).await?;
                Ok(value.to_string())
            }
        }
    }

    /// Hex dump of target memory
    pub async fn examine_memory(&self, address: u64, length: u64) -> Result<String> {
        self.ensure_connected("examine memory")?;
        let command = MiCommand::new("data-read-memory-bytes")
            .arg(format!("{:#x}", address))
            .arg(length);
        let result = self.gdb.command_ensure(command).await?;
        result
            .results
            .get_str("memory.0.contents")
            .map(str::to_string)
            .ok_or_else(|| Error::Internal("memory read without contents".to_string()))
    }

    /// Handle a line typed into the debug console
    ///
    /// `!fe` re-announces the run state, a leading `-` sends raw MI and
    /// everything else goes through GDB's console interpreter.
    pub async fn send_user_input(
        &self,
        text: &str,
        location: Option<(u32, u32)>,
    ) -> Result<Option<ResultRecord>> {
        self.ensure_connected("send console input")?;
        let text = text.trim();
        if text == "!fe" {
            self.force_status_event();
            return Ok(None);
        }
        if let Some(raw) = text.strip_prefix('-') {
            return self.gdb.command(raw).await.map(Some);
        }
        let (thread, frame) = match location {
            Some((thread, frame)) => (Some(thread), Some(frame)),
            None => (None, None),
        };
        self.gdb.cli_command(text, thread, frame).await.map(Some)
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        self.forwarder.abort();
        if let Some(process) = &self.process {
            if !process.has_exited() {
                process.kill();
            }
        }
    }
}

struct Receivers {
    run_state: broadcast::Receiver<RunStateEvent>,
    threads: broadcast::Receiver<ThreadEvent>,
    output: broadcast::Receiver<BackendOutput>,
}

/// Turn controller notifications into session events until GDB goes away
async fn forward_events(
    gdb: Arc<Gdb>,
    phase: Arc<Mutex<Phase>>,
    events: broadcast::Sender<SessionEvent>,
    mut receivers: Receivers,
) {
    loop {
        tokio::select! {
            biased;
            event = receivers.run_state.recv() => match event {
                Ok(event) => {
                    if event.is_running {
                        tracing::info!(forced = event.forced, "> continue");
                    } else {
                        let reason = event.reason.map(|r| r.as_str()).unwrap_or("unknown");
                        tracing::info!(forced = event.forced, "> interrupt by {}", reason);
                    }
                    if let Some(event) = SessionEvent::from_run_state(&event) {
                        let _ = events.send(event);
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::warn!(missed = n, "run state events lagged"),
                Err(RecvError::Closed) => break,
            },
            event = receivers.threads.recv() => match event {
                Ok(event) => {
                    tracing::debug!(?event, "thread event");
                    if let Some(event) = SessionEvent::from_thread(&event) {
                        let _ = events.send(event);
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::warn!(missed = n, "thread events lagged"),
                Err(RecvError::Closed) => break,
            },
            output = receivers.output.recv() => match output {
                Ok(output) => {
                    let _ = events.send(SessionEvent::Output {
                        category: output.source.into(),
                        output: output.text,
                    });
                }
                Err(RecvError::Lagged(n)) => tracing::warn!(missed = n, "output lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = gdb.wait_closed() => break,
        }
    }

    tracing::info!("GDB connection closed");
    *phase.lock().unwrap_or_else(|e| e.into_inner()) = Phase::Disconnected;
    let _ = events.send(SessionEvent::Terminated);
}
