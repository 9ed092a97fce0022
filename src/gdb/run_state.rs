//! Run-state reconciliation
//!
//! GDB reports execution changes with `*running` and `*stopped` records that
//! can arrive at any time, including while a command of ours is pending.
//! [`RunState`] folds them into a single state, tells waiters about flips and
//! broadcasts normalised events to the session.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, oneshot};

use crate::common::{Error, Result};
use crate::mi::{AsyncRecord, Tuple};

/// Why the target stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Breakpoint,
    StepComplete,
    Signal,
    Startup,
    Pausing,
    Exited,
    Unknown,
}

impl StopReason {
    /// Map GDB's `reason` field
    ///
    /// `first_stop` distinguishes the initial halt after connecting, which
    /// GDB reports without any reason.
    pub fn from_gdb(reason: Option<&str>, first_stop: bool) -> Self {
        match reason {
            None if first_stop => StopReason::Startup,
            None => StopReason::Unknown,
            Some("breakpoint-hit") => StopReason::Breakpoint,
            Some(r) if r.starts_with("watchpoint-") || r.starts_with("access-watchpoint") => {
                StopReason::Breakpoint
            }
            Some("end-stepping-range" | "function-finished" | "location-reached") => {
                StopReason::StepComplete
            }
            Some("signal-received") => StopReason::Signal,
            Some(r) if r.starts_with("exited") => StopReason::Exited,
            Some(other) => {
                tracing::info!(reason = other, "unrecognised stop reason");
                StopReason::Unknown
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Breakpoint => "breakpoint",
            StopReason::StepComplete => "step",
            StopReason::Signal => "signal",
            StopReason::Startup => "entry",
            StopReason::Pausing => "pause",
            StopReason::Exited => "exited",
            StopReason::Unknown => "unknown",
        }
    }
}

/// Normalised execution change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStateEvent {
    /// State before this record; `None` before the first observation
    pub was_running: Option<bool>,
    pub is_running: bool,
    /// Set for stop events only
    pub reason: Option<StopReason>,
    /// GDB's raw reason text (or signal meaning) for display
    pub description: Option<String>,
    pub thread_id: Option<u32>,
    pub all_threads: bool,
    /// False when the record only repeated the state we already had
    pub real_change: bool,
    /// Emitted on request rather than in reaction to a record
    pub forced: bool,
    /// Remaining fields of the record (frame, exit-code, signal-name...)
    pub details: Tuple,
}

/// Thread and thread-group notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadEvent {
    Created { id: u32, group_id: Option<String> },
    Exited { id: u32, group_id: Option<String> },
    GroupAdded { id: String },
    GroupStarted { id: String, pid: Option<u32> },
    GroupExited { id: String, exit_code: Option<String> },
}

/// Current view of the target's execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSnapshot {
    pub running: Option<bool>,
    pub reason: Option<StopReason>,
    pub thread_id: Option<u32>,
    pub all_threads: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Want {
    Stop,
    Run,
}

struct Inner {
    running: Option<bool>,
    seen_stop: bool,
    reason: Option<StopReason>,
    description: Option<String>,
    thread_id: Option<u32>,
    all_threads: bool,
    waiters: Vec<(Want, oneshot::Sender<Result<()>>)>,
}

/// Reconciler for `*running` / `*stopped` records
pub struct RunState {
    inner: Mutex<Inner>,
    suppressed: AtomicUsize,
    events: broadcast::Sender<RunStateEvent>,
    threads: broadcast::Sender<ThreadEvent>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        let (threads, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(Inner {
                running: None,
                seen_stop: false,
                reason: None,
                description: None,
                thread_id: None,
                all_threads: true,
                waiters: Vec::new(),
            }),
            suppressed: AtomicUsize::new(0),
            events,
            threads,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunStateEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_threads(&self) -> broadcast::Receiver<ThreadEvent> {
        self.threads.subscribe()
    }

    pub fn is_running(&self) -> Option<bool> {
        self.lock().running
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let inner = self.lock();
        RunSnapshot {
            running: inner.running,
            reason: inner.reason,
            thread_id: inner.thread_id,
            all_threads: inner.all_threads,
        }
    }

    /// Handle an exec (`*`) record
    pub fn handle_exec(&self, record: &AsyncRecord) -> Option<RunStateEvent> {
        match record.class.as_str() {
            "running" => {
                let thread = record.results.get_str("thread-id");
                let all_threads = thread.map_or(true, |t| t == "all");
                let thread_id = thread.and_then(|t| t.parse().ok());
                Some(self.observe(true, None, None, thread_id, all_threads, record.results.clone()))
            }
            "stopped" => {
                let raw = record.results.get_str("reason");
                let first_stop = !self.lock().seen_stop;
                let reason = StopReason::from_gdb(raw, first_stop);
                let description = record
                    .results
                    .get_str("signal-meaning")
                    .or(raw)
                    .map(str::to_string);
                let thread_id = record.results.get_parsed("thread-id");
                let all_threads = record
                    .results
                    .get_str("stopped-threads")
                    .map_or(true, |t| t == "all");
                Some(self.observe(
                    false,
                    Some(reason),
                    description,
                    thread_id,
                    all_threads,
                    record.results.clone(),
                ))
            }
            other => {
                tracing::debug!(class = other, "ignoring exec record");
                None
            }
        }
    }

    /// Handle a notify (`=`) record
    pub fn handle_notify(&self, record: &AsyncRecord) {
        let results = &record.results;
        let id_str = || results.get_str("id").map(str::to_string);
        let group = || results.get_str("group-id").map(str::to_string);

        let event = match record.class.as_str() {
            "thread-created" => results
                .get_parsed("id")
                .map(|id| ThreadEvent::Created { id, group_id: group() }),
            "thread-exited" => results
                .get_parsed("id")
                .map(|id| ThreadEvent::Exited { id, group_id: group() }),
            "thread-group-added" => id_str().map(|id| ThreadEvent::GroupAdded { id }),
            "thread-group-started" => id_str().map(|id| ThreadEvent::GroupStarted {
                id,
                pid: results.get_parsed("pid"),
            }),
            "thread-group-exited" => id_str().map(|id| ThreadEvent::GroupExited {
                id,
                exit_code: results.get_str("exit-code").map(str::to_string),
            }),
            class if class.starts_with("breakpoint-")
                || class.starts_with("library-")
                || class == "memory-changed"
                || class == "cmd-param-changed"
                || class == "thread-selected"
                || class == "tsv-created" =>
            {
                tracing::debug!(class, "notification");
                return;
            }
            class => {
                tracing::info!(class, "unhandled notification");
                return;
            }
        };

        match event {
            Some(event) => {
                let _ = self.threads.send(event);
            }
            None => tracing::warn!(class = %record.class, "thread notification without id"),
        }
    }

    /// Fold one observation into the state and notify waiters and listeners
    fn observe(
        &self,
        running: bool,
        reason: Option<StopReason>,
        description: Option<String>,
        thread_id: Option<u32>,
        all_threads: bool,
        details: Tuple,
    ) -> RunStateEvent {
        let mut inner = self.lock();
        let was_running = inner.running;
        let real_change = was_running != Some(running);

        inner.running = Some(running);
        inner.thread_id = thread_id;
        inner.all_threads = all_threads;
        if running {
            inner.reason = None;
            inner.description = None;
        } else {
            inner.seen_stop = true;
            inner.reason = reason;
            inner.description = description.clone();
        }

        let reached = if running { Want::Run } else { Want::Stop };
        for (want, waiter) in inner.waiters.drain(..) {
            let outcome = if want == reached {
                Ok(())
            } else if running {
                Err(Error::StateChanged("target resumed".to_string()))
            } else {
                Err(Error::StateChanged("target stopped".to_string()))
            };
            let _ = waiter.send(outcome);
        }
        drop(inner);

        let event = RunStateEvent {
            was_running,
            is_running: running,
            reason,
            description,
            thread_id,
            all_threads,
            real_change,
            forced: false,
            details,
        };
        tracing::debug!(
            running,
            real_change,
            reason = reason.map(|r| r.as_str()),
            "run state"
        );
        self.emit(event.clone());
        event
    }

    fn emit(&self, event: RunStateEvent) {
        if self.suppressed.load(Ordering::SeqCst) > 0 {
            tracing::trace!("run state notification suppressed");
            return;
        }
        let _ = self.events.send(event);
    }

    /// Re-announce the current state to listeners
    pub fn force_event(&self) -> Option<RunStateEvent> {
        let event = {
            let inner = self.lock();
            let running = inner.running?;
            RunStateEvent {
                was_running: Some(running),
                is_running: running,
                reason: inner.reason,
                description: inner.description.clone(),
                thread_id: inner.thread_id,
                all_threads: inner.all_threads,
                real_change: false,
                forced: true,
                details: Tuple::new(),
            }
        };
        let _ = self.events.send(event.clone());
        Some(event)
    }

    /// Announce a stop that did not come from GDB (user pause)
    pub fn synthetic_stop(&self, reason: StopReason) -> RunStateEvent {
        let event = {
            let mut inner = self.lock();
            let was_running = inner.running;
            inner.reason = Some(reason);
            RunStateEvent {
                was_running,
                is_running: false,
                reason: Some(reason),
                description: None,
                thread_id: inner.thread_id,
                all_threads: inner.all_threads,
                real_change: false,
                forced: true,
                details: Tuple::new(),
            }
        };
        let _ = self.events.send(event.clone());
        event
    }

    /// Pause run-state notifications until the guard drops
    ///
    /// State tracking and waiters keep working while suppressed; only the
    /// broadcast to listeners is held back.
    pub fn suppress(self: &Arc<Self>) -> SuppressGuard {
        self.suppressed.fetch_add(1, Ordering::SeqCst);
        SuppressGuard {
            state: Arc::clone(self),
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst) > 0
    }

    /// Register interest in the next stop
    ///
    /// Call this *before* sending the command that causes the stop.
    pub fn stop_waiter(&self) -> StateWaiter {
        self.waiter(Want::Stop)
    }

    /// Register interest in the next resume
    pub fn run_waiter(&self) -> StateWaiter {
        self.waiter(Want::Run)
    }

    fn waiter(&self, want: Want) -> StateWaiter {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        let satisfied = match (want, inner.running) {
            (Want::Stop, Some(false)) | (Want::Run, Some(true)) => true,
            _ => false,
        };
        if satisfied {
            let _ = tx.send(Ok(()));
        } else {
            inner.waiters.push((want, tx));
        }
        StateWaiter {
            label: match want {
                Want::Stop => "wait for stop",
                Want::Run => "wait for running",
            },
            rx,
        }
    }
}

/// Decrements the suppression counter on drop
pub struct SuppressGuard {
    state: Arc<RunState>,
}

impl Drop for SuppressGuard {
    fn drop(&mut self) {
        self.state.suppressed.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Pending interest in a run-state flip
pub struct StateWaiter {
    label: &'static str,
    rx: oneshot::Receiver<Result<()>>,
}

impl StateWaiter {
    /// Wait for the flip, failing if the opposite flip happens first
    pub async fn wait(self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::ProcessExit),
            Err(_) => Err(Error::timeout(self.label, timeout.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mi::{parse_record, Record};

    fn exec(line: &str) -> AsyncRecord {
        match parse_record(line).unwrap() {
            Record::Async(a) => a,
            other => panic!("not async: {other:?}"),
        }
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(StopReason::from_gdb(Some("breakpoint-hit"), false), StopReason::Breakpoint);
        assert_eq!(StopReason::from_gdb(Some("watchpoint-trigger"), false), StopReason::Breakpoint);
        assert_eq!(StopReason::from_gdb(Some("function-finished"), false), StopReason::StepComplete);
        assert_eq!(StopReason::from_gdb(Some("signal-received"), false), StopReason::Signal);
        assert_eq!(StopReason::from_gdb(Some("exited-normally"), false), StopReason::Exited);
        assert_eq!(StopReason::from_gdb(None, true), StopReason::Startup);
        assert_eq!(StopReason::from_gdb(None, false), StopReason::Unknown);
        assert_eq!(StopReason::from_gdb(Some("fork"), false), StopReason::Unknown);
    }

    #[test]
    fn test_first_observation_and_idempotent_repeat() {
        let state = RunState::new();
        let mut events = state.subscribe();

        let line = r#"*stopped,reason="breakpoint-hit",bkptno="1",thread-id="1",stopped-threads="all""#;
        let first = state.handle_exec(&exec(line)).unwrap();
        assert!(first.real_change);
        assert_eq!(first.was_running, None);
        assert_eq!(first.reason, Some(StopReason::Breakpoint));
        assert_eq!(first.thread_id, Some(1));
        assert!(first.all_threads);

        let second = state.handle_exec(&exec(line)).unwrap();
        assert!(!second.real_change);

        // Listeners still see both raw events
        assert!(events.try_recv().unwrap().real_change);
        assert!(!events.try_recv().unwrap().real_change);
    }

    #[test]
    fn test_startup_only_for_first_stop() {
        let state = RunState::new();
        let first = state.handle_exec(&exec(r#"*stopped,frame={addr="0x0"}"#)).unwrap();
        assert_eq!(first.reason, Some(StopReason::Startup));
        state.handle_exec(&exec(r#"*running,thread-id="all""#));
        let later = state.handle_exec(&exec(r#"*stopped,frame={addr="0x4"}"#)).unwrap();
        assert_eq!(later.reason, Some(StopReason::Unknown));
    }

    #[test]
    fn test_thread_notifications_in_order() {
        let state = RunState::new();
        let mut threads = state.subscribe_threads();
        for line in [
            r#"=thread-group-added,id="i1""#,
            r#"=thread-created,id="2",group-id="i1""#,
            r#"=thread-exited,id="2",group-id="i1""#,
        ] {
            state.handle_notify(&exec(line));
        }
        assert_eq!(threads.try_recv().unwrap(), ThreadEvent::GroupAdded { id: "i1".into() });
        assert_eq!(
            threads.try_recv().unwrap(),
            ThreadEvent::Created { id: 2, group_id: Some("i1".into()) }
        );
        assert_eq!(
            threads.try_recv().unwrap(),
            ThreadEvent::Exited { id: 2, group_id: Some("i1".into()) }
        );
    }

    #[tokio::test]
    async fn test_waiters() {
        let state = RunState::new();
        state.handle_exec(&exec(r#"*running,thread-id="all""#));

        // Already running resolves immediately
        state.run_waiter().wait(Duration::from_millis(10)).await.unwrap();

        let stop = state.stop_waiter();
        let run = state.run_waiter();
        assert!(run.wait(Duration::from_millis(10)).await.is_ok());
        state.handle_exec(&exec(r#"*stopped,reason="signal-received",signal-name="SIGINT""#));
        stop.wait(Duration::from_millis(10)).await.unwrap();

        // Already stopped resolves immediately
        state.stop_waiter().wait(Duration::from_millis(10)).await.unwrap();

        // Opposite flip fails the waiter
        let run = state.run_waiter();
        state.handle_exec(&exec(r#"*stopped,reason="end-stepping-range""#));
        assert!(matches!(
            run.wait(Duration::from_millis(10)).await,
            Err(Error::StateChanged(_))
        ));
    }

    #[tokio::test]
    async fn test_waiter_timeout() {
        let state = RunState::new();
        let err = state.stop_waiter().wait(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { millis: 20, .. }));
    }

    #[test]
    fn test_suppression_holds_back_events() {
        let state = Arc::new(RunState::new());
        let mut events = state.subscribe();
        {
            let _guard = state.suppress();
            assert!(state.is_suppressed());
            state.handle_exec(&exec(r#"*running,thread-id="all""#));
            assert_eq!(state.is_running(), Some(true));
        }
        assert!(!state.is_suppressed());
        assert!(events.try_recv().is_err());

        state.handle_exec(&exec(r#"*stopped,reason="breakpoint-hit""#));
        assert_eq!(events.try_recv().unwrap().reason, Some(StopReason::Breakpoint));
    }
}
