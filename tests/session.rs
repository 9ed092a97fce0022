//! End-to-end tests for debug sessions
//!
//! These tests run real sessions against the `mock_gdb` binary, which speaks
//! MI2 over its standard streams like GDB does, and verify:
//! 1. Connecting, loading and the events a client sees
//! 2. Breakpoint bookkeeping, including address collisions
//! 3. Transparent busy-retry while the target runs
//! 4. Inspection (threads, frames, variables, memory)
//! 5. The control channel

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gdbmi::common::config::{LaunchConfig, TimeoutConfig};
use gdbmi::gdb::varobj::VAR_HANDLES_START;
use gdbmi::ipc::{ControlClient, ControlRequest, ControlServer};
use gdbmi::session::{EvaluateContext, FunctionBreakpoint, SourceBreakpoint};
use gdbmi::{DebugSession, Error, SessionEvent, SessionState};
use tokio::sync::broadcast;

/// Test context with a scratch directory and a fake program
struct TestContext {
    dir: tempfile::TempDir,
    executable: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let executable = dir.path().join("firmware.elf");
        std::fs::write(&executable, b"\x7fELF").expect("Failed to write program");
        Self { dir, executable }
    }

    fn launch_config(&self, gdb_args: &[&str], load: bool) -> LaunchConfig {
        LaunchConfig {
            executable: self.executable.clone(),
            gdb: PathBuf::from(env!("CARGO_BIN_EXE_mock_gdb")),
            gdb_args: gdb_args.iter().map(|a| a.to_string()).collect(),
            target: "localhost:3333".to_string(),
            load,
            auto_continue: false,
            timeouts: TimeoutConfig {
                state_wait_ms: 3000,
                command_grace_ms: 1000,
                kill_ms: 3000,
                detach_ms: 3000,
            },
        }
    }

    fn launch(&self, gdb_args: &[&str], load: bool) -> Arc<DebugSession> {
        let config = self.launch_config(gdb_args, load);
        Arc::new(DebugSession::launch(&config).expect("Failed to start mock GDB"))
    }
}

/// Wait for the first event matching `predicate`
async fn wait_for<F>(events: &mut broadcast::Receiver<SessionEvent>, predicate: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    })
    .await
    .expect("Timed out waiting for event")
}

/// Everything already queued on the event stream
fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

#[tokio::test]
async fn test_connect_load_and_terminate() {
    let ctx = TestContext::new();
    let session = ctx.launch(&[], true);
    let mut events = session.subscribe();
    assert_eq!(session.state(), SessionState::Disconnected);

    session.connect().await.expect("connect failed");
    assert_eq!(session.state(), SessionState::Stopped);

    // The startup stop is forwarded by a task, so it may interleave with the
    // load output
    let mut seen = drain(&mut events);
    if !seen.iter().any(|e| matches!(e, SessionEvent::Stopped { .. })) {
        seen.push(wait_for(&mut events, |e| matches!(e, SessionEvent::Stopped { .. })).await);
    }
    seen.extend(drain(&mut events));

    let mut last_progress = None;
    let mut console = Vec::new();
    for event in seen {
        match event {
            SessionEvent::Stopped { reason, .. } => assert_eq!(reason, "entry"),
            SessionEvent::LoadProgress(progress) => last_progress = Some(progress),
            SessionEvent::Output { output, .. } => console.push(output),
            _ => {}
        }
    }
    let progress = last_progress.expect("no load progress reported");
    assert_eq!(progress.section, ".data");
    assert_eq!(progress.total_sent, 3072);
    assert_eq!(progress.total_size, Some(3072));
    assert!(console.iter().any(|l| l == "connected to: localhost:3333"));
    assert!(console.iter().any(|l| l.starts_with("[100%] 3072/3072")));
    assert!(console.iter().any(|l| l == "program loaded."));

    session.terminate().await.expect("terminate failed");
    wait_for(&mut events, |e| *e == SessionEvent::Terminated).await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.process().is_some_and(|p| p.has_exited()));
}

#[tokio::test]
async fn test_breakpoints_and_collisions() {
    let ctx = TestContext::new();
    let session = ctx.launch(&[], false);
    let mut events = session.subscribe();
    session.connect().await.unwrap();

    let infos = session
        .set_breakpoints(
            "main.c",
            vec![SourceBreakpoint::new(20), SourceBreakpoint::new(21)],
        )
        .await
        .unwrap();
    assert_eq!(infos.len(), 2);
    assert!(infos.iter().all(|i| i.verified));
    assert_eq!(infos[0].address.as_deref(), Some("0x80000128"));
    // Line 21 lands on line 20's address, the duplicate is dropped
    assert_eq!(infos[1].id, infos[0].id);
    let removed = wait_for(&mut events, |e| matches!(e, SessionEvent::BreakpointRemoved { .. })).await;
    assert_eq!(removed, SessionEvent::BreakpointRemoved { id: 2 });

    // Same request again changes nothing in GDB
    let again = session
        .set_breakpoints(
            "main.c",
            vec![SourceBreakpoint::new(20), SourceBreakpoint::new(21)],
        )
        .await
        .unwrap();
    assert_eq!(again, infos);

    let missing = session
        .set_breakpoints("missing.c", vec![SourceBreakpoint::new(3)])
        .await
        .unwrap();
    assert!(!missing[0].verified);
    assert!(missing[0].message.as_deref().unwrap_or_default().contains("No source file"));

    let functions = session
        .set_function_breakpoints(vec![FunctionBreakpoint {
            name: "uart_init".to_string(),
            condition: Some("baud > 0".to_string()),
        }])
        .await
        .unwrap();
    assert!(functions[0].verified);

    session
        .set_breakpoint_condition(functions[0].id, Some("baud == 9600".to_string()))
        .await
        .unwrap();

    let cleared = session.set_breakpoints("main.c", Vec::new()).await.unwrap();
    assert!(cleared.is_empty());

    session.terminate().await.unwrap();
}

#[tokio::test]
async fn test_busy_retry_is_transparent() {
    let ctx = TestContext::new();
    let session = ctx.launch(&[], false);
    session.connect().await.unwrap();

    let mut events = session.subscribe();
    session.continue_execution().await.unwrap();
    assert_eq!(session.state(), SessionState::Running);
    wait_for(&mut events, |e| matches!(e, SessionEvent::Continued { .. })).await;

    // GDB refuses while running; the session stops, inserts and resumes
    let infos = session
        .set_breakpoints("main.c", vec![SourceBreakpoint::new(30)])
        .await
        .unwrap();
    assert!(infos[0].verified);
    assert_eq!(session.state(), SessionState::Running);

    let seen = drain(&mut events);
    assert!(
        !seen
            .iter()
            .any(|e| matches!(e, SessionEvent::Stopped { .. } | SessionEvent::Continued { .. })),
        "retry leaked run state events: {seen:?}"
    );

    session.pause().await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Stopped { reason, .. } if reason == "pause")
    })
    .await;
    assert_eq!(session.state(), SessionState::Stopped);

    session.terminate().await.unwrap();
}

#[tokio::test]
async fn test_stop_at_breakpoint_and_step() {
    let ctx = TestContext::new();
    let session = ctx.launch(&["--stop-at-breakpoints"], false);
    let mut events = session.subscribe();
    session.connect().await.unwrap();

    session
        .set_breakpoints("main.c", vec![SourceBreakpoint::new(24)])
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::Stopped { .. })).await;

    // The breakpoint is hit immediately, so continue leaves the target stopped
    let _ = session.continue_execution().await;
    let hit = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Stopped { reason, .. } if reason == "breakpoint")
    })
    .await;
    assert!(matches!(hit, SessionEvent::Stopped { thread_id: Some(1), .. }));

    let frames = session.stack_trace(1, Some(20)).await.unwrap();
    assert_eq!(frames[0].line, 24);
    assert_eq!(frames[0].function, "main");
    assert_eq!(frames[1].function, "_start");

    session.next().await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Stopped { reason, .. } if reason == "step")
    })
    .await;
    let frames = session.stack_trace(1, None).await.unwrap();
    assert_eq!(frames[0].line, 25);

    session.step_out().await.unwrap();
    assert_eq!(session.state(), SessionState::Stopped);

    session.terminate().await.unwrap();
}

#[tokio::test]
async fn test_inspection() {
    let ctx = TestContext::new();
    let session = ctx.launch(&[], false);
    session.connect().await.unwrap();

    let threads = session.threads().await.unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].display_name(), "main (Thread 1)");

    let frames = session.stack_trace(1, Some(10)).await.unwrap();
    let scope = session.scopes(frames[0].id)[0].variables_reference;

    let variables = session.variables(scope).await.unwrap();
    let names: Vec<&str> = variables.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["cfg", "count"]);
    let cfg = &variables[0];
    assert!(cfg.variables_reference >= VAR_HANDLES_START);
    assert_eq!(variables[1].value, "3");

    let children = session.variables(cfg.variables_reference).await.unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].name, "baud");
    assert_eq!(children[0].value, "115200");

    assert_eq!(session.set_variable(scope, "count", "9").await.unwrap(), "9");
    let refreshed = session.variables(scope).await.unwrap();
    assert_eq!(refreshed[1].value, "9");

    let result = session
        .evaluate("count", Some(frames[0].id), EvaluateContext::Watch)
        .await
        .unwrap();
    assert_eq!(result.result, "9");
    assert!(matches!(
        session.evaluate("nope", None, EvaluateContext::Hover).await,
        Err(Error::BackendRejection { .. })
    ));

    assert_eq!(
        session.examine_memory(0x8000_0010, 4).await.unwrap(),
        "10111213"
    );
    assert!(matches!(
        session.variables(5).await,
        Err(Error::UnknownReference(5))
    ));

    session.terminate().await.unwrap();
}

#[tokio::test]
async fn test_variable_objects_survive_a_step() {
    let ctx = TestContext::new();
    let session = ctx.launch(&[], false);
    session.connect().await.unwrap();

    let frames = session.stack_trace(1, None).await.unwrap();
    let scope = session.scopes(frames[0].id)[0].variables_reference;
    let before = session.variables(scope).await.unwrap();
    assert_eq!(before[1].value, "3");

    // GDB forgets its variable objects across the step
    session.next().await.unwrap();
    let frames = session.stack_trace(1, None).await.unwrap();
    assert_eq!(session.scopes(frames[0].id)[0].variables_reference, scope);

    let after = session.variables(scope).await.unwrap();
    assert_eq!(after[0].name, "cfg");
    assert_eq!(after[0].variables_reference, before[0].variables_reference);
    assert_eq!(after[1].value, "4");

    let children = session.variables(after[0].variables_reference).await.unwrap();
    assert_eq!(children[0].value, "115200");

    session.terminate().await.unwrap();
}

#[tokio::test]
async fn test_user_input() {
    let ctx = TestContext::new();
    let session = ctx.launch(&[], false);
    let mut events = session.subscribe();
    session.connect().await.unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::Stopped { .. })).await;

    session.send_user_input("info registers pc", None).await.unwrap();
    let output = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Output { output, .. } if output.starts_with("mock:"))
    })
    .await;
    assert!(matches!(output, SessionEvent::Output { ref output, .. } if output == "mock: info registers pc\n"));

    let raw = session.send_user_input("-gdb-version", None).await.unwrap();
    assert!(raw.is_some());

    session.send_user_input("!fe", None).await.unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::Stopped { .. })).await;

    session.terminate().await.unwrap();
}

#[tokio::test]
async fn test_control_channel() {
    let ctx = TestContext::new();
    let session = ctx.launch(&[], false);
    session.connect().await.unwrap();

    let socket = ctx.dir.path().join("run").join("control.sock");
    let server = ControlServer::start(socket.clone(), Arc::clone(&session)).unwrap();
    let mut client = ControlClient::connect(&socket).await.unwrap();

    let status: serde_json::Value =
        serde_json::from_str(&client.request(&ControlRequest::Status).await.unwrap()).unwrap();
    assert_eq!(status["state"], "stopped");

    let memory = client
        .send_line(r#"examineMemory ["0x20", 2]"#)
        .await
        .unwrap();
    assert_eq!(memory, "2021");

    let value = client
        .request(&ControlRequest::Evaluate {
            expression: "count".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(value, "3");

    match client.send_line("reboot []").await {
        Err(Error::Remote { code, .. }) => assert_eq!(code, "UNKNOWN_METHOD"),
        other => panic!("unexpected {other:?}"),
    }

    assert_eq!(client.request(&ControlRequest::Continue).await.unwrap(), "ok");
    assert_eq!(client.request(&ControlRequest::Interrupt).await.unwrap(), "ok");
    assert_eq!(session.state(), SessionState::Stopped);

    drop(server);
    assert!(!socket.exists());
    session.terminate().await.unwrap();
}

#[tokio::test]
async fn test_gdb_exit_terminates_session() {
    let ctx = TestContext::new();
    let session = ctx.launch(&["--exit-on-connect"], false);
    let mut events = session.subscribe();

    // Depending on timing GDB is already gone when the connect result arrives
    match session.connect().await {
        Ok(()) | Err(Error::ProcessExit) => {}
        Err(e) => panic!("unexpected connect error: {e}"),
    }
    wait_for(&mut events, |e| *e == SessionEvent::Terminated).await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(matches!(
        session.threads().await,
        Err(Error::SessionNotConnected)
    ));
}
