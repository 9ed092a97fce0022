//! Spawning GDB and supervising the process

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};

use crate::common::{Error, Result};

use super::controller::{BackendOutput, Gdb, OutputSource, Timeouts};

/// How to start GDB
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub gdb: PathBuf,
    pub executable: PathBuf,
    pub args: Vec<String>,
}

impl SpawnOptions {
    /// Command line: `<gdb> <executable> --interpreter=mi2 --quiet [args]`
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            self.executable.display().to_string(),
            "--interpreter=mi2".to_string(),
            "--quiet".to_string(),
        ];
        args.extend(self.args.iter().cloned());
        args
    }

    /// GDB runs next to the program so relative source paths resolve
    pub fn working_dir(&self) -> Option<&Path> {
        self.executable
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
    }
}

/// Handle on the running GDB process
#[derive(Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill: mpsc::UnboundedSender<()>,
    exit: watch::Receiver<Option<Option<i32>>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the supervisor to kill GDB
    pub fn kill(&self) {
        let _ = self.kill.send(());
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Wait for GDB to exit, returns its exit code if it had one
    pub async fn wait(&self) -> Option<i32> {
        let mut exit = self.exit.clone();
        let code = exit.wait_for(Option::is_some).await.map(|code| (*code).flatten());
        code.unwrap_or(None)
    }
}

/// Start GDB and connect a controller to its standard streams
pub fn spawn(options: &SpawnOptions, timeouts: Timeouts) -> Result<(Gdb, ProcessHandle)> {
    let mut cmd = Command::new(&options.gdb);
    cmd.args(options.command_args())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = options.working_dir() {
        cmd.current_dir(dir);
    }

    tracing::info!(gdb = %options.gdb.display(), args = ?options.command_args(), "starting GDB");
    let mut child = cmd.spawn().map_err(|e| {
        Error::GdbStartFailed(format!("Failed to start {}: {}", options.gdb.display(), e))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::GdbStartFailed("Failed to get GDB stdin".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::GdbStartFailed("Failed to get GDB stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::GdbStartFailed("Failed to get GDB stderr".to_string()))?;

    let gdb = Gdb::new(stdout, stdin, timeouts);

    let output = gdb.output_sender();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(line = %line, "GDB stderr");
            let _ = output.send(BackendOutput {
                source: OutputSource::Stderr,
                text: line,
            });
        }
    });

    let pid = child.id();
    let (kill_tx, kill_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = watch::channel(None);
    tokio::spawn(supervise(child, kill_rx, exit_tx));

    Ok((
        gdb,
        ProcessHandle {
            pid,
            kill: kill_tx,
            exit: exit_rx,
        },
    ))
}

async fn supervise(
    mut child: Child,
    mut kill: mpsc::UnboundedReceiver<()>,
    exit: watch::Sender<Option<Option<i32>>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Some(()) = kill.recv() => {
            tracing::info!("killing GDB");
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "failed to kill GDB");
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => {
            tracing::info!(code = ?status.code(), "GDB exited");
            status.code()
        }
        Err(e) => {
            tracing::warn!(error = %e, "waiting for GDB failed");
            None
        }
    };
    let _ = exit.send(Some(code));
}
