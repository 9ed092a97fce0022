//! CLI command handling
//!
//! Runs debug sessions in the foreground and formats their output.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::commands::Commands;
use crate::common::config::{Config, LaunchConfig};
use crate::common::{paths, Result};
use crate::gdb::{BreakpointInfo, Location};
use crate::ipc::{ControlClient, ControlServer};
use crate::mi::{classify, Line};
use crate::session::{
    DebugSession, FunctionBreakpoint, LoadProgress, OutputCategory, SessionEvent, SourceBreakpoint,
};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            executable,
            gdb,
            target,
            no_load,
            no_continue,
            breakpoints,
            config,
            socket,
            json,
        } => {
            let mut config = match config {
                Some(path) => Config::load_from(&path)?,
                None => Config::load()?,
            };
            if let Some(gdb) = gdb {
                config.gdb.path = gdb;
            }
            if let Some(target) = target {
                config.gdb.target = target;
            }
            if no_load {
                config.session.load_on_launch = false;
            }
            if no_continue {
                config.session.auto_continue = false;
            }
            if socket.is_some() {
                config.control.socket = socket;
            }
            run(config, executable, breakpoints, json).await
        }

        Commands::Parse { json } => parse(json).await,

        Commands::Control {
            socket,
            method,
            args,
        } => {
            let mut client = ControlClient::connect(&socket).await?;
            let line = match args {
                Some(args) => format!("{} {}", method, args),
                None => method,
            };
            println!("{}", client.send_line(&line).await?);
            Ok(())
        }
    }
}

/// Drive one session until the user quits or GDB goes away
async fn run(config: Config, executable: PathBuf, breakpoints: Vec<String>, json: bool) -> Result<()> {
    let locations = breakpoints
        .iter()
        .map(|b| Location::parse(b))
        .collect::<Result<Vec<_>>>()?;

    let launch = LaunchConfig::new(&config, executable)?;
    let session = Arc::new(DebugSession::launch(&launch)?);
    let printer = tokio::spawn(print_events(session.subscribe(), json));

    let _control = if config.control.enabled {
        let socket = config
            .control
            .socket
            .clone()
            .unwrap_or_else(paths::control_socket_path);
        let server = ControlServer::start(socket, Arc::clone(&session))?;
        if !json {
            println!("{} {}", "Control socket:".dimmed(), server.socket().display());
        }
        Some(server)
    } else {
        None
    };

    if !json {
        println!(
            "{} {} {}",
            "Connecting to".cyan(),
            launch.target.cyan().bold(),
            format!("({})", launch.executable.display()).dimmed()
        );
    }
    let result = interact(&session, locations, json).await;

    session.terminate().await?;
    let _ = printer.await;
    result
}

async fn interact(session: &DebugSession, locations: Vec<Location>, json: bool) -> Result<()> {
    session.connect().await?;
    set_initial_breakpoints(session, locations, json).await?;
    session.configuration_done().await?;

    let mut events = session.subscribe();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => continue,
                    "quit" | "exit" => break,
                    input => {
                        if let Err(e) = session.send_user_input(input, None).await {
                            eprintln!("{} {}", "Error:".red(), e);
                        }
                    }
                }
            }
            event = events.recv() => {
                if matches!(event, Ok(SessionEvent::Terminated) | Err(RecvError::Closed)) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, stopping session");
                break;
            }
        }
    }
    Ok(())
}

async fn set_initial_breakpoints(session: &DebugSession, locations: Vec<Location>, json: bool) -> Result<()> {
    let mut files: BTreeMap<String, Vec<SourceBreakpoint>> = BTreeMap::new();
    let mut functions = Vec::new();
    for location in locations {
        match location {
            Location::Line { file, line } => files.entry(file).or_default().push(SourceBreakpoint::new(line)),
            Location::Function { name } => functions.push(FunctionBreakpoint { name, condition: None }),
        }
    }

    let mut infos = Vec::new();
    for (file, requested) in files {
        infos.extend(session.set_breakpoints(&file, requested).await?);
    }
    if !functions.is_empty() {
        infos.extend(session.set_function_breakpoints(functions).await?);
    }

    for info in &infos {
        if json {
            println!("{}", serde_json::to_string(info)?);
        } else {
            print_breakpoint(info);
        }
    }
    Ok(())
}

fn print_breakpoint(info: &BreakpointInfo) {
    if info.verified {
        println!(
            "Breakpoint {} set at {}:{}{}",
            info.id,
            info.source.as_deref().unwrap_or("?"),
            info.line.map(|l| l.to_string()).unwrap_or_else(|| "?".to_string()),
            info.address.as_ref().map(|a| format!(" ({})", a)).unwrap_or_default()
        );
    } else {
        println!(
            "{} {}",
            "Breakpoint not set".yellow(),
            info.message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default()
        );
    }
}

/// Print session events until the session terminates
async fn print_events(mut events: tokio::sync::broadcast::Receiver<SessionEvent>, json: bool) {
    let mut progress = LoadBar::default();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                tracing::warn!(missed = n, "event printer lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if json {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{}", line);
            }
        } else {
            print_event(&event, &mut progress);
        }
        if event == SessionEvent::Terminated {
            break;
        }
    }
    progress.finish();
}

fn print_event(event: &SessionEvent, progress: &mut LoadBar) {
    if let SessionEvent::LoadProgress(update) = event {
        progress.update(update);
        return;
    }
    if let SessionEvent::Output {
        category: OutputCategory::Console,
        output,
    } = event
    {
        if progress.is_current(output) {
            return;
        }
    }
    progress.finish();

    match event {
        SessionEvent::Stopped {
            reason,
            description,
            thread_id,
            ..
        } => {
            let mut line = format!("Stopped: {}", reason);
            if let Some(description) = description.as_deref().filter(|d| *d != reason) {
                line.push_str(&format!(" ({})", description));
            }
            if let Some(thread) = thread_id {
                line.push_str(&format!(", thread {}", thread));
            }
            println!("{}", line.yellow().bold());
        }
        SessionEvent::Continued { .. } => println!("{}", "Running".green()),
        SessionEvent::ThreadStarted { thread_id } => {
            println!("{}", format!("Thread {} started", thread_id).dimmed())
        }
        SessionEvent::ThreadExited { thread_id } => {
            println!("{}", format!("Thread {} exited", thread_id).dimmed())
        }
        SessionEvent::Output { category, output } => match category {
            OutputCategory::Stdout => {
                print!("{}", output);
                let _ = std::io::stdout().flush();
            }
            OutputCategory::Stderr => eprint!("{}", output.red()),
            OutputCategory::Console => println!("{}", output.cyan()),
        },
        SessionEvent::BreakpointRemoved { id } => println!(
            "{}",
            format!("Breakpoint {} removed: address already has a breakpoint", id).yellow()
        ),
        SessionEvent::Terminated => println!("{}", "Debugger exited".dimmed()),
        SessionEvent::LoadProgress(_) => {}
    }
}

/// Progress bar for a program download
#[derive(Default)]
struct LoadBar {
    bar: Option<ProgressBar>,
    /// Console line matching the last update, printed by the bar instead
    current: Option<String>,
}

impl LoadBar {
    fn update(&mut self, update: &LoadProgress) {
        let total = update.total_size.unwrap_or(0);
        let bar = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(total);
            let style = ProgressStyle::default_bar()
                .template("  [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> ");
            bar.set_style(style);
            bar
        });
        if total > 0 {
            bar.set_length(total);
        }
        bar.set_position(update.total_sent);
        bar.set_message(update.section.clone());
        self.current = Some(update.message());
    }

    fn is_current(&self, line: &str) -> bool {
        self.current.as_deref() == Some(line)
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        self.current = None;
    }
}

/// Parse MI lines from stdin and print what they contain
async fn parse(json: bool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut errors = 0usize;

    while let Some(line) = lines.next_line().await? {
        match classify(&line) {
            Ok(Line::Record(record)) => {
                if json {
                    println!("{}", serde_json::to_string(&record)?);
                } else {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
            }
            Ok(Line::Prompt) => {
                if !json {
                    println!("{}", "(gdb)".dimmed());
                }
            }
            Ok(Line::Text(text)) => {
                if json {
                    println!("{}", serde_json::json!({ "type": "text", "text": text }));
                } else {
                    println!("{} {}", "text:".dimmed(), text);
                }
            }
            Err(e) => {
                errors += 1;
                eprintln!("{} {}", "Syntax error:".red().bold(), e.message);
                eprintln!("  {}", e.line);
                eprintln!("  {}^", " ".repeat(e.offset));
            }
        }
    }

    if errors > 0 {
        eprintln!("{}", format!("{} line(s) failed to parse", errors).red());
    }
    Ok(())
}
