//! gdbmi CLI - run GDB/MI debug sessions from the terminal

use clap::Parser;
use colored::Colorize;
use commands::Commands;
use gdbmi::common::logging;
use gdbmi::{cli, commands};

#[derive(Parser)]
#[command(name = "gdbmi", about = "GDB/MI protocol engine and remote debugging CLI")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Sessions log to a file; stderr stays readable for program output
    let _guard = match cli.command {
        Commands::Run { .. } => {
            let (path, guard) = logging::init_session();
            if let Some(path) = path {
                tracing::info!(log = %path.display(), "session log");
            }
            guard
        }
        _ => {
            logging::init_cli();
            None
        }
    };

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("{} {e}", "Error:".red().bold());
        std::process::exit(1);
    }
}
