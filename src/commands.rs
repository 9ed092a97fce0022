//! CLI command definitions
//!
//! Defines the clap commands for the gdbmi CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Debug a program on a remote target through GDB
    Run {
        /// Program to load and debug
        executable: PathBuf,

        /// GDB executable (default: from config, then `gdb` on PATH)
        #[arg(long)]
        gdb: Option<PathBuf>,

        /// Remote target for `target-select remote` (e.g. localhost:3333)
        #[arg(long)]
        target: Option<String>,

        /// Do not download the program after connecting
        #[arg(long)]
        no_load: bool,

        /// Stay stopped after connecting instead of resuming the target
        #[arg(long)]
        no_continue: bool,

        /// Set initial breakpoint(s) (file:line or function name)
        /// Can be specified multiple times: --break main --break src/main.c:42
        #[arg(long = "break", short = 'b')]
        breakpoints: Vec<String>,

        /// Configuration file to use instead of the default one
        #[arg(long)]
        config: Option<PathBuf>,

        /// Control socket path (default: per-user runtime directory)
        #[arg(long)]
        socket: Option<PathBuf>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Parse GDB/MI output read from stdin
    Parse {
        /// Print one JSON object per record
        #[arg(long)]
        json: bool,
    },

    /// Send a request to a running session's control socket
    Control {
        /// Socket printed by `gdbmi run`
        socket: PathBuf,

        /// Method name (examineMemory, setBreakPointCondition, interrupt,
        /// continue, load, evaluate, status)
        method: String,

        /// Arguments as a JSON array, e.g. '[2147483648, 16]'
        args: Option<String>,
    },
}
