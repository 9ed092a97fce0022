//! gdbmi - GDB/MI protocol engine
//!
//! Drives GDB through its machine interface: parses the MI2 output grammar,
//! correlates commands with their results, tracks whether the target runs,
//! and keeps breakpoints and variable objects in sync for a debug front-end.

pub mod cli;
pub mod commands;
pub mod common;
pub mod gdb;
pub mod ipc;
pub mod mi;
pub mod session;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use gdb::Gdb;
pub use session::{DebugSession, SessionEvent, SessionState};
