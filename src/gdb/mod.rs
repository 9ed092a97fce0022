//! GDB backend: correlation, run-state tracking and the objects GDB manages

pub mod breakpoints;
pub mod client;
mod controller;
pub mod process;
pub mod run_state;
pub mod types;
pub mod varobj;

pub use breakpoints::{Breakpoint, BreakpointBackend, BreakpointInfo, BreakpointRegistry, Location};
pub use controller::{BackendOutput, Gdb, OutputSource, Timeouts};
pub use run_state::{RunSnapshot, RunState, RunStateEvent, StopReason, ThreadEvent};
