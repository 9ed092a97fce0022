//! Out-of-band control channel for a running session
//!
//! Uses Unix domain sockets on Unix/macOS and named pipes on Windows
//! via the interprocess crate.

pub mod client;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::ControlClient;
pub use protocol::ControlRequest;
pub use server::ControlServer;
