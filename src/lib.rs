//! Language server that resolves compiler invocations from compilation databases.
//!
//! The crate is split into three layers:
//! - `protocol`: JSON-RPC envelope, method registry and the built-in message set
//! - `transport`: framed duplex connection with request correlation and cancellation
//! - `build_system`: per-file build settings resolution (compilation database backend)
//!
//! `lsp` wires these together into a server that forwards resolved settings to an
//! external analysis engine.

pub mod build_system;
pub mod config;
pub mod log;
pub mod lsp;
pub mod protocol;
pub mod transport;
