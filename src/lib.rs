//! pydbg - a console client for the pydevd Python debugger
//!
//! The [`session`] module holds the protocol-independent session model:
//! position conversion, breakpoints, suspended threads and the command
//! surface. [`pydevd`] implements the wire protocol on top of it.

pub mod cli;
pub mod commands;
pub mod common;
pub mod pydevd;
pub mod session;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use session::{DebuggerSession, LocalPosition, RemotePosition};
