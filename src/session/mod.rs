//! Debugger session core
//!
//! Transport-independent logic: position mapping, breakpoint bookkeeping,
//! suspended-thread tracking and the session that ties them together.

mod breakpoints;
mod debugger;
mod host;
mod position;
mod threads;
mod transport;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use breakpoints::BreakpointRegistry;
pub use debugger::{BreakpointOptions, DebuggerSession, SessionOptions, SessionState};
pub use host::DebugHost;
pub use position::{LocalPosition, PositionConverter, RemotePosition, CASE_INSENSITIVE_FS};
pub use threads::{SuspendOutcome, SuspendedThread, SuspendedThreadTracker};
pub use transport::{DebuggerEvent, ProcessDebugger};
pub use types::*;
