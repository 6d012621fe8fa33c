//! pydevd protocol implementation
//!
//! This module implements the IDE side of the line-based protocol spoken by
//! the `pydevd` debugger back-end.

pub mod client;
pub mod codec;
pub mod types;

pub use client::RemoteDebugger;
