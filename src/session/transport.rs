//! Transport abstraction over the debuggee connection

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{
    ContentType, DebugValue, ExceptionBreakpoint, LineBreakpoint, StepMode, ThreadInfo,
};
use crate::common::Result;

/// Asynchronous notifications from the debuggee
#[derive(Debug, Clone)]
pub enum DebuggerEvent {
    /// A thread stopped; `report_position` is false for stops the user should not see
    ThreadSuspended {
        thread: ThreadInfo,
        report_position: bool,
    },
    ThreadResumed(ThreadInfo),
    /// A thread exited
    ThreadKilled(String),
    ConsoleOutput {
        text: String,
        content_type: ContentType,
    },
    /// The debuggee is blocked reading stdin
    InputRequested,
    CommunicationError(String),
    Detached,
    Closed,
}

/// Command channel to one debuggee
///
/// One-way commands are queued and return immediately; they are dropped when
/// the connection is down. Request/response commands are async and fail with
/// an error instead.
#[async_trait]
pub trait ProcessDebugger: Send + Sync {
    /// Wait until the debuggee connection is established
    async fn wait_for_connect(&self, timeout: Duration) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Exchange versions; returns the remote version string
    async fn handshake(&self) -> Result<String>;

    /// Let the debuggee start executing once configuration is sent
    fn run(&self);

    async fn close(&self);

    /// Hand the event stream to the session (only the first call returns it)
    fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<DebuggerEvent>>;

    fn set_breakpoint(&self, breakpoint: &LineBreakpoint);

    fn remove_breakpoint(&self, kind: &str, file: &str, line: u32);

    fn set_temp_breakpoint(&self, kind: &str, file: &str, line: u32);

    fn remove_temp_breakpoint(&self, file: &str, line: u32);

    fn add_exception_breakpoint(&self, breakpoint: &ExceptionBreakpoint);

    fn remove_exception_breakpoint(&self, breakpoint: &ExceptionBreakpoint);

    fn resume_or_step(&self, thread_id: &str, mode: StepMode);

    fn suspend_all_threads(&self);

    /// Suspend every running thread except `thread`
    fn suspend_other_threads(&self, thread: &ThreadInfo);

    fn smart_step_into(&self, thread_id: &str, frame_id: &str, function_name: &str);

    fn set_show_return_values(&self, enabled: bool);

    /// Snapshot of all known debuggee threads
    fn threads(&self) -> Vec<ThreadInfo>;

    async fn evaluate(
        &self,
        thread_id: &str,
        frame_id: &str,
        expression: &str,
        execute: bool,
        trim_result: bool,
    ) -> Result<DebugValue>;

    async fn console_exec(
        &self,
        thread_id: &str,
        frame_id: &str,
        expression: &str,
    ) -> Result<DebugValue>;

    async fn load_frame(&self, thread_id: &str, frame_id: &str) -> Result<Vec<DebugValue>>;

    async fn load_variable(
        &self,
        thread_id: &str,
        frame_id: &str,
        variable: &DebugValue,
    ) -> Result<Vec<DebugValue>>;

    async fn change_variable(
        &self,
        thread_id: &str,
        frame_id: &str,
        variable: &DebugValue,
        value: &str,
    ) -> Result<DebugValue>;
}
