//! Recording doubles for unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use super::host::DebugHost;
use super::transport::{DebuggerEvent, ProcessDebugger};
use super::types::*;
use crate::common::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetBreakpoint {
        kind: String,
        file: String,
        line: u32,
        policy: SuspendPolicy,
    },
    RemoveBreakpoint {
        kind: String,
        file: String,
        line: u32,
    },
    SetTemp {
        kind: String,
        file: String,
        line: u32,
    },
    RemoveTemp {
        file: String,
        line: u32,
    },
    AddException(String),
    RemoveException(String),
    ResumeOrStep(String, StepMode),
    SuspendAll,
    SuspendOthers(String),
    SmartStepInto {
        thread: String,
        frame: String,
        function: String,
    },
    ShowReturnValues(bool),
    Run,
    Evaluate {
        thread: String,
        frame: String,
        expression: String,
    },
}

impl Call {
    pub fn set_breakpoint(kind: &str, file: &str, line: u32, policy: SuspendPolicy) -> Self {
        Call::SetBreakpoint {
            kind: kind.into(),
            file: file.into(),
            line,
            policy,
        }
    }
}

pub struct RecordingTransport {
    connected: AtomicBool,
    calls: Mutex<Vec<Call>>,
    threads: Mutex<Vec<ThreadInfo>>,
    frame: Mutex<Vec<DebugValue>>,
    pub frame_loads: AtomicUsize,
    frame_gate: Mutex<Option<Arc<Notify>>>,
    event_tx: mpsc::UnboundedSender<DebuggerEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<DebuggerEvent>>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            connected: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
            frame: Mutex::new(Vec::new()),
            frame_loads: AtomicUsize::new(0),
            frame_gate: Mutex::new(None),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn set_threads(&self, threads: Vec<ThreadInfo>) {
        *self.threads.lock() = threads;
    }

    pub fn set_frame(&self, values: Vec<DebugValue>) {
        *self.frame.lock() = values;
    }

    /// Make `load_frame` wait until the returned gate is notified
    pub fn hold_frame_loads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.frame_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn emit(&self, event: DebuggerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ProcessDebugger for RecordingTransport {
    async fn wait_for_connect(&self, _timeout: Duration) -> Result<()> {
        self.set_connected(true);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn handshake(&self) -> Result<String> {
        Ok("PY-1.0.0".to_string())
    }

    fn run(&self) {
        self.record(Call::Run);
    }

    async fn close(&self) {
        self.set_connected(false);
    }

    fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<DebuggerEvent>> {
        self.event_rx.lock().take()
    }

    fn set_breakpoint(&self, bp: &LineBreakpoint) {
        self.record(Call::set_breakpoint(
            &bp.kind,
            bp.position.file(),
            bp.position.line(),
            bp.suspend_policy,
        ));
    }

    fn remove_breakpoint(&self, kind: &str, file: &str, line: u32) {
        self.record(Call::RemoveBreakpoint {
            kind: kind.into(),
            file: file.into(),
            line,
        });
    }

    fn set_temp_breakpoint(&self, kind: &str, file: &str, line: u32) {
        self.record(Call::SetTemp {
            kind: kind.into(),
            file: file.into(),
            line,
        });
    }

    fn remove_temp_breakpoint(&self, file: &str, line: u32) {
        self.record(Call::RemoveTemp {
            file: file.into(),
            line,
        });
    }

    fn add_exception_breakpoint(&self, bp: &ExceptionBreakpoint) {
        self.record(Call::AddException(bp.exception.clone()));
    }

    fn remove_exception_breakpoint(&self, bp: &ExceptionBreakpoint) {
        self.record(Call::RemoveException(bp.exception.clone()));
    }

    fn resume_or_step(&self, thread_id: &str, mode: StepMode) {
        self.record(Call::ResumeOrStep(thread_id.into(), mode));
    }

    fn suspend_all_threads(&self) {
        self.record(Call::SuspendAll);
    }

    fn suspend_other_threads(&self, thread: &ThreadInfo) {
        self.record(Call::SuspendOthers(thread.id.clone()));
    }

    fn smart_step_into(&self, thread_id: &str, frame_id: &str, function_name: &str) {
        self.record(Call::SmartStepInto {
            thread: thread_id.into(),
            frame: frame_id.into(),
            function: function_name.into(),
        });
    }

    fn set_show_return_values(&self, enabled: bool) {
        self.record(Call::ShowReturnValues(enabled));
    }

    fn threads(&self) -> Vec<ThreadInfo> {
        self.threads.lock().clone()
    }

    async fn evaluate(
        &self,
        thread_id: &str,
        frame_id: &str,
        expression: &str,
        _execute: bool,
        _trim_result: bool,
    ) -> Result<DebugValue> {
        self.record(Call::Evaluate {
            thread: thread_id.into(),
            frame: frame_id.into(),
            expression: expression.into(),
        });
        Ok(DebugValue::new(expression, "int", "2"))
    }

    async fn console_exec(&self, thread_id: &str, frame_id: &str, expression: &str) -> Result<DebugValue> {
        self.evaluate(thread_id, frame_id, expression, true, false).await
    }

    async fn load_frame(&self, _thread_id: &str, _frame_id: &str) -> Result<Vec<DebugValue>> {
        self.frame_loads.fetch_add(1, Ordering::SeqCst);
        let gate = self.frame_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.frame.lock().clone())
    }

    async fn load_variable(
        &self,
        _thread_id: &str,
        _frame_id: &str,
        variable: &DebugValue,
    ) -> Result<Vec<DebugValue>> {
        let mut child = DebugValue::new("0", "int", "1");
        child.parent_path = Some(variable.path());
        Ok(vec![child])
    }

    async fn change_variable(
        &self,
        _thread_id: &str,
        _frame_id: &str,
        variable: &DebugValue,
        value: &str,
    ) -> Result<DebugValue> {
        if value.is_empty() {
            return Err(Error::remote("change variable", "empty value"));
        }
        let mut changed = variable.clone();
        changed.value = value.to_string();
        Ok(changed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    BreakpointReached {
        breakpoint: HitBreakpoint,
        message: Option<String>,
        thread: String,
    },
    PositionReached(String),
    Print(String),
    ConnectionFailed(String),
    InputRequested,
    Stopped,
}

pub struct RecordingHost {
    events: Mutex<Vec<HostEvent>>,
    accept: AtomicBool,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            accept: AtomicBool::new(true),
        })
    }

    /// Make `breakpoint_reached` reject stops
    pub fn reject_stops(&self) {
        self.accept.store(false, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().clone()
    }
}

impl DebugHost for RecordingHost {
    fn breakpoint_reached(
        &self,
        breakpoint: &HitBreakpoint,
        message: Option<&str>,
        context: &SuspendContext,
    ) -> bool {
        self.events.lock().push(HostEvent::BreakpointReached {
            breakpoint: breakpoint.clone(),
            message: message.map(str::to_string),
            thread: context.thread_id().to_string(),
        });
        self.accept.load(Ordering::SeqCst)
    }

    fn position_reached(&self, context: &SuspendContext) {
        self.events
            .lock()
            .push(HostEvent::PositionReached(context.thread_id().to_string()));
    }

    fn print(&self, text: &str, _content_type: ContentType) {
        self.events.lock().push(HostEvent::Print(text.to_string()));
    }

    fn connection_failed(&self, message: &str) {
        self.events
            .lock()
            .push(HostEvent::ConnectionFailed(message.to_string()));
    }

    fn input_requested(&self) {
        self.events.lock().push(HostEvent::InputRequested);
    }

    fn session_stopped(&self) {
        self.events.lock().push(HostEvent::Stopped);
    }
}

/// A suspended thread with one frame per `(file, line)`
pub fn suspended_thread(id: &str, reason: StopReason, frames: &[(&str, u32)]) -> ThreadInfo {
    ThreadInfo {
        id: id.to_string(),
        name: format!("Thread-{}", id),
        state: ThreadState::Suspended,
        frames: frames
            .iter()
            .enumerate()
            .map(|(i, (file, line))| StackFrameInfo {
                thread_id: id.to_string(),
                frame_id: format!("{}", i + 1),
                name: "<module>".to_string(),
                position: crate::session::RemotePosition::new(*file, *line),
            })
            .collect(),
        stop_reason: reason,
        message: None,
    }
}
