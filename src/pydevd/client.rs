//! pydevd client for communicating with a Python debuggee
//!
//! The connection is split into a reader task and a writer task. One-way
//! commands are queued to the writer in issue order; requests additionally
//! park a oneshot waiter keyed by sequence number, which the reader resolves
//! when the matching response arrives. Everything else the reader sees is
//! turned into a [`DebuggerEvent`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::common::{Error, Result};
use crate::session::{
    DebugValue, DebuggerEvent, ExceptionBreakpoint, LineBreakpoint, ProcessDebugger, StepMode,
    StopReason, ThreadInfo, ThreadState,
};

use super::codec::{self, Message};
use super::types::*;

/// Delay between attempts to reach a debuggee that is not listening yet
const CONNECT_RETRY: Duration = Duration::from_millis(200);

/// How the TCP connection is established
enum Endpoint {
    /// Accept one connection from a debuggee started with `--client`
    Listen(TcpListener),
    /// Connect to a debuggee listening with `--server`
    Connect(String),
}

/// State shared between the client and its I/O tasks
struct Shared {
    connected: AtomicBool,
    /// Client sequence numbers are odd
    seq: AtomicU64,
    /// Writer queue; `None` while disconnected
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Requests waiting for a response
    pending: Mutex<HashMap<u64, oneshot::Sender<Message>>>,
    /// Known debuggee threads in creation order
    threads: Mutex<IndexMap<String, ThreadInfo>>,
    /// Kind of each temporary breakpoint, by position
    temp_breakpoints: Mutex<HashMap<(String, u32), String>>,
    event_tx: mpsc::UnboundedSender<DebuggerEvent>,
}

impl Shared {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(2, Ordering::SeqCst)
    }

    /// Queue a raw line; false when the connection is down
    fn send_line(&self, line: String) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        match &*self.outgoing.lock() {
            Some(tx) => tx.send(line).is_ok(),
            None => false,
        }
    }

    /// Returns true for the first caller after a live connection
    fn mark_disconnected(&self) -> bool {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.outgoing.lock().take();
        // Dropping the waiters fails their requests
        self.pending.lock().clear();
        was_connected
    }

    fn emit(&self, event: DebuggerEvent) {
        if self.event_tx.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }

    fn dispatch(&self, message: Message) {
        if let Some(waiter) = self.pending.lock().remove(&message.seq) {
            let _ = waiter.send(message);
            return;
        }

        match message.command {
            CMD_THREAD_CREATE => match parse_threads(&message.payload) {
                Ok(created) => {
                    let mut threads = self.threads.lock();
                    for thread in created {
                        debug!(thread = %thread.id, name = %thread.name, "thread created");
                        threads.insert(thread.id.clone(), thread);
                    }
                }
                Err(e) => warn!(error = %e, "bad thread-create message"),
            },
            CMD_THREAD_SUSPEND => match parse_thread_suspend(&message.payload) {
                Ok(thread) => {
                    let report_position = {
                        let mut threads = self.threads.lock();
                        let others_suspended = threads
                            .values()
                            .any(|t| t.id != thread.id && t.state == ThreadState::Suspended);
                        threads.insert(thread.id.clone(), thread.clone());
                        // Threads stopped to honour suspend-all do not take focus
                        !(thread.stop_reason == StopReason::SuspendRequest && others_suspended)
                    };
                    self.emit(DebuggerEvent::ThreadSuspended {
                        thread,
                        report_position,
                    });
                }
                Err(e) => warn!(error = %e, "bad thread-suspend message"),
            },
            CMD_THREAD_RUN => {
                let (id, _reason) = parse_thread_run(&message.payload);
                let thread = {
                    let mut threads = self.threads.lock();
                    let entry = threads
                        .entry(id.clone())
                        .or_insert_with(|| ThreadInfo::running(id.as_str(), ""));
                    entry.state = ThreadState::Running;
                    entry.frames.clear();
                    entry.message = None;
                    entry.clone()
                };
                self.emit(DebuggerEvent::ThreadResumed(thread));
            }
            CMD_THREAD_KILL => {
                let id = message.payload.trim().to_string();
                self.threads.lock().shift_remove(&id);
                self.emit(DebuggerEvent::ThreadKilled(id));
            }
            CMD_WRITE_TO_CONSOLE => match parse_console_output(&message.payload) {
                Ok((text, content_type)) => {
                    self.emit(DebuggerEvent::ConsoleOutput { text, content_type })
                }
                Err(e) => warn!(error = %e, "bad console message"),
            },
            CMD_INPUT_REQUESTED => self.emit(DebuggerEvent::InputRequested),
            CMD_ERROR => warn!(payload = %message.payload, "debuggee reported an error"),
            other => debug!(
                command = other,
                name = command_name(other),
                "ignoring unsolicited message"
            ),
        }
    }
}

/// pydevd client over TCP
pub struct RemoteDebugger {
    endpoint: Mutex<Option<Endpoint>>,
    local_addr: Option<SocketAddr>,
    shared: Arc<Shared>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<DebuggerEvent>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    request_timeout: Duration,
}

impl RemoteDebugger {
    /// Bind `addr` and wait there for the debuggee to connect
    ///
    /// Port 0 picks a free port; see [`RemoteDebugger::local_addr`].
    pub async fn listen(addr: &str, request_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("cannot listen on {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "waiting for debuggee");
        Ok(Self::new(Endpoint::Listen(listener), Some(local_addr), request_timeout))
    }

    /// Connect to a debuggee listening on `addr`
    pub fn connect_to(addr: impl Into<String>, request_timeout: Duration) -> Self {
        Self::new(Endpoint::Connect(addr.into()), None, request_timeout)
    }

    fn new(endpoint: Endpoint, local_addr: Option<SocketAddr>, request_timeout: Duration) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            endpoint: Mutex::new(Some(endpoint)),
            local_addr,
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                seq: AtomicU64::new(1),
                outgoing: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                threads: Mutex::new(IndexMap::new()),
                temp_breakpoints: Mutex::new(HashMap::new()),
                event_tx,
            }),
            event_rx: Mutex::new(Some(event_rx)),
            reader: Mutex::new(None),
            request_timeout,
        }
    }

    /// Address we listen on, in listen mode
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    async fn open(endpoint: Endpoint) -> Result<TcpStream> {
        match endpoint {
            Endpoint::Listen(listener) => {
                let (stream, peer) = listener.accept().await?;
                info!(%peer, "debuggee connected");
                Ok(stream)
            }
            Endpoint::Connect(addr) => loop {
                match TcpStream::connect(&addr).await {
                    Ok(stream) => {
                        info!(%addr, "connected to debuggee");
                        return Ok(stream);
                    }
                    Err(e) => {
                        trace!(%addr, error = %e, "debuggee not reachable yet");
                        tokio::time::sleep(CONNECT_RETRY).await;
                    }
                }
            },
        }
    }

    fn start_io(&self, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        *self.shared.outgoing.lock() = Some(out_tx);
        self.shared.connected.store(true, Ordering::SeqCst);

        tokio::spawn(write_loop(write_half, out_rx, self.shared.clone()));
        let reader = tokio::spawn(read_loop(BufReader::new(read_half), self.shared.clone()));
        *self.reader.lock() = Some(reader);
    }

    /// Queue a one-way command
    fn send(&self, command: u32, payload: String) {
        let seq = self.shared.next_seq();
        if !self
            .shared
            .send_line(codec::format_message(command, seq, &payload))
        {
            debug!(command = command_name(command), "not connected, dropping command");
        }
    }

    /// Send a command and wait for its response
    async fn request(&self, command: u32, payload: String) -> Result<Message> {
        let seq = self.shared.next_seq();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(seq, tx);

        if !self
            .shared
            .send_line(codec::format_message(command, seq, &payload))
        {
            self.shared.pending.lock().remove(&seq);
            return Err(Error::Disconnected);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(Error::Disconnected),
            Err(_) => {
                self.shared.pending.lock().remove(&seq);
                return Err(Error::Timeout(self.request_timeout.as_secs()));
            }
        };

        if response.command == CMD_ERROR {
            return Err(Error::remote(command_name(command), &response.payload));
        }
        Ok(response)
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
) {
    while let Some(line) = queue.recv().await {
        debug!(">>> {}", line.trim_end());
        if let Err(e) = codec::write_message(&mut writer, &line).await {
            if shared.mark_disconnected() {
                shared.emit(DebuggerEvent::CommunicationError(e.to_string()));
            }
            return;
        }
    }
}

async fn read_loop(mut reader: BufReader<OwnedReadHalf>, shared: Arc<Shared>) {
    loop {
        match codec::read_message(&mut reader).await {
            Ok(Some(message)) => {
                debug!(
                    "<<< {} {} {}",
                    message.command,
                    message.seq,
                    message.payload
                );
                shared.dispatch(message);
            }
            Ok(None) => {
                if shared.mark_disconnected() {
                    info!("debuggee closed the connection");
                    shared.emit(DebuggerEvent::Closed);
                }
                return;
            }
            Err(e) => {
                if shared.mark_disconnected() {
                    warn!(error = %e, "reading from debuggee failed");
                    shared.emit(DebuggerEvent::CommunicationError(e.to_string()));
                }
                return;
            }
        }
    }
}

#[async_trait]
impl ProcessDebugger for RemoteDebugger {
    async fn wait_for_connect(&self, timeout: Duration) -> Result<()> {
        let endpoint = self
            .endpoint
            .lock()
            .take()
            .ok_or_else(|| Error::Internal("debuggee connection already opened".to_string()))?;

        let stream = tokio::time::timeout(timeout, Self::open(endpoint))
            .await
            .map_err(|_| Error::ConnectTimeout(timeout.as_secs()))??;
        stream.set_nodelay(true)?;
        self.start_io(stream);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn handshake(&self) -> Result<String> {
        let response = self.request(CMD_VERSION, version_payload()).await?;
        Ok(response.payload.trim().to_string())
    }

    fn run(&self) {
        self.send(CMD_RUN, String::new());
    }

    async fn close(&self) {
        // Dropping the queue lets the writer flush and exit
        self.shared.mark_disconnected();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.shared.threads.lock().clear();
    }

    fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<DebuggerEvent>> {
        self.event_rx.lock().take()
    }

    fn set_breakpoint(&self, breakpoint: &LineBreakpoint) {
        self.send(CMD_SET_BREAK, set_breakpoint_payload(breakpoint));
    }

    fn remove_breakpoint(&self, kind: &str, file: &str, line: u32) {
        self.send(CMD_REMOVE_BREAK, remove_breakpoint_payload(kind, file, line));
    }

    fn set_temp_breakpoint(&self, kind: &str, file: &str, line: u32) {
        self.shared
            .temp_breakpoints
            .lock()
            .insert((file.to_string(), line), kind.to_string());
        self.send(CMD_SET_BREAK, temp_breakpoint_payload(kind, file, line));
    }

    fn remove_temp_breakpoint(&self, file: &str, line: u32) {
        let kind = self
            .shared
            .temp_breakpoints
            .lock()
            .remove(&(file.to_string(), line));
        match kind {
            Some(kind) => self.send(CMD_REMOVE_BREAK, remove_breakpoint_payload(&kind, file, line)),
            None => trace!(%file, line, "no temporary breakpoint to remove"),
        }
    }

    fn add_exception_breakpoint(&self, breakpoint: &ExceptionBreakpoint) {
        self.send(CMD_ADD_EXCEPTION_BREAK, add_exception_payload(breakpoint));
    }

    fn remove_exception_breakpoint(&self, breakpoint: &ExceptionBreakpoint) {
        self.send(CMD_REMOVE_EXCEPTION_BREAK, remove_exception_payload(breakpoint));
    }

    fn resume_or_step(&self, thread_id: &str, mode: StepMode) {
        self.send(step_command(mode), thread_id.to_string());
    }

    fn suspend_all_threads(&self) {
        self.send(CMD_THREAD_SUSPEND, "*".to_string());
    }

    fn suspend_other_threads(&self, thread: &ThreadInfo) {
        let running: Vec<String> = self
            .shared
            .threads
            .lock()
            .values()
            .filter(|t| t.id != thread.id && t.state == ThreadState::Running)
            .map(|t| t.id.clone())
            .collect();
        for id in running {
            self.send(CMD_THREAD_SUSPEND, id);
        }
    }

    fn smart_step_into(&self, thread_id: &str, frame_id: &str, function_name: &str) {
        self.send(
            CMD_SMART_STEP_INTO,
            smart_step_payload(thread_id, frame_id, function_name),
        );
    }

    fn set_show_return_values(&self, enabled: bool) {
        self.send(CMD_SHOW_RETURN_VALUES, show_return_values_payload(enabled));
    }

    fn threads(&self) -> Vec<ThreadInfo> {
        self.shared.threads.lock().values().cloned().collect()
    }

    async fn evaluate(
        &self,
        thread_id: &str,
        frame_id: &str,
        expression: &str,
        execute: bool,
        trim_result: bool,
    ) -> Result<DebugValue> {
        let command = if execute {
            CMD_EXEC_EXPRESSION
        } else {
            CMD_EVALUATE_EXPRESSION
        };
        let response = self
            .request(
                command,
                evaluate_payload(thread_id, frame_id, expression, trim_result),
            )
            .await?;
        parse_value(&response.payload)
    }

    async fn console_exec(
        &self,
        thread_id: &str,
        frame_id: &str,
        expression: &str,
    ) -> Result<DebugValue> {
        let response = self
            .request(
                CMD_CONSOLE_EXEC,
                console_exec_payload(thread_id, frame_id, expression),
            )
            .await?;
        parse_value(&response.payload)
    }

    async fn load_frame(&self, thread_id: &str, frame_id: &str) -> Result<Vec<DebugValue>> {
        let response = self
            .request(CMD_GET_FRAME, frame_payload(thread_id, frame_id))
            .await?;
        parse_variables(&response.payload, None)
    }

    async fn load_variable(
        &self,
        thread_id: &str,
        frame_id: &str,
        variable: &DebugValue,
    ) -> Result<Vec<DebugValue>> {
        let response = self
            .request(
                CMD_GET_VARIABLE,
                variable_payload(thread_id, frame_id, variable),
            )
            .await?;
        parse_variables(&response.payload, Some(&variable.path()))
    }

    async fn change_variable(
        &self,
        thread_id: &str,
        frame_id: &str,
        variable: &DebugValue,
        value: &str,
    ) -> Result<DebugValue> {
        let response = self
            .request(
                CMD_CHANGE_VARIABLE,
                change_variable_payload(thread_id, frame_id, variable, value),
            )
            .await?;

        // Older back-ends acknowledge without echoing the new value
        let echoed = if response.payload.trim().is_empty() {
            None
        } else {
            parse_variables(&response.payload, variable.parent_path.as_deref())?
                .into_iter()
                .next()
        };
        Ok(echoed.unwrap_or_else(|| DebugValue {
            value: value.to_string(),
            ..variable.clone()
        }))
    }
}
