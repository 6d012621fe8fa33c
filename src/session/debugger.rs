//! Debug session state machine
//!
//! Composes the breakpoint registry, the suspended-thread tracker and the
//! transport, and exposes the command surface used by front-ends.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use semver::{Version, VersionReq};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::breakpoints::BreakpointRegistry;
use super::host::DebugHost;
use super::position::{LocalPosition, PositionConverter, RemotePosition};
use super::threads::{SuspendOutcome, SuspendedThread, SuspendedThreadTracker};
use super::transport::{DebuggerEvent, ProcessDebugger};
use super::types::*;
use crate::common::config::Config;
use crate::common::{Error, Result};

/// Debug session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the debuggee to connect and handshake
    Connecting,
    /// Handshake done, configuration being sent
    Connected,
    /// At least one thread is executing and none is tracked as suspended
    Running,
    /// At least one thread is suspended
    Suspended,
    /// The transport dropped without the session being closed
    Disconnected,
    /// Terminal
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Running => write!(f, "running"),
            Self::Suspended => write!(f, "suspended"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Session behaviour switches
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound for connect plus handshake
    pub connect_timeout: Duration,
    /// `step_into` only enters project code
    pub step_into_my_code: bool,
    pub show_return_values: bool,
    /// Remote versions outside this range get a warning banner
    pub expected_version: Option<VersionReq>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(60),
            step_into_my_code: false,
            show_return_values: false,
            expected_version: None,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        let expected_version = match &config.debugger.expected_version {
            Some(req) => Some(
                VersionReq::parse(req)
                    .map_err(|e| Error::Config(format!("invalid expected_version: {}", e)))?,
            ),
            None => None,
        };
        Ok(Self {
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            step_into_my_code: config.debugger.step_into_my_code,
            show_return_values: config.debugger.show_return_values,
            expected_version,
        })
    }
}

/// Settings for a new line breakpoint
#[derive(Debug, Clone, Default)]
pub struct BreakpointOptions {
    /// Kind id; resolved from the file extension when unset
    pub kind: Option<String>,
    pub condition: Option<String>,
    pub log_expression: Option<String>,
    pub suspend_policy: SuspendPolicy,
}

#[derive(Debug, Default)]
struct Selection {
    /// Thread whose context is active
    thread_id: Option<String>,
    /// Frame commands like evaluate run in
    frame: Option<StackFrameInfo>,
}

/// One debuggee attached through a transport
pub struct DebuggerSession {
    options: SessionOptions,
    transport: Arc<dyn ProcessDebugger>,
    host: Arc<dyn DebugHost>,
    converter: PositionConverter,
    registry: Arc<BreakpointRegistry>,
    tracker: SuspendedThreadTracker,
    state: watch::Sender<SessionState>,
    /// Set once a user-initiated stop begins
    closing: AtomicBool,
    show_return_values: AtomicBool,
    selection: Mutex<Selection>,
    /// Fallback frame captured by `show_console`
    console_frame: Mutex<Option<StackFrameInfo>>,
    frame_cache: DashMap<FrameKey, Vec<DebugValue>>,
    /// Bumped whenever cached frames become stale
    cache_generation: AtomicU64,
    /// Last edited value per frame-instance
    overrides: DashMap<FrameKey, DebugValue>,
    /// Debuggee process when we launched it
    debuggee: Mutex<Option<Child>>,
}

impl DebuggerSession {
    pub fn new(
        transport: Arc<dyn ProcessDebugger>,
        host: Arc<dyn DebugHost>,
        converter: PositionConverter,
        kinds: BreakpointKinds,
        options: SessionOptions,
    ) -> Self {
        let registry = Arc::new(BreakpointRegistry::new(transport.clone(), Arc::new(kinds)));
        let tracker = SuspendedThreadTracker::new(registry.clone(), transport.clone(), host.clone());
        let (state, _) = watch::channel(SessionState::Connecting);
        let show_return_values = AtomicBool::new(options.show_return_values);

        Self {
            options,
            transport,
            host,
            converter,
            registry,
            tracker,
            state,
            closing: AtomicBool::new(false),
            show_return_values,
            selection: Mutex::new(Selection::default()),
            console_frame: Mutex::new(None),
            frame_cache: DashMap::new(),
            cache_generation: AtomicU64::new(0),
            overrides: DashMap::new(),
            debuggee: Mutex::new(None),
        }
    }

    /// Take ownership of a launched debuggee so it is killed on failure or stop
    pub fn attach_debuggee(&self, child: Child) {
        *self.debuggee.lock() = Some(child);
    }

    // === Lifecycle ===

    /// Current state, reporting `Disconnected` when the transport dropped underneath
    pub fn state(&self) -> SessionState {
        let state = *self.state.borrow();
        match state {
            SessionState::Connected | SessionState::Running | SessionState::Suspended
                if !self.transport.is_connected() =>
            {
                SessionState::Disconnected
            }
            other => other,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Handshake done and transport up
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Connected | SessionState::Running | SessionState::Suspended
        )
    }

    pub fn is_closed(&self) -> bool {
        *self.state.borrow() == SessionState::Closed
    }

    /// Connect and then pump transport events, on a background task
    pub fn start(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let events = session
                .transport
                .take_event_receiver()
                .ok_or_else(|| Error::Internal("event stream already taken".to_string()))?;
            session.connect().await?;
            session.run_event_loop(events).await;
            Ok(())
        })
    }

    /// Wait for the debuggee, handshake and push configuration
    ///
    /// On failure an owned debuggee is killed and, unless the session is
    /// being stopped, the host is told why.
    pub async fn connect(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        let timeout = self.options.connect_timeout;

        let result = match tokio::time::timeout(timeout, self.establish()).await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectTimeout(timeout.as_secs())),
        };

        if let Err(e) = &result {
            self.kill_debuggee();
            if !self.closing.load(Ordering::SeqCst) {
                warn!(error = %e, "connection failed");
                self.host.connection_failed(&e.to_string());
            }
            self.set_state(SessionState::Closed);
        }
        result
    }

    async fn establish(&self) -> Result<()> {
        self.transport
            .wait_for_connect(self.options.connect_timeout)
            .await?;
        if self.closing.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }

        let version = self.transport.handshake().await?;
        self.check_version(&version);

        self.registry.reregister_all();
        if self.show_return_values.load(Ordering::SeqCst) {
            self.transport.set_show_return_values(true);
        }
        self.set_state(SessionState::Connected);

        self.transport.run();
        self.set_state(SessionState::Running);
        info!(version = %version, "debuggee connected");
        Ok(())
    }

    fn check_version(&self, remote: &str) {
        let version = remote.strip_prefix("PY-").unwrap_or(remote);
        self.host.print(
            &format!("Connected to pydev debugger (build {})\n", version),
            ContentType::SystemOutput,
        );

        let Some(req) = &self.options.expected_version else {
            return;
        };
        match Version::parse(version) {
            Ok(parsed) if !req.matches(&parsed) => {
                warn!(remote = %version, expected = %req, "debugger version mismatch");
                self.host.print(
                    &format!(
                        "Warning: the debugger version {} does not match the expected {}\n",
                        version, req
                    ),
                    ContentType::ErrorOutput,
                );
            }
            Ok(_) => {}
            Err(_) => debug!(remote = %version, "remote version is not semver, skipping check"),
        }
    }

    /// Handle transport events until the session closes
    ///
    /// Also returns when [`DebuggerSession::stop`] closes the session while
    /// no event is pending.
    pub async fn run_event_loop(&self, mut events: mpsc::UnboundedReceiver<DebuggerEvent>) {
        let mut state = self.state.subscribe();
        while !self.is_closed() {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!("event stream ended");
                        self.terminate();
                    }
                },
                _ = state.changed() => {}
            }
        }
    }

    pub async fn handle_event(&self, event: DebuggerEvent) {
        if self.is_closed() {
            return;
        }

        match event {
            DebuggerEvent::ThreadSuspended {
                thread,
                report_position,
            } => {
                match self.tracker.on_thread_suspended(thread, report_position) {
                    SuspendOutcome::BreakpointReached(context)
                    | SuspendOutcome::PositionReached(context) => self.activate(&context),
                    SuspendOutcome::Rejected(context) => {
                        debug!(thread = %context.thread_id(), "stop rejected, resuming");
                        self.drop_frame_caches();
                        if self.is_connected() {
                            self.transport
                                .resume_or_step(context.thread_id(), StepMode::Resume);
                        }
                    }
                    SuspendOutcome::Tracked | SuspendOutcome::AlreadyTracked => {}
                }
                self.set_state(SessionState::Suspended);
            }
            DebuggerEvent::ThreadResumed(thread) => self.forget_thread(&thread.id),
            DebuggerEvent::ThreadKilled(thread_id) => self.forget_thread(&thread_id),
            DebuggerEvent::ConsoleOutput { text, content_type } => {
                self.host.print(&text, content_type)
            }
            DebuggerEvent::InputRequested => self.host.input_requested(),
            DebuggerEvent::CommunicationError(message) => {
                warn!(%message, "communication with debuggee failed");
                self.transport.close().await;
                self.terminate();
            }
            DebuggerEvent::Detached | DebuggerEvent::Closed => {
                info!("debuggee disconnected");
                self.transport.close().await;
                self.terminate();
            }
        }
    }

    /// Close the transport and kill an owned debuggee
    pub async fn stop(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping debug session");
        self.transport.close().await;
        self.kill_debuggee();
        self.terminate();
    }

    fn terminate(&self) {
        let previous = self.state.send_replace(SessionState::Closed);
        self.tracker.clear();
        self.drop_frame_caches();
        *self.selection.lock() = Selection::default();
        *self.console_frame.lock() = None;
        if previous != SessionState::Closed {
            self.host.session_stopped();
        }
    }

    fn set_state(&self, new: SessionState) {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Closed || *state == new {
                false
            } else {
                debug!(from = %state, to = %new, "session state");
                *state = new;
                true
            }
        });
    }

    fn kill_debuggee(&self) {
        if let Some(mut child) = self.debuggee.lock().take() {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "debuggee already exited");
            }
        }
    }

    fn activate(&self, context: &SuspendContext) {
        let mut selection = self.selection.lock();
        selection.thread_id = Some(context.thread_id().to_string());
        selection.frame = context.top_frame().cloned();
    }

    fn forget_thread(&self, thread_id: &str) {
        self.tracker.on_thread_resumed(thread_id);
        {
            let mut selection = self.selection.lock();
            if selection.thread_id.as_deref() == Some(thread_id) {
                *selection = Selection::default();
            }
        }
        self.cache_generation.fetch_add(1, Ordering::SeqCst);
        self.frame_cache.retain(|key, _| key.thread_id != thread_id);
        self.overrides.retain(|key, _| key.thread_id != thread_id);
        if self.tracker.is_empty() {
            self.set_state(SessionState::Running);
        }
    }

    // === Execution control ===

    pub fn step_over(&self) {
        self.pass_to_current_thread(StepMode::StepOver);
    }

    pub fn step_into(&self) {
        if self.options.step_into_my_code {
            self.pass_to_current_thread(StepMode::StepIntoMyCode);
        } else {
            self.pass_to_current_thread(StepMode::StepInto);
        }
    }

    pub fn step_into_my_code(&self) {
        self.pass_to_current_thread(StepMode::StepIntoMyCode);
    }

    pub fn step_out(&self) {
        self.pass_to_current_thread(StepMode::StepOut);
    }

    /// Step into the call of `function_name` on the current line
    pub fn step_into_specific_function(&self, function_name: &str) {
        self.drop_frame_caches();
        if !self.is_connected() {
            return;
        }
        let Some(thread_id) = self.target_thread() else {
            debug!("smart step into: no suspended thread");
            return;
        };

        let selected = self.selection.lock().frame.clone();
        let frame = selected
            .filter(|f| f.thread_id == thread_id)
            .or_else(|| {
                self.tracker
                    .get(&thread_id)
                    .and_then(|s| s.thread.top_frame().cloned())
            });
        let Some(frame) = frame else {
            debug!(thread = %thread_id, "smart step into: thread has no frames");
            return;
        };

        self.selection.lock().frame = None;
        self.transport
            .smart_step_into(&thread_id, &frame.frame_id, function_name);
    }

    /// Resume the current thread, or every suspended thread after a suspend-all stop
    pub fn resume_current_thread(&self) {
        self.drop_frame_caches();
        if !self.is_connected() {
            return;
        }
        if self.tracker.is_any_thread_stopped_under_suspend_all_policy() {
            self.selection.lock().frame = None;
            for thread_id in self.tracker.thread_ids() {
                self.transport.resume_or_step(&thread_id, StepMode::Resume);
            }
        } else {
            self.pass_to_current_thread(StepMode::Resume);
        }
    }

    pub fn resume_all_threads(&self) {
        self.drop_frame_caches();
        if !self.is_connected() {
            return;
        }
        self.selection.lock().frame = None;
        for thread in self.transport.threads() {
            if thread.state == ThreadState::Suspended {
                self.transport.resume_or_step(&thread.id, StepMode::Resume);
            }
        }
    }

    pub fn pause_all(&self) {
        self.drop_frame_caches();
        if self.is_connected() {
            self.transport.suspend_all_threads();
        }
    }

    /// Run until `position` via a temporary breakpoint
    pub fn run_to_position(&self, position: &LocalPosition) {
        self.drop_frame_caches();
        if !self.is_connected() {
            return;
        }
        let kind = self.registry.kinds().kind_at(position).id.clone();
        let remote = self.converter.to_remote(position);
        debug!(kind = %kind, position = %remote, "run to position");
        self.registry
            .add_temporary_breakpoint(&kind, remote.file(), remote.line());
        self.pass_to_current_thread(StepMode::Resume);
    }

    fn pass_to_current_thread(&self, mode: StepMode) {
        self.drop_frame_caches();
        if !self.is_connected() {
            debug!(%mode, "not connected, ignoring");
            return;
        }
        let Some(thread_id) = self.target_thread() else {
            debug!(%mode, "no suspended thread");
            return;
        };
        self.selection.lock().frame = None;
        self.transport.resume_or_step(&thread_id, mode);
    }

    fn target_thread(&self) -> Option<String> {
        let active = self.selection.lock().thread_id.clone();
        self.tracker.target_thread(active.as_deref())
    }

    fn drop_frame_caches(&self) {
        self.cache_generation.fetch_add(1, Ordering::SeqCst);
        self.frame_cache.clear();
        self.overrides.clear();
    }

    // === Frames and values ===

    /// Frame that evaluation runs in
    ///
    /// The selected frame, else the frame captured by `show_console`.
    pub fn current_frame(&self) -> Result<StackFrameInfo> {
        if !self.is_connected() {
            return Err(Error::Disconnected);
        }
        if let Some(frame) = self.selection.lock().frame.clone() {
            return Ok(frame);
        }
        self.console_frame
            .lock()
            .clone()
            .ok_or(Error::NoCurrentFrame)
    }

    pub fn select_frame(&self, thread_id: &str, frame_id: &str) -> Result<StackFrameInfo> {
        let suspended = self
            .tracker
            .get(thread_id)
            .ok_or_else(|| Error::ThreadNotFound(thread_id.to_string()))?;
        let frame = suspended
            .thread
            .frames
            .iter()
            .find(|f| f.frame_id == frame_id)
            .cloned()
            .ok_or_else(|| Error::FrameNotFound {
                thread: thread_id.to_string(),
                frame: frame_id.to_string(),
            })?;

        let mut selection = self.selection.lock();
        selection.thread_id = Some(thread_id.to_string());
        selection.frame = Some(frame.clone());
        Ok(frame)
    }

    /// Remember the selected frame as the console's evaluation context
    pub fn show_console(&self) -> Option<StackFrameInfo> {
        let frame = self.selection.lock().frame.clone();
        if frame.is_some() {
            *self.console_frame.lock() = frame.clone();
        }
        frame
    }

    pub async fn evaluate(
        &self,
        expression: &str,
        execute: bool,
        trim_result: bool,
    ) -> Result<DebugValue> {
        let frame = self.current_frame()?;
        self.transport
            .evaluate(
                &frame.thread_id,
                &frame.frame_id,
                expression,
                execute,
                trim_result,
            )
            .await
    }

    pub async fn console_exec(&self, expression: &str) -> Result<DebugValue> {
        let frame = self.current_frame()?;
        self.transport
            .console_exec(&frame.thread_id, &frame.frame_id, expression)
            .await
    }

    /// Variables of the current frame, cached per frame-instance
    pub async fn load_frame(&self) -> Result<Vec<DebugValue>> {
        let generation = self.cache_generation.load(Ordering::SeqCst);
        let frame = self.current_frame()?;
        let key = frame.key();

        let cached = self.frame_cache.get(&key).map(|v| v.value().clone());
        let mut values = match cached {
            Some(values) => values,
            None => {
                let values = self
                    .transport
                    .load_frame(&frame.thread_id, &frame.frame_id)
                    .await?;
                self.frame_cache.insert(key.clone(), values.clone());
                // A step or resume during the fetch made these values stale
                if self.cache_generation.load(Ordering::SeqCst) != generation {
                    self.frame_cache.remove(&key);
                }
                values
            }
        };

        if let Some(changed) = self.overrides.get(&key) {
            for value in values.iter_mut().filter(|v| v.name == changed.name) {
                *value = changed.value().clone();
            }
        }
        Ok(values)
    }

    pub async fn load_variable(&self, variable: &DebugValue) -> Result<Vec<DebugValue>> {
        let frame = self.current_frame()?;
        self.transport
            .load_variable(&frame.thread_id, &frame.frame_id, variable)
            .await
    }

    /// Set a variable; the new value shadows the cached frame until the next reload
    pub async fn change_variable(&self, variable: &DebugValue, value: &str) -> Result<DebugValue> {
        let frame = self.current_frame()?;
        let changed = self
            .transport
            .change_variable(&frame.thread_id, &frame.frame_id, variable, value)
            .await?;
        self.overrides.insert(frame.key(), changed.clone());
        Ok(changed)
    }

    pub fn set_show_return_values(&self, enabled: bool) {
        self.show_return_values.store(enabled, Ordering::SeqCst);
        if self.is_connected() {
            self.transport.set_show_return_values(enabled);
        }
    }

    // === Breakpoints ===

    /// Register a breakpoint at a local position; `None` once the session is closed
    pub fn add_line_breakpoint(
        &self,
        position: &LocalPosition,
        options: BreakpointOptions,
    ) -> Option<LineBreakpoint> {
        if self.is_closed() {
            return None;
        }
        let kind = options
            .kind
            .unwrap_or_else(|| self.registry.kinds().kind_at(position).id.clone());
        let breakpoint = LineBreakpoint {
            kind,
            position: self.converter.to_remote(position),
            condition: options.condition,
            log_expression: options.log_expression,
            function_name: self.converter.enclosing_function(position),
            suspend_policy: options.suspend_policy,
        };
        debug!(position = %breakpoint.position, "add line breakpoint");
        self.registry.add_line_breakpoint(breakpoint.clone());
        Some(breakpoint)
    }

    pub fn remove_line_breakpoint(&self, position: &LocalPosition) -> Option<LineBreakpoint> {
        if self.is_closed() {
            return None;
        }
        self.registry
            .remove_line_breakpoint(&self.converter.to_remote(position))
    }

    pub fn add_exception_breakpoint(&self, breakpoint: ExceptionBreakpoint) {
        if !self.is_closed() {
            self.registry.add_exception_breakpoint(breakpoint);
        }
    }

    pub fn remove_exception_breakpoint(&self, exception: &str) -> Option<ExceptionBreakpoint> {
        if self.is_closed() {
            return None;
        }
        self.registry.remove_exception_breakpoint(exception)
    }

    pub fn line_breakpoints(&self) -> Vec<LineBreakpoint> {
        self.registry.line_breakpoints()
    }

    pub fn exception_breakpoints(&self) -> Vec<ExceptionBreakpoint> {
        self.registry.exception_breakpoints()
    }

    // === Queries ===

    pub fn threads(&self) -> Vec<ThreadInfo> {
        self.transport.threads()
    }

    pub fn suspended_threads(&self) -> Vec<SuspendedThread> {
        self.tracker.suspended_threads()
    }

    pub fn is_any_thread_stopped_under_suspend_all_policy(&self) -> bool {
        self.tracker.is_any_thread_stopped_under_suspend_all_policy()
    }

    /// Map a debuggee position to the local file, if one backs it
    pub fn local_position(&self, position: &RemotePosition) -> Option<LocalPosition> {
        self.converter.to_local(position)
    }

    pub fn to_remote(&self, position: &LocalPosition) -> RemotePosition {
        self.converter.to_remote(position)
    }
}
