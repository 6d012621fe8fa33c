//! Session data model
//!
//! Threads, frames and values are snapshots produced by the transport. The
//! session never mutates them except for consuming a thread's pending message.

use serde::{Deserialize, Serialize};

use super::position::{LocalPosition, RemotePosition};

/// Which threads a breakpoint hit pauses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SuspendPolicy {
    /// Log only, never pause
    None,
    /// Pause the hitting thread
    #[default]
    Thread,
    /// Pause every thread
    All,
}

impl SuspendPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Thread => "THREAD",
            Self::All => "ALL",
        }
    }
}

impl std::str::FromStr for SuspendPolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "thread" => Ok(Self::Thread),
            "all" => Ok(Self::All),
            other => Err(crate::Error::Config(format!("unknown suspend policy '{}'", other))),
        }
    }
}

/// Resume/step modes understood by the debuggee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepMode {
    StepOver,
    StepInto,
    StepIntoMyCode,
    StepOut,
    Resume,
}

impl std::fmt::Display for StepMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StepOver => write!(f, "step over"),
            Self::StepInto => write!(f, "step into"),
            Self::StepIntoMyCode => write!(f, "step into my code"),
            Self::StepOut => write!(f, "step out"),
            Self::Resume => write!(f, "resume"),
        }
    }
}

/// Why a thread stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Breakpoint,
    Exception,
    StepInto,
    StepIntoMyCode,
    StepOver,
    StepReturn,
    SmartStepInto,
    RunToLine,
    SuspendRequest,
    Other(u32),
}

impl StopReason {
    pub fn is_breakpoint(&self) -> bool {
        matches!(self, Self::Breakpoint)
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception)
    }
}

/// Thread run state as last reported by the debuggee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    Running,
    Suspended,
}

/// One stack frame of a suspended thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrameInfo {
    pub thread_id: String,
    pub frame_id: String,
    /// Function name
    pub name: String,
    pub position: RemotePosition,
}

impl StackFrameInfo {
    pub fn key(&self) -> FrameKey {
        FrameKey::new(&self.thread_id, &self.frame_id)
    }
}

/// A debuggee thread
#[derive(Debug, Clone, Serialize)]
pub struct ThreadInfo {
    pub id: String,
    pub name: String,
    pub state: ThreadState,
    /// Innermost frame first
    pub frames: Vec<StackFrameInfo>,
    pub stop_reason: StopReason,
    /// Exception name for exception stops, log output otherwise
    pub message: Option<String>,
}

impl ThreadInfo {
    /// A thread that has just been created and is running
    pub fn running(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: ThreadState::Running,
            frames: Vec::new(),
            stop_reason: StopReason::Other(0),
            message: None,
        }
    }

    pub fn top_frame(&self) -> Option<&StackFrameInfo> {
        self.frames.first()
    }
}

/// A frame-instance: a frame id is only meaningful for one suspension of one thread
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameKey {
    pub thread_id: String,
    pub frame_id: String,
}

impl FrameKey {
    pub fn new(thread_id: &str, frame_id: &str) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            frame_id: frame_id.to_string(),
        }
    }
}

/// A variable or evaluation result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugValue {
    pub name: String,
    pub type_name: String,
    pub value: String,
    pub is_container: bool,
    /// Evaluation failed; `value` holds the error text
    pub is_error: bool,
    /// Tab-separated attribute path of the parent, for nested values
    pub parent_path: Option<String>,
}

impl DebugValue {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value: value.into(),
            is_container: false,
            is_error: false,
            parent_path: None,
        }
    }

    /// Path used to address this value inside its frame
    pub fn path(&self) -> String {
        match &self.parent_path {
            Some(parent) => format!("{}\t{}", parent, self.name),
            None => self.name.clone(),
        }
    }
}

/// The stack shown for the thread in focus
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStack {
    pub thread_id: String,
    pub thread_name: String,
    pub frames: Vec<StackFrameInfo>,
}

/// View of one stop, built on demand from a thread snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SuspendContext {
    pub active_stack: ExecutionStack,
}

impl SuspendContext {
    pub fn new(thread: &ThreadInfo) -> Self {
        Self {
            active_stack: ExecutionStack {
                thread_id: thread.id.clone(),
                thread_name: thread.name.clone(),
                frames: thread.frames.clone(),
            },
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.active_stack.thread_id
    }

    pub fn top_frame(&self) -> Option<&StackFrameInfo> {
        self.active_stack.frames.first()
    }
}

/// Tag for text routed to the host console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    SystemOutput,
    NormalOutput,
    ErrorOutput,
}

/// A breakpoint kind from the deployment's kind table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BreakpointKind {
    /// Type id sent to the debuggee
    pub id: String,
    /// File extensions (without dot) this kind can be placed in
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Whether THREAD/ALL suspend policies are honoured
    #[serde(default)]
    pub supports_thread_suspend: bool,
}

impl BreakpointKind {
    pub fn new(id: &str, extensions: &[&str], supports_thread_suspend: bool) -> Self {
        Self {
            id: id.to_string(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            supports_thread_suspend,
        }
    }

    pub fn can_put_at(&self, position: &LocalPosition) -> bool {
        let file = position.file();
        let ext = file
            .rsplit(['/', '\\', '!'])
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext);
        match ext {
            Some(ext) => self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

/// Closed table of breakpoint kinds, consulted in order
#[derive(Debug, Clone)]
pub struct BreakpointKinds {
    kinds: Vec<BreakpointKind>,
}

impl BreakpointKinds {
    /// Build a table; the first kind is the fallback for positions no kind claims
    pub fn new(kinds: Vec<BreakpointKind>) -> crate::Result<Self> {
        if kinds.is_empty() {
            return Err(crate::Error::Config(
                "at least one breakpoint kind is required".to_string(),
            ));
        }
        Ok(Self { kinds })
    }

    pub fn default_kind(&self) -> &BreakpointKind {
        &self.kinds[0]
    }

    pub fn get(&self, id: &str) -> Option<&BreakpointKind> {
        self.kinds.iter().find(|k| k.id == id)
    }

    /// First kind that can be placed at the position, else the default kind
    pub fn kind_at(&self, position: &LocalPosition) -> &BreakpointKind {
        self.kinds
            .iter()
            .find(|k| k.can_put_at(position))
            .unwrap_or_else(|| self.default_kind())
    }

    /// Unknown kinds are treated as not supporting thread suspension
    pub fn supports_thread_suspend(&self, id: &str) -> bool {
        self.get(id).map(|k| k.supports_thread_suspend).unwrap_or(false)
    }
}

impl Default for BreakpointKinds {
    fn default() -> Self {
        Self {
            kinds: vec![BreakpointKind::new("python-line", &["py", "pyw"], true)],
        }
    }
}

/// A line breakpoint, keyed in the registry by its remote position
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineBreakpoint {
    /// Breakpoint kind id
    pub kind: String,
    pub position: RemotePosition,
    pub condition: Option<String>,
    pub log_expression: Option<String>,
    pub function_name: Option<String>,
    pub suspend_policy: SuspendPolicy,
}

impl LineBreakpoint {
    pub fn new(kind: impl Into<String>, position: RemotePosition) -> Self {
        Self {
            kind: kind.into(),
            position,
            condition: None,
            log_expression: None,
            function_name: None,
            suspend_policy: SuspendPolicy::Thread,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_log_expression(mut self, expression: impl Into<String>) -> Self {
        self.log_expression = Some(expression.into());
        self
    }

    pub fn with_suspend_policy(mut self, policy: SuspendPolicy) -> Self {
        self.suspend_policy = policy;
        self
    }
}

/// An exception breakpoint, keyed by the exception's qualified name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionBreakpoint {
    pub exception: String,
    pub condition: Option<String>,
    pub log_expression: Option<String>,
    /// Stop when the exception terminates the program
    pub notify_on_terminate: bool,
    /// Stop when the exception is first raised
    pub notify_on_raise: bool,
    /// Ignore exceptions raised inside library code
    pub ignore_libraries: bool,
    pub suspend_policy: SuspendPolicy,
}

impl ExceptionBreakpoint {
    pub fn new(exception: impl Into<String>) -> Self {
        Self {
            exception: exception.into(),
            condition: None,
            log_expression: None,
            notify_on_terminate: true,
            notify_on_raise: false,
            ignore_libraries: false,
            suspend_policy: SuspendPolicy::Thread,
        }
    }

    pub fn with_suspend_policy(mut self, policy: SuspendPolicy) -> Self {
        self.suspend_policy = policy;
        self
    }
}

/// The breakpoint a stop was attributed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitBreakpoint {
    Line(LineBreakpoint),
    Exception(ExceptionBreakpoint),
}

impl HitBreakpoint {
    pub fn suspend_policy(&self) -> SuspendPolicy {
        match self {
            Self::Line(bp) => bp.suspend_policy,
            Self::Exception(bp) => bp.suspend_policy,
        }
    }
}

impl std::fmt::Display for HitBreakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Line(bp) => write!(f, "{} at {}", bp.kind, bp.position),
            Self::Exception(bp) => write!(f, "exception {}", bp.exception),
        }
    }
}
