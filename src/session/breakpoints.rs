//! Line and exception breakpoint registry
//!
//! The registry is the source of truth for breakpoints. The debuggee's copy
//! is rebuilt from it whenever a connection is established.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

use super::position::RemotePosition;
use super::transport::ProcessDebugger;
use super::types::{
    BreakpointKinds, ExceptionBreakpoint, HitBreakpoint, LineBreakpoint, SuspendPolicy,
};

pub struct BreakpointRegistry {
    transport: Arc<dyn ProcessDebugger>,
    kinds: Arc<BreakpointKinds>,
    line: RwLock<IndexMap<RemotePosition, LineBreakpoint>>,
    exception: RwLock<IndexMap<String, ExceptionBreakpoint>>,
}

impl BreakpointRegistry {
    pub fn new(transport: Arc<dyn ProcessDebugger>, kinds: Arc<BreakpointKinds>) -> Self {
        Self {
            transport,
            kinds,
            line: RwLock::new(IndexMap::new()),
            exception: RwLock::new(IndexMap::new()),
        }
    }

    pub fn kinds(&self) -> &BreakpointKinds {
        &self.kinds
    }

    /// Store a line breakpoint, replacing any at the same position
    pub fn add_line_breakpoint(&self, breakpoint: LineBreakpoint) {
        self.line
            .write()
            .insert(breakpoint.position.clone(), breakpoint.clone());
        if self.transport.is_connected() {
            self.send_line_breakpoint(&breakpoint);
        }
    }

    pub fn remove_line_breakpoint(&self, position: &RemotePosition) -> Option<LineBreakpoint> {
        let removed = self.line.write().shift_remove(position);
        if let Some(bp) = &removed {
            if self.transport.is_connected() {
                self.transport
                    .remove_breakpoint(&bp.kind, bp.position.file(), bp.position.line());
            }
        }
        removed
    }

    /// One-shot breakpoint for run-to-position; never stored
    pub fn add_temporary_breakpoint(&self, kind: &str, file: &str, line: u32) {
        if self.transport.is_connected() {
            self.transport.set_temp_breakpoint(kind, file, line);
        }
    }

    pub fn add_exception_breakpoint(&self, breakpoint: ExceptionBreakpoint) {
        self.exception
            .write()
            .insert(breakpoint.exception.clone(), breakpoint.clone());
        if self.transport.is_connected() {
            self.transport.add_exception_breakpoint(&breakpoint);
        }
    }

    pub fn remove_exception_breakpoint(&self, exception: &str) -> Option<ExceptionBreakpoint> {
        let removed = self.exception.write().shift_remove(exception);
        if let Some(bp) = &removed {
            if self.transport.is_connected() {
                self.transport.remove_exception_breakpoint(bp);
            }
        }
        removed
    }

    /// Re-send every breakpoint, clearing each first so the debuggee never holds duplicates
    pub fn reregister_all(&self) {
        if !self.transport.is_connected() {
            return;
        }

        let lines = self.line_breakpoints();
        let exceptions = self.exception_breakpoints();
        debug!(
            lines = lines.len(),
            exceptions = exceptions.len(),
            "re-registering breakpoints"
        );

        for bp in &lines {
            self.transport
                .remove_breakpoint(&bp.kind, bp.position.file(), bp.position.line());
            self.send_line_breakpoint(bp);
        }
        for bp in &exceptions {
            self.transport.remove_exception_breakpoint(bp);
            self.transport.add_exception_breakpoint(bp);
        }
    }

    pub fn line_breakpoint_at(&self, position: &RemotePosition) -> Option<LineBreakpoint> {
        self.line.read().get(position).cloned()
    }

    pub fn exception_breakpoint(&self, exception: &str) -> Option<ExceptionBreakpoint> {
        self.exception.read().get(exception).cloned()
    }

    pub fn line_breakpoints(&self) -> Vec<LineBreakpoint> {
        self.line.read().values().cloned().collect()
    }

    pub fn exception_breakpoints(&self) -> Vec<ExceptionBreakpoint> {
        self.exception.read().values().cloned().collect()
    }

    /// Exception breakpoints always honour their policy
    pub fn supports_thread_suspend(&self, hit: &HitBreakpoint) -> bool {
        match hit {
            HitBreakpoint::Line(bp) => self.kinds.supports_thread_suspend(&bp.kind),
            HitBreakpoint::Exception(_) => true,
        }
    }

    /// Policy sent to the debuggee; NONE for kinds that cannot suspend threads
    pub fn effective_policy(&self, breakpoint: &LineBreakpoint) -> SuspendPolicy {
        if self.kinds.supports_thread_suspend(&breakpoint.kind) {
            breakpoint.suspend_policy
        } else {
            SuspendPolicy::None
        }
    }

    fn send_line_breakpoint(&self, breakpoint: &LineBreakpoint) {
        let policy = self.effective_policy(breakpoint);
        if policy == breakpoint.suspend_policy {
            self.transport.set_breakpoint(breakpoint);
        } else {
            let demoted = breakpoint.clone().with_suspend_policy(policy);
            self.transport.set_breakpoint(&demoted);
        }
    }
}
