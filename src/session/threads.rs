//! Suspended-thread tracking and breakpoint attribution

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use super::breakpoints::BreakpointRegistry;
use super::host::DebugHost;
use super::transport::ProcessDebugger;
use super::types::{HitBreakpoint, SuspendContext, SuspendPolicy, ThreadInfo, ThreadState};

/// A tracked thread and the breakpoint its stop was attributed to
#[derive(Debug, Clone)]
pub struct SuspendedThread {
    pub thread: ThreadInfo,
    pub hit: Option<HitBreakpoint>,
    /// The hit pauses every thread
    pub suspends_all: bool,
}

/// What handling a suspend event amounted to
#[derive(Debug)]
pub enum SuspendOutcome {
    /// Duplicate delivery for a thread already tracked
    AlreadyTracked,
    /// Tracked but nothing reported
    Tracked,
    PositionReached(SuspendContext),
    BreakpointReached(SuspendContext),
    /// The host declined the stop; the caller must resume the thread
    Rejected(SuspendContext),
}

pub struct SuspendedThreadTracker {
    registry: Arc<BreakpointRegistry>,
    transport: Arc<dyn ProcessDebugger>,
    host: Arc<dyn DebugHost>,
    suspended: Mutex<IndexMap<String, SuspendedThread>>,
}

impl SuspendedThreadTracker {
    pub fn new(
        registry: Arc<BreakpointRegistry>,
        transport: Arc<dyn ProcessDebugger>,
        host: Arc<dyn DebugHost>,
    ) -> Self {
        Self {
            registry,
            transport,
            host,
            suspended: Mutex::new(IndexMap::new()),
        }
    }

    pub fn on_thread_suspended(&self, mut thread: ThreadInfo, report_position: bool) -> SuspendOutcome {
        {
            let mut suspended = self.suspended.lock();
            if suspended.contains_key(&thread.id) {
                return SuspendOutcome::AlreadyTracked;
            }
            suspended.insert(
                thread.id.clone(),
                SuspendedThread {
                    thread: thread.clone(),
                    hit: None,
                    suspends_all: false,
                },
            );
        }

        if thread.frames.is_empty() {
            debug!(thread = %thread.id, "suspended without frames");
            return SuspendOutcome::Tracked;
        }

        let message = thread.message.take();
        let hit = self.resolve_hit(&thread, message.as_deref());
        let suspends_all = hit
            .as_ref()
            .map(|h| h.suspend_policy() == SuspendPolicy::All && self.registry.supports_thread_suspend(h))
            .unwrap_or(false);

        if let Some(entry) = self.suspended.lock().get_mut(&thread.id) {
            entry.thread = thread.clone();
            entry.hit = hit.clone();
            entry.suspends_all = suspends_all;
        }

        if suspends_all {
            debug!(thread = %thread.id, "suspend-all breakpoint hit");
            self.transport.suspend_other_threads(&thread);
        }

        if !report_position {
            return SuspendOutcome::Tracked;
        }

        let context = SuspendContext::new(&thread);
        match hit {
            Some(hit) => {
                if self.host.breakpoint_reached(&hit, message.as_deref(), &context) {
                    SuspendOutcome::BreakpointReached(context)
                } else {
                    SuspendOutcome::Rejected(context)
                }
            }
            None => {
                self.host.position_reached(&context);
                SuspendOutcome::PositionReached(context)
            }
        }
    }

    /// Untrack a thread; returns whether it was tracked
    pub fn on_thread_resumed(&self, thread_id: &str) -> bool {
        self.suspended.lock().shift_remove(thread_id).is_some()
    }

    pub fn is_any_thread_stopped_under_suspend_all_policy(&self) -> bool {
        self.suspended
            .lock()
            .values()
            .any(|s| s.thread.state == ThreadState::Suspended && s.suspends_all)
    }

    /// The active thread if tracked, else the first tracked thread when nothing is active
    pub fn target_thread(&self, active: Option<&str>) -> Option<String> {
        let suspended = self.suspended.lock();
        match active {
            Some(id) => suspended.get(id).map(|s| s.thread.id.clone()),
            None => suspended.keys().next().cloned(),
        }
    }

    pub fn get(&self, thread_id: &str) -> Option<SuspendedThread> {
        self.suspended.lock().get(thread_id).cloned()
    }

    pub fn suspended_threads(&self) -> Vec<SuspendedThread> {
        self.suspended.lock().values().cloned().collect()
    }

    pub fn thread_ids(&self) -> Vec<String> {
        self.suspended.lock().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.suspended.lock().is_empty()
    }

    pub fn clear(&self) {
        self.suspended.lock().clear();
    }

    fn resolve_hit(&self, thread: &ThreadInfo, message: Option<&str>) -> Option<HitBreakpoint> {
        if thread.stop_reason.is_breakpoint() {
            let top = thread.top_frame()?;
            match self.registry.line_breakpoint_at(&top.position) {
                Some(bp) => Some(HitBreakpoint::Line(bp)),
                None => {
                    // Not ours, so a run-to-position breakpoint
                    self.transport
                        .remove_temp_breakpoint(top.position.file(), top.position.line());
                    None
                }
            }
        } else if thread.stop_reason.is_exception() {
            let name = message?;
            self.registry
                .exception_breakpoint(name)
                .map(HitBreakpoint::Exception)
        } else {
            None
        }
    }
}
