//! Callbacks into whatever front-end renders the session

use tracing::error;

use super::types::{ContentType, HitBreakpoint, SuspendContext};

/// Front-end notified about stops and output
///
/// Called from the session's event task; implementations must not block.
pub trait DebugHost: Send + Sync {
    /// A thread stopped on a known breakpoint
    ///
    /// Returning `false` rejects the stop and the thread is resumed.
    fn breakpoint_reached(
        &self,
        breakpoint: &HitBreakpoint,
        message: Option<&str>,
        context: &SuspendContext,
    ) -> bool;

    /// A thread stopped for any other reason (step, pause, temporary breakpoint)
    fn position_reached(&self, context: &SuspendContext);

    fn print(&self, text: &str, content_type: ContentType);

    /// Connecting to the debuggee failed
    fn connection_failed(&self, message: &str) {
        error!("{}", message);
    }

    fn input_requested(&self) {}

    /// The session reached its terminal state
    fn session_stopped(&self) {}
}
