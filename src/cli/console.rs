//! Terminal front-end for a debug session

use colored::Colorize;
use serde::Serialize;

use crate::session::{
    ContentType, DebugHost, HitBreakpoint, StackFrameInfo, SuspendContext,
};

/// Print one JSON document per line
pub(super) fn print_json(value: &impl Serialize) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::warn!(error = %e, "cannot serialize output"),
    }
}

/// Session notifications in `--json` mode
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Notification<'a> {
    Breakpoint {
        thread: &'a str,
        breakpoint: String,
        message: Option<&'a str>,
        frame: Option<&'a StackFrameInfo>,
    },
    Stopped {
        thread: &'a str,
        frame: Option<&'a StackFrameInfo>,
    },
    Output {
        stream: &'static str,
        text: &'a str,
    },
    ConnectionFailed {
        message: &'a str,
    },
    InputRequested,
    Finished,
}

/// Renders session notifications on the terminal
#[derive(Debug, Default)]
pub struct ConsoleHost {
    json: bool,
}

impl ConsoleHost {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Output for a failed connection
    ///
    /// Text mode prints nothing here: the error is returned from the command
    /// and printed once on exit.
    fn connection_failed_line(&self, message: &str) -> Option<String> {
        if !self.json {
            return None;
        }
        match serde_json::to_string(&Notification::ConnectionFailed { message }) {
            Ok(line) => Some(line),
            Err(e) => {
                tracing::warn!(error = %e, "cannot serialize output");
                None
            }
        }
    }
}

fn print_location(context: &SuspendContext) {
    match context.top_frame() {
        Some(frame) => println!(
            "  at {} ({})",
            frame.name.bold(),
            frame.position.to_string().cyan()
        ),
        None => println!("  (no frames)"),
    }
}

impl DebugHost for ConsoleHost {
    fn breakpoint_reached(
        &self,
        breakpoint: &HitBreakpoint,
        message: Option<&str>,
        context: &SuspendContext,
    ) -> bool {
        if self.json {
            print_json(&Notification::Breakpoint {
                thread: context.thread_id(),
                breakpoint: breakpoint.to_string(),
                message,
                frame: context.top_frame(),
            });
            return true;
        }

        println!(
            "{} {} in thread {}",
            "Breakpoint".yellow().bold(),
            breakpoint,
            context.active_stack.thread_name
        );
        if let Some(message) = message {
            println!("  {}", message);
        }
        print_location(context);
        true
    }

    fn position_reached(&self, context: &SuspendContext) {
        if self.json {
            print_json(&Notification::Stopped {
                thread: context.thread_id(),
                frame: context.top_frame(),
            });
            return;
        }
        println!(
            "{} thread {}",
            "Stopped".yellow().bold(),
            context.active_stack.thread_name
        );
        print_location(context);
    }

    fn print(&self, text: &str, content_type: ContentType) {
        if self.json {
            let stream = match content_type {
                ContentType::SystemOutput => "system",
                ContentType::NormalOutput => "stdout",
                ContentType::ErrorOutput => "stderr",
            };
            print_json(&Notification::Output { stream, text });
            return;
        }
        match content_type {
            ContentType::SystemOutput => print!("{}", text.dimmed()),
            ContentType::NormalOutput => print!("{}", text),
            ContentType::ErrorOutput => eprint!("{}", text.red()),
        }
    }

    fn connection_failed(&self, message: &str) {
        match self.connection_failed_line(message) {
            Some(line) => println!("{}", line),
            None => tracing::debug!(%message, "connection failed"),
        }
    }

    fn input_requested(&self) {
        if self.json {
            print_json(&Notification::InputRequested);
        } else {
            println!("{}", "(the debuggee is waiting for input)".dimmed());
        }
    }

    fn session_stopped(&self) {
        if self.json {
            print_json(&Notification::Finished);
        } else {
            println!("{}", "Debug session finished".dimmed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RemotePosition;

    #[test]
    fn test_notification_shape() {
        let frame = StackFrameInfo {
            thread_id: "t1".to_string(),
            frame_id: "f1".to_string(),
            name: "main".to_string(),
            position: RemotePosition::new("/src/app.py", 4),
        };
        let value = serde_json::to_value(Notification::Stopped {
            thread: "t1",
            frame: Some(&frame),
        })
        .unwrap();

        assert_eq!(value["event"], "stopped");
        assert_eq!(value["frame"]["position"]["line"], 4);
        assert_eq!(value["frame"]["position"]["file"], "/src/app.py");
    }

    #[test]
    fn test_output_stream_names() {
        let value = serde_json::to_value(Notification::Output {
            stream: "stderr",
            text: "boom\n",
        })
        .unwrap();
        assert_eq!(value, serde_json::json!({"event": "output", "stream": "stderr", "text": "boom\n"}));
    }

    #[test]
    fn test_connection_failure_reported_once() {
        assert_eq!(ConsoleHost::new(false).connection_failed_line("timed out"), None);

        let line = ConsoleHost::new(true)
            .connection_failed_line("timed out")
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "connection_failed");
        assert_eq!(value["message"], "timed out");
    }
}
