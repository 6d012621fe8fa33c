//! pydevd command ids, payload builders and response parsers

use roxmltree::{Document, Node};

use super::codec::{decode, encode};
use crate::common::{Error, Result};
use crate::session::{
    ContentType, DebugValue, ExceptionBreakpoint, LineBreakpoint, RemotePosition,
    StackFrameInfo, StepMode, StopReason, ThreadInfo, ThreadState,
};

// === Command ids ===

pub const CMD_RUN: u32 = 101;
pub const CMD_LIST_THREADS: u32 = 102;
pub const CMD_THREAD_CREATE: u32 = 103;
pub const CMD_THREAD_KILL: u32 = 104;
pub const CMD_THREAD_SUSPEND: u32 = 105;
pub const CMD_THREAD_RUN: u32 = 106;
pub const CMD_STEP_INTO: u32 = 107;
pub const CMD_STEP_OVER: u32 = 108;
pub const CMD_STEP_RETURN: u32 = 109;
pub const CMD_GET_VARIABLE: u32 = 110;
pub const CMD_SET_BREAK: u32 = 111;
pub const CMD_REMOVE_BREAK: u32 = 112;
pub const CMD_EVALUATE_EXPRESSION: u32 = 113;
pub const CMD_GET_FRAME: u32 = 114;
pub const CMD_EXEC_EXPRESSION: u32 = 115;
pub const CMD_WRITE_TO_CONSOLE: u32 = 116;
pub const CMD_CHANGE_VARIABLE: u32 = 117;
pub const CMD_RUN_TO_LINE: u32 = 118;
pub const CMD_CONSOLE_EXEC: u32 = 121;
pub const CMD_ADD_EXCEPTION_BREAK: u32 = 122;
pub const CMD_REMOVE_EXCEPTION_BREAK: u32 = 123;
pub const CMD_SMART_STEP_INTO: u32 = 128;
pub const CMD_STEP_INTO_MY_CODE: u32 = 144;
pub const CMD_SHOW_RETURN_VALUES: u32 = 146;
pub const CMD_INPUT_REQUESTED: u32 = 147;
pub const CMD_VERSION: u32 = 501;
pub const CMD_RETURN: u32 = 502;
pub const CMD_ERROR: u32 = 901;

/// Version string we announce in the handshake
pub const CLIENT_VERSION: &str = "1.1";

/// Human-readable command name for logs and errors
pub fn command_name(command: u32) -> &'static str {
    match command {
        CMD_RUN => "run",
        CMD_LIST_THREADS => "list threads",
        CMD_THREAD_CREATE => "thread create",
        CMD_THREAD_KILL => "thread kill",
        CMD_THREAD_SUSPEND => "thread suspend",
        CMD_THREAD_RUN => "thread run",
        CMD_STEP_INTO => "step into",
        CMD_STEP_OVER => "step over",
        CMD_STEP_RETURN => "step return",
        CMD_GET_VARIABLE => "get variable",
        CMD_SET_BREAK => "set breakpoint",
        CMD_REMOVE_BREAK => "remove breakpoint",
        CMD_EVALUATE_EXPRESSION => "evaluate",
        CMD_GET_FRAME => "get frame",
        CMD_EXEC_EXPRESSION => "exec",
        CMD_WRITE_TO_CONSOLE => "write to console",
        CMD_CHANGE_VARIABLE => "change variable",
        CMD_RUN_TO_LINE => "run to line",
        CMD_CONSOLE_EXEC => "console exec",
        CMD_ADD_EXCEPTION_BREAK => "add exception breakpoint",
        CMD_REMOVE_EXCEPTION_BREAK => "remove exception breakpoint",
        CMD_SMART_STEP_INTO => "smart step into",
        CMD_STEP_INTO_MY_CODE => "step into my code",
        CMD_SHOW_RETURN_VALUES => "show return values",
        CMD_INPUT_REQUESTED => "input requested",
        CMD_VERSION => "version",
        CMD_RETURN => "return",
        CMD_ERROR => "error",
        _ => "unknown",
    }
}

pub fn step_command(mode: StepMode) -> u32 {
    match mode {
        StepMode::StepOver => CMD_STEP_OVER,
        StepMode::StepInto => CMD_STEP_INTO,
        StepMode::StepIntoMyCode => CMD_STEP_INTO_MY_CODE,
        StepMode::StepOut => CMD_STEP_RETURN,
        StepMode::Resume => CMD_THREAD_RUN,
    }
}

/// Stop reason carried in a thread-suspend message
pub fn stop_reason(code: u32) -> StopReason {
    match code {
        CMD_SET_BREAK => StopReason::Breakpoint,
        CMD_ADD_EXCEPTION_BREAK => StopReason::Exception,
        CMD_STEP_INTO => StopReason::StepInto,
        CMD_STEP_INTO_MY_CODE => StopReason::StepIntoMyCode,
        CMD_STEP_OVER => StopReason::StepOver,
        CMD_STEP_RETURN => StopReason::StepReturn,
        CMD_SMART_STEP_INTO => StopReason::SmartStepInto,
        CMD_RUN_TO_LINE => StopReason::RunToLine,
        CMD_THREAD_SUSPEND => StopReason::SuspendRequest,
        other => StopReason::Other(other),
    }
}

// === Payloads ===

pub fn version_payload() -> String {
    let os = if cfg!(windows) { "WINDOWS" } else { "UNIX" };
    format!("{}\t{}\tID", CLIENT_VERSION, os)
}

/// Conditions travel unquoted, so tabs and newlines are escaped
fn condition(text: Option<&str>) -> String {
    match text {
        Some(text) if !text.is_empty() => text
            .replace('\n', "@_@NEW_LINE_CHAR@_@")
            .replace('\t', "@_@TAB_CHAR@_@"),
        _ => "None".to_string(),
    }
}

pub fn set_breakpoint_payload(bp: &LineBreakpoint) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}",
        bp.kind,
        bp.position.file(),
        bp.position.line(),
        bp.function_name.as_deref().unwrap_or("None"),
        bp.suspend_policy.as_str(),
        condition(bp.condition.as_deref()),
        condition(bp.log_expression.as_deref()),
    )
}

pub fn temp_breakpoint_payload(kind: &str, file: &str, line: u32) -> String {
    format!("{}\t{}\t{}\tNone\tNONE\tNone\tNone", kind, file, line)
}

pub fn remove_breakpoint_payload(kind: &str, file: &str, line: u32) -> String {
    format!("{}\t{}\t{}", kind, file, line)
}

fn exception_id(bp: &ExceptionBreakpoint) -> String {
    format!("python-{}", bp.exception)
}

pub fn add_exception_payload(bp: &ExceptionBreakpoint) -> String {
    // 2 asks for the first raise only, 0 disables raise notifications
    let on_raise = if bp.notify_on_raise { 2 } else { 0 };
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        exception_id(bp),
        condition(bp.condition.as_deref()),
        condition(bp.log_expression.as_deref()),
        on_raise,
        u8::from(bp.notify_on_terminate),
        u8::from(bp.ignore_libraries),
    )
}

pub fn remove_exception_payload(bp: &ExceptionBreakpoint) -> String {
    exception_id(bp)
}

pub fn frame_payload(thread_id: &str, frame_id: &str) -> String {
    format!("{}\t{}\tFRAME", thread_id, frame_id)
}

pub fn evaluate_payload(thread_id: &str, frame_id: &str, expression: &str, trim: bool) -> String {
    format!(
        "{}\t{}\t{}",
        frame_payload(thread_id, frame_id),
        encode(expression),
        u8::from(trim)
    )
}

pub fn console_exec_payload(thread_id: &str, frame_id: &str, expression: &str) -> String {
    format!("{}\t{}", frame_payload(thread_id, frame_id), encode(expression))
}

pub fn variable_payload(thread_id: &str, frame_id: &str, variable: &DebugValue) -> String {
    format!("{}\t{}", frame_payload(thread_id, frame_id), variable.path())
}

pub fn change_variable_payload(
    thread_id: &str,
    frame_id: &str,
    variable: &DebugValue,
    value: &str,
) -> String {
    format!(
        "{}\t{}\t{}",
        frame_payload(thread_id, frame_id),
        variable.path(),
        encode(value)
    )
}

pub fn smart_step_payload(thread_id: &str, frame_id: &str, function_name: &str) -> String {
    format!("{}\t{}\t{}", thread_id, frame_id, function_name)
}

pub fn show_return_values_payload(enabled: bool) -> String {
    format!("CMD_SHOW_RETURN_VALUES\t{}", u8::from(enabled))
}

// === Parsers ===

fn attr<'a>(node: &Node<'a, '_>, name: &str) -> Result<&'a str> {
    node.attribute(name).ok_or_else(|| {
        Error::Protocol(format!(
            "<{}> without '{}' attribute",
            node.tag_name().name(),
            name
        ))
    })
}

/// Thread stopped: `<xml><thread ...><frame .../>...</thread></xml>`
pub fn parse_thread_suspend(payload: &str) -> Result<ThreadInfo> {
    let doc = Document::parse(payload)?;
    let node = doc
        .descendants()
        .find(|n| n.has_tag_name("thread"))
        .ok_or_else(|| Error::Protocol("suspend message without <thread>".to_string()))?;

    let thread_id = attr(&node, "id")?.to_string();
    let reason = node
        .attribute("stop_reason")
        .and_then(|r| r.parse().ok())
        .map(stop_reason)
        .unwrap_or(StopReason::Other(0));
    let message = node
        .attribute("message")
        .map(decode)
        .filter(|m| !m.is_empty());

    let mut frames = Vec::new();
    for frame in node.children().filter(|n| n.has_tag_name("frame")) {
        let line = attr(&frame, "line")?
            .parse()
            .map_err(|_| Error::Protocol("frame line is not a number".to_string()))?;
        frames.push(StackFrameInfo {
            thread_id: thread_id.clone(),
            frame_id: attr(&frame, "id")?.to_string(),
            name: decode(frame.attribute("name").unwrap_or("")),
            position: RemotePosition::new(decode(attr(&frame, "file")?), line),
        });
    }

    Ok(ThreadInfo {
        id: thread_id,
        name: decode(node.attribute("name").unwrap_or("")),
        state: ThreadState::Suspended,
        frames,
        stop_reason: reason,
        message,
    })
}

/// Thread created or thread list: `<xml><thread name id/>...</xml>`
pub fn parse_threads(payload: &str) -> Result<Vec<ThreadInfo>> {
    let doc = Document::parse(payload)?;
    doc.descendants()
        .filter(|n| n.has_tag_name("thread"))
        .map(|n| {
            Ok(ThreadInfo::running(
                attr(&n, "id")?,
                decode(n.attribute("name").unwrap_or("")),
            ))
        })
        .collect()
}

/// Thread resumed: `<id>\t<reason>`
pub fn parse_thread_run(payload: &str) -> (String, Option<u32>) {
    let mut parts = payload.splitn(2, '\t');
    let id = parts.next().unwrap_or("").to_string();
    let reason = parts.next().and_then(|r| r.trim().parse().ok());
    (id, reason)
}

fn parse_var(node: &Node<'_, '_>, parent_path: Option<&str>) -> Result<DebugValue> {
    let name = decode(attr(node, "name")?);
    let type_name = decode(node.attribute("type").unwrap_or(""));
    let mut value = decode(node.attribute("value").unwrap_or(""));
    // Values are sent as "<type>: <repr>"
    if let Some(stripped) = value.strip_prefix(&format!("{}: ", type_name)) {
        value = stripped.to_string();
    }

    Ok(DebugValue {
        name,
        type_name,
        value,
        is_container: node.attribute("isContainer") == Some("True"),
        is_error: node.attribute("isErrorOnEval") == Some("True"),
        parent_path: parent_path.map(str::to_string),
    })
}

/// Frame or container contents: `<xml><var .../>...</xml>`
pub fn parse_variables(payload: &str, parent_path: Option<&str>) -> Result<Vec<DebugValue>> {
    let doc = Document::parse(payload)?;
    doc.descendants()
        .filter(|n| n.has_tag_name("var"))
        .map(|n| parse_var(&n, parent_path))
        .collect()
}

/// Single evaluation result
pub fn parse_value(payload: &str) -> Result<DebugValue> {
    parse_variables(payload, None)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Protocol("response without <var>".to_string()))
}

/// Debuggee output: `<xml><io s="text" ctx="1|2"/></xml>`
pub fn parse_console_output(payload: &str) -> Result<(String, ContentType)> {
    let doc = Document::parse(payload)?;
    let node = doc
        .descendants()
        .find(|n| n.has_tag_name("io"))
        .ok_or_else(|| Error::Protocol("console message without <io>".to_string()))?;
    let content_type = match node.attribute("ctx") {
        Some("2") => ContentType::ErrorOutput,
        _ => ContentType::NormalOutput,
    };
    Ok((decode(attr(&node, "s")?), content_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SuspendPolicy;

    #[test]
    fn test_set_breakpoint_payload() {
        let mut bp = LineBreakpoint::new("python-line", RemotePosition::new("/app/main.py", 12))
            .with_condition("x > 1\nand y")
            .with_suspend_policy(SuspendPolicy::All);
        bp.function_name = Some("handler".to_string());

        assert_eq!(
            set_breakpoint_payload(&bp),
            "python-line\t/app/main.py\t12\thandler\tALL\tx > 1@_@NEW_LINE_CHAR@_@and y\tNone"
        );
        assert_eq!(
            temp_breakpoint_payload("python-line", "/app/main.py", 3),
            "python-line\t/app/main.py\t3\tNone\tNONE\tNone\tNone"
        );
    }

    #[test]
    fn test_exception_payload() {
        let mut bp = ExceptionBreakpoint::new("builtins.KeyError");
        bp.notify_on_raise = true;
        bp.ignore_libraries = true;
        assert_eq!(
            add_exception_payload(&bp),
            "python-builtins.KeyError\tNone\tNone\t2\t1\t1"
        );
        assert_eq!(remove_exception_payload(&bp), "python-builtins.KeyError");
    }

    #[test]
    fn test_evaluate_payload() {
        assert_eq!(
            evaluate_payload("t1", "7", "x + 1", true),
            "t1\t7\tFRAME\tx%20%2B%201\t1"
        );
    }

    #[test]
    fn test_parse_thread_suspend() {
        let xml = r#"<xml><thread id="pid_1_id_2" name="MainThread" stop_reason="122" message="builtins.ValueError">
            <frame id="140" name="work" file="/app/main.py" line="8"/>
            <frame id="141" name="%3Cmodule%3E" file="/app/main.py" line="20"/>
        </thread></xml>"#;
        let thread = parse_thread_suspend(xml).unwrap();

        assert_eq!(thread.id, "pid_1_id_2");
        assert_eq!(thread.stop_reason, StopReason::Exception);
        assert_eq!(thread.message.as_deref(), Some("builtins.ValueError"));
        assert_eq!(thread.frames.len(), 2);
        assert_eq!(thread.frames[0].position, RemotePosition::new("/app/main.py", 8));
        assert_eq!(thread.frames[1].name, "<module>");
        assert_eq!(thread.frames[1].thread_id, "pid_1_id_2");
    }

    #[test]
    fn test_parse_variables() {
        let xml = r#"<xml>
            <var name="count" type="int" qualifier="builtins" value="int: 3" />
            <var name="items" type="list" value="list: [1, 2]" isContainer="True" />
        </xml>"#;
        let vars = parse_variables(xml, Some("self")).unwrap();

        assert_eq!(vars[0].value, "3");
        assert!(!vars[0].is_container);
        assert_eq!(vars[1].value, "[1, 2]");
        assert!(vars[1].is_container);
        assert_eq!(vars[1].path(), "self\titems");
    }

    #[test]
    fn test_parse_console_output() {
        let (text, kind) =
            parse_console_output(r#"<xml><io s="oops%0A" ctx="2"/></xml>"#).unwrap();
        assert_eq!(text, "oops\n");
        assert_eq!(kind, ContentType::ErrorOutput);
    }

    #[test]
    fn test_parse_thread_run() {
        assert_eq!(parse_thread_run("pid_1_id_2\t108"), ("pid_1_id_2".to_string(), Some(108)));
        assert_eq!(parse_thread_run("t"), ("t".to_string(), None));
    }
}
