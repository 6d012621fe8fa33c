//! Interactive command loop
//!
//! Reads one command per line from stdin while the session's event task
//! prints stops and output as they happen.

use std::io::Write;
use std::sync::Arc;

use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::console::print_json;
use crate::common::{parse_file_line, Error, Result};
use crate::session::{
    BreakpointOptions, DebugValue, DebuggerSession, ExceptionBreakpoint, LocalPosition,
    ThreadState,
};

const HELP: &str = "\
Execution:   c  continue | ca  continue all | n  step over | s  step into
             my  step into my code | o  step out | into <func> | p  pause
             until <file:line>
Breakpoints: b <file:line> [if <cond>] | rb <file:line> | eb <Exception>
             reb <Exception> | bl  list
Inspection:  t  threads | f  frames | sel <thread> <frame> | locals
             x <var> | set <var> <value> | e <expr> | exec <stmt> | console
Other:       help | q  quit";

/// One parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Continue,
    ContinueAll,
    Next,
    Step,
    StepMyCode,
    Out,
    Into(String),
    Pause,
    Until(String),
    Break {
        location: String,
        condition: Option<String>,
    },
    RemoveBreak(String),
    ExceptionBreak(String),
    RemoveExceptionBreak(String),
    Breakpoints,
    Threads,
    Frames,
    Select {
        thread: String,
        frame: String,
    },
    Locals,
    Expand(String),
    Set {
        name: String,
        value: String,
    },
    Eval(String),
    Exec(String),
    Console,
    Help,
    Quit,
}

fn required(arg: &str, usage: &str) -> Result<String> {
    if arg.is_empty() {
        Err(Error::Config(format!("usage: {}", usage)))
    } else {
        Ok(arg.to_string())
    }
}

pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word {
        "c" | "continue" => ConsoleCommand::Continue,
        "ca" => ConsoleCommand::ContinueAll,
        "n" | "next" => ConsoleCommand::Next,
        "s" | "step" => ConsoleCommand::Step,
        "my" => ConsoleCommand::StepMyCode,
        "o" | "out" => ConsoleCommand::Out,
        "into" => ConsoleCommand::Into(required(rest, "into <function>")?),
        "p" | "pause" => ConsoleCommand::Pause,
        "until" => ConsoleCommand::Until(required(rest, "until <file:line>")?),
        "b" | "break" => {
            let (location, condition) = match rest.split_once(" if ") {
                Some((location, condition)) => {
                    (location.trim(), Some(condition.trim().to_string()))
                }
                None => (rest, None),
            };
            ConsoleCommand::Break {
                location: required(location, "b <file:line> [if <condition>]")?,
                condition,
            }
        }
        "rb" => ConsoleCommand::RemoveBreak(required(rest, "rb <file:line>")?),
        "eb" => ConsoleCommand::ExceptionBreak(required(rest, "eb <Exception>")?),
        "reb" => ConsoleCommand::RemoveExceptionBreak(required(rest, "reb <Exception>")?),
        "bl" => ConsoleCommand::Breakpoints,
        "t" | "threads" => ConsoleCommand::Threads,
        "f" | "frame" | "frames" => ConsoleCommand::Frames,
        "sel" => {
            let mut parts = rest.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(thread), Some(frame)) => ConsoleCommand::Select {
                    thread: thread.to_string(),
                    frame: frame.to_string(),
                },
                _ => return Err(Error::Config("usage: sel <thread> <frame>".to_string())),
            }
        }
        "locals" => ConsoleCommand::Locals,
        "x" => ConsoleCommand::Expand(required(rest, "x <variable>")?),
        "set" => match rest.split_once(char::is_whitespace) {
            Some((name, value)) => ConsoleCommand::Set {
                name: name.to_string(),
                value: value.trim().to_string(),
            },
            None => return Err(Error::Config("usage: set <variable> <value>".to_string())),
        },
        "e" | "eval" => ConsoleCommand::Eval(required(rest, "e <expression>")?),
        "exec" => ConsoleCommand::Exec(required(rest, "exec <statement>")?),
        "console" => ConsoleCommand::Console,
        "help" | "h" | "?" => ConsoleCommand::Help,
        "q" | "quit" | "exit" => ConsoleCommand::Quit,
        other => {
            return Err(Error::Config(format!(
                "unknown command '{}' (try 'help')",
                other
            )))
        }
    };
    Ok(Some(command))
}

/// Resolve a user-typed `file:line` (1-based) to a local position
pub fn local_position(location: &str) -> Result<LocalPosition> {
    let (file, line) = parse_file_line(location)?;
    let path = std::path::PathBuf::from(&file);
    let path = path.canonicalize().unwrap_or(path);
    Ok(LocalPosition::new(path.display().to_string(), line - 1))
}

fn print_value(value: &DebugValue, json: bool) {
    if json {
        print_json(value);
        return;
    }
    let marker = if value.is_container { "+" } else { " " };
    let text = if value.is_error {
        value.value.red().to_string()
    } else {
        value.value.clone()
    };
    println!(
        "{} {} = {} {}",
        marker,
        value.name.bold(),
        text,
        format!("({})", value.type_name).dimmed()
    );
}

async fn find_variable(session: &DebuggerSession, name: &str) -> Result<DebugValue> {
    session
        .load_frame()
        .await?
        .into_iter()
        .find(|v| v.name == name)
        .ok_or_else(|| Error::Config(format!("no variable '{}' in the current frame", name)))
}

fn print_values(values: &[DebugValue], json: bool, empty: &str) {
    if json {
        print_json(&values);
    } else if values.is_empty() {
        println!("{}", empty);
    } else {
        for value in values {
            print_value(value, false);
        }
    }
}

/// Run one command; returns false to leave the loop
///
/// With `json` set, listings and values are printed as JSON documents.
pub async fn execute(
    session: &DebuggerSession,
    command: ConsoleCommand,
    json: bool,
) -> Result<bool> {
    match command {
        ConsoleCommand::Continue => session.resume_current_thread(),
        ConsoleCommand::ContinueAll => session.resume_all_threads(),
        ConsoleCommand::Next => session.step_over(),
        ConsoleCommand::Step => session.step_into(),
        ConsoleCommand::StepMyCode => session.step_into_my_code(),
        ConsoleCommand::Out => session.step_out(),
        ConsoleCommand::Into(function) => session.step_into_specific_function(&function),
        ConsoleCommand::Pause => session.pause_all(),
        ConsoleCommand::Until(location) => session.run_to_position(&local_position(&location)?),

        ConsoleCommand::Break {
            location,
            condition,
        } => {
            let position = local_position(&location)?;
            let options = BreakpointOptions {
                condition,
                ..Default::default()
            };
            if let Some(bp) = session.add_line_breakpoint(&position, options) {
                println!("{} {} ({})", "Breakpoint set at".green(), bp.position, bp.kind);
            }
        }
        ConsoleCommand::RemoveBreak(location) => {
            match session.remove_line_breakpoint(&local_position(&location)?) {
                Some(bp) => println!("Breakpoint at {} removed", bp.position),
                None => println!("No breakpoint at {}", location),
            }
        }
        ConsoleCommand::ExceptionBreak(name) => {
            session.add_exception_breakpoint(ExceptionBreakpoint::new(name.as_str()));
            println!("{} {}", "Exception breakpoint set on".green(), name);
        }
        ConsoleCommand::RemoveExceptionBreak(name) => {
            match session.remove_exception_breakpoint(&name) {
                Some(_) => println!("Exception breakpoint on {} removed", name),
                None => println!("No exception breakpoint on {}", name),
            }
        }
        ConsoleCommand::Breakpoints => {
            let lines = session.line_breakpoints();
            let exceptions = session.exception_breakpoints();
            if json {
                print_json(&serde_json::json!({ "line": lines, "exception": exceptions }));
                return Ok(true);
            }
            if lines.is_empty() && exceptions.is_empty() {
                println!("No breakpoints set");
            }
            for bp in &lines {
                let condition = bp
                    .condition
                    .as_deref()
                    .map(|c| format!(" if {}", c))
                    .unwrap_or_default();
                println!(
                    "  {} [{}, {}]{}",
                    bp.position,
                    bp.kind,
                    bp.suspend_policy.as_str(),
                    condition
                );
            }
            for bp in &exceptions {
                println!("  {} [{}]", bp.exception, bp.suspend_policy.as_str());
            }
        }

        ConsoleCommand::Threads => {
            let threads = session.threads();
            if json {
                print_json(&threads);
                return Ok(true);
            }
            if threads.is_empty() {
                println!("No threads");
            }
            for thread in &threads {
                let state = match thread.state {
                    ThreadState::Suspended => "suspended".yellow(),
                    ThreadState::Running => "running".green(),
                };
                println!("  {} {} ({})", thread.id, thread.name.bold(), state);
            }
        }
        ConsoleCommand::Frames => {
            let current = session.current_frame().ok();
            let suspended = session.suspended_threads();
            if json {
                let threads: Vec<_> = suspended.into_iter().map(|s| s.thread).collect();
                print_json(&serde_json::json!({ "current": current, "threads": threads }));
                return Ok(true);
            }
            if suspended.is_empty() {
                println!("No suspended threads");
            }
            for entry in suspended {
                let thread = entry.thread;
                if let Some(current) = &current {
                    if current.thread_id != thread.id {
                        continue;
                    }
                }
                println!("Thread {} ({})", thread.id, thread.name);
                for frame in &thread.frames {
                    let marker = match &current {
                        Some(c) if c.frame_id == frame.frame_id => "->",
                        _ => "  ",
                    };
                    let shown = session
                        .local_position(&frame.position)
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| frame.position.to_string());
                    println!("{} #{} {} at {}", marker, frame.frame_id, frame.name, shown.cyan());
                }
            }
        }
        ConsoleCommand::Select { thread, frame } => {
            let selected = session.select_frame(&thread, &frame)?;
            println!("Selected {} at {}", selected.name, selected.position);
        }
        ConsoleCommand::Locals => {
            let values = session.load_frame().await?;
            print_values(&values, json, "No local variables");
        }
        ConsoleCommand::Expand(name) => {
            let variable = find_variable(session, &name).await?;
            let children = session.load_variable(&variable).await?;
            print_values(&children, json, "No children");
        }
        ConsoleCommand::Set { name, value } => {
            let variable = find_variable(session, &name).await?;
            let changed = session.change_variable(&variable, &value).await?;
            print_value(&changed, json);
        }
        ConsoleCommand::Eval(expression) => {
            let value = session.evaluate(&expression, false, true).await?;
            print_value(&value, json);
        }
        ConsoleCommand::Exec(statement) => {
            let value = session.console_exec(&statement).await?;
            if !value.value.is_empty() {
                print_value(&value, json);
            }
        }
        ConsoleCommand::Console => match session.show_console() {
            Some(frame) => println!("Console attached to {} at {}", frame.name, frame.position),
            None => println!("Select a frame first"),
        },
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => return Ok(false),
    }
    Ok(true)
}

fn prompt() {
    print!("{} ", "(pydbg)".bold());
    let _ = std::io::stdout().flush();
}

/// Read and run commands until quit, end of input, or the session closes
pub async fn run(session: Arc<DebuggerSession>, json: bool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state = session.subscribe_state();
    if !json {
        println!("{}", "Type 'help' for commands".dimmed());
        prompt();
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let keep_going = match parse_command(&line) {
                    Ok(Some(command)) => match execute(&session, command, json).await {
                        Ok(keep_going) => keep_going,
                        Err(e) => {
                            eprintln!("{} {}", "Error:".red().bold(), e);
                            // Nothing left to talk to
                            !(e.is_disconnect() && session.is_closed())
                        }
                    },
                    Ok(None) => true,
                    Err(e) => {
                        eprintln!("{}", e.to_string().red());
                        true
                    }
                };
                if !keep_going {
                    break;
                }
                if !json {
                    prompt();
                }
            }
            changed = state.changed() => {
                if changed.is_err() || session.is_closed() {
                    break;
                }
            }
        }
    }

    session.stop().await;
    Ok(())
}
