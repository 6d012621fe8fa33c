//! CLI command handling
//!
//! Builds a debug session for the chosen connection mode, waits for the
//! debuggee and hands control to the interactive console.

mod console;
mod repl;
mod spawn;

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use indicatif::ProgressBar;

use crate::commands::{Commands, SessionSetup};
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::pydevd::RemoteDebugger;
use crate::session::{
    BreakpointKinds, BreakpointOptions, DebuggerSession, ExceptionBreakpoint, PositionConverter,
    ProcessDebugger, SessionOptions, SessionState,
};

pub use console::ConsoleHost;
pub use repl::{parse_command, ConsoleCommand};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    let config = Config::load()?;
    let request_timeout = Duration::from_secs(config.timeouts.request_secs);

    match command {
        Commands::Launch {
            script,
            args,
            port,
            setup,
        } => {
            let script = script.canonicalize().map_err(|e| Error::FileRead {
                path: script.display().to_string(),
                error: e.to_string(),
            })?;
            let addr = format!("{}:{}", config.debugger.host, port);
            let transport = RemoteDebugger::listen(&addr, request_timeout).await?;
            let port = transport
                .local_addr()
                .map(|a| a.port())
                .ok_or_else(|| Error::Internal("listener has no local address".to_string()))?;

            let session = build_session(&config, Arc::new(transport), &setup)?;
            let child = spawn::spawn_debuggee(&config, &script, &args, port)?;
            session.attach_debuggee(child);
            println!("Debugging {}", script.display());
            run(session, setup.json).await
        }

        Commands::Listen { port, setup } => {
            let addr = format!("{}:{}", config.debugger.host, port);
            let transport = RemoteDebugger::listen(&addr, request_timeout).await?;
            if let Some(local) = transport.local_addr() {
                let hint = format!(
                    "python -m pydevd --client {} --port {} --file <script>",
                    local.ip(),
                    local.port()
                );
                println!("Start the debuggee with: {}", hint.cyan());
            }
            let session = build_session(&config, Arc::new(transport), &setup)?;
            run(session, setup.json).await
        }

        Commands::Connect { host, port, setup } => {
            let host = host.unwrap_or_else(|| config.debugger.host.clone());
            let transport = RemoteDebugger::connect_to(format!("{}:{}", host, port), request_timeout);
            let session = build_session(&config, Arc::new(transport), &setup)?;
            run(session, setup.json).await
        }
    }
}

/// Create the session and register the breakpoints given on the command line
fn build_session(
    config: &Config,
    transport: Arc<dyn ProcessDebugger>,
    setup: &SessionSetup,
) -> Result<Arc<DebuggerSession>> {
    let mut options = SessionOptions::from_config(config)?;
    options.step_into_my_code |= setup.my_code;
    options.show_return_values |= setup.show_return_values;
    let kinds = BreakpointKinds::new(config.breakpoint_kinds.clone())?;

    let session = Arc::new(DebuggerSession::new(
        transport,
        Arc::new(ConsoleHost::new(setup.json)),
        PositionConverter::new(),
        kinds,
        options,
    ));

    for location in &setup.breakpoints {
        let position = repl::local_position(location)?;
        let options = BreakpointOptions {
            suspend_policy: setup.suspend,
            ..Default::default()
        };
        session.add_line_breakpoint(&position, options);
    }
    for exception in &setup.exceptions {
        session.add_exception_breakpoint(
            ExceptionBreakpoint::new(exception.as_str()).with_suspend_policy(setup.suspend),
        );
    }

    Ok(session)
}

/// Connect with a spinner, then run the console until the session ends
async fn run(session: Arc<DebuggerSession>, json: bool) -> Result<()> {
    let task = session.start();

    let spinner = if json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Waiting for the debuggee to connect...");

    let mut state = session.subscribe_state();
    while *state.borrow_and_update() == SessionState::Connecting {
        if state.changed().await.is_err() {
            break;
        }
    }
    spinner.finish_and_clear();

    if session.is_closed() {
        // Connecting failed; the task carries the reason
        return match task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Internal(format!("session task failed: {}", e))),
        };
    }

    repl::run(session.clone(), json).await?;
    if let Err(e) = task.await {
        tracing::debug!(error = %e, "session task ended abnormally");
    }
    Ok(())
}

/// Print a fatal error with a pointer to the log file
pub fn print_error(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);
    if let Some(path) = crate::common::logging::log_path() {
        eprintln!("{}", format!("See {} for details", path.display()).dimmed());
    }
}
