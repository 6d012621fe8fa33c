//! Debuggee spawning
//!
//! Starts the Python interpreter with pydevd in client mode so it connects
//! back to the port we listen on.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::common::config::Config;
use crate::common::{Error, Result};

/// Interpreter arguments that run `script` under pydevd
fn debuggee_args(config: &Config, script: &Path, args: &[String], port: u16) -> Vec<OsString> {
    let mut argv: Vec<OsString> = Vec::new();
    match &config.debugger.pydevd {
        Some(pydevd) => argv.push(pydevd.as_os_str().to_owned()),
        None => {
            argv.push("-m".into());
            argv.push("pydevd".into());
        }
    }
    argv.push("--client".into());
    argv.push(config.debugger.host.clone().into());
    argv.push("--port".into());
    argv.push(port.to_string().into());
    argv.push("--file".into());
    argv.push(script.as_os_str().to_owned());
    argv.extend(args.iter().map(OsString::from));
    argv
}

/// Spawn the debuggee; it is killed if the returned handle is dropped
pub fn spawn_debuggee(config: &Config, script: &Path, args: &[String], port: u16) -> Result<Child> {
    let python = config.python_interpreter()?;
    let argv = debuggee_args(config, script, args, port);
    tracing::debug!(python = %python.display(), ?argv, "spawning debuggee");

    Command::new(&python)
        .args(&argv)
        // The console owns our stdin
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            Error::DebuggeeStartFailed(format!("failed to start {}: {}", python.display(), e))
        })
}
