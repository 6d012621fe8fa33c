//! CLI command definitions
//!
//! Defines the clap commands for the pydbg CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::session::SuspendPolicy;

#[derive(Subcommand)]
pub enum Commands {
    /// Launch a Python script under the debugger
    Launch {
        /// Script to debug
        script: PathBuf,

        /// Arguments passed to the script
        #[arg(last = true)]
        args: Vec<String>,

        /// Port to listen on for the debuggee (0 picks a free port)
        #[arg(long, default_value_t = 0)]
        port: u16,

        #[command(flatten)]
        setup: SessionSetup,
    },

    /// Wait for a debuggee started elsewhere with `pydevd --client`
    Listen {
        /// Port to listen on
        #[arg(long)]
        port: u16,

        #[command(flatten)]
        setup: SessionSetup,
    },

    /// Connect to a debuggee started with `pydevd --server`
    Connect {
        /// Host the debuggee listens on (default from config)
        #[arg(long)]
        host: Option<String>,

        /// Port the debuggee listens on
        #[arg(long)]
        port: u16,

        #[command(flatten)]
        setup: SessionSetup,
    },
}

/// Breakpoints and options applied before the debuggee runs
#[derive(Args, Debug, Clone, Default)]
pub struct SessionSetup {
    /// Line breakpoint(s) as file:line; can be repeated
    #[arg(long = "break", short = 'b')]
    pub breakpoints: Vec<String>,

    /// Exception breakpoint(s) by qualified name; can be repeated
    #[arg(long = "exception", short = 'e')]
    pub exceptions: Vec<String>,

    /// Suspend policy for the breakpoints above: none, thread or all
    #[arg(long, default_value = "thread")]
    pub suspend: SuspendPolicy,

    /// Only step into project code
    #[arg(long)]
    pub my_code: bool,

    /// Expose function return values as variables
    #[arg(long)]
    pub show_return_values: bool,

    /// Print stops and values as JSON lines
    #[arg(long)]
    pub json: bool,
}
