//! pydbg - debug Python programs through pydevd from the terminal

use clap::Parser;
use pydbg::cli;
use pydbg::commands::Commands;
use pydbg::common::logging;

#[derive(Parser)]
#[command(name = "pydbg", about = "Console debugger for Python programs")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let guard = logging::init_cli();

    let cli = Cli::parse();

    if let Err(e) = cli::dispatch(cli.command).await {
        cli::print_error(&e);
        // exit skips destructors; flush the log file first
        drop(guard);
        std::process::exit(1);
    }
}
