//! cliptun binary entry point.

mod cli;
mod commands;
mod sftp_shell;
mod shell;
mod signals;

use clap::Parser;
use tracing::error;

use cli::{Cli, Command};
use cliptun_core::Result;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cliptun_core::init_logging(cli.debug, cli.trace) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        error!(error = %e, "startup failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.channel_config()?;
    match cli.command {
        Command::Client {
            fwd_local,
            fwd_remote,
            socks,
        } => commands::client::run(config, fwd_local, fwd_remote, socks).await,
        Command::Server => commands::server::run(config).await,
        Command::Exec { command } => commands::exec::run(config, command).await,
        Command::Stdin => commands::stdio::run_stdin(config).await,
        Command::Stdout => commands::stdio::run_stdout(config).await,
        Command::Readline => commands::readline::run(config).await,
    }
}
