//! `phasekeeper` - phase detection and action targeting for chat games

use clap::Parser;
use tokio_util::sync::CancellationToken;

use phasekeeper::cli::args::Cli;
use phasekeeper::cli::commands;
use phasekeeper::error::ExitCode;
use phasekeeper::observability::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        init_logging(cli.log_format, cli.verbose, cli.color);
    }

    let cancel = CancellationToken::new();

    // First signal drains the workers; a second one exits immediately.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => Some(sigterm),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to register SIGTERM handler");
                    None
                }
            };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            () = recv_sigterm(sigterm.as_mut()) => {}
        }

        eprintln!("\nShutting down gracefully... (press Ctrl+C again to force)");
        signal_cancel.cancel();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => std::process::exit(ExitCode::INTERRUPTED),
            () = recv_sigterm(sigterm.as_mut()) => std::process::exit(ExitCode::TERMINATED),
        }
    });

    let result = commands::dispatch(cli, cancel).await;

    match result {
        Ok(()) => std::process::exit(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

async fn recv_sigterm(sigterm: Option<&mut tokio::signal::unix::Signal>) {
    match sigterm {
        Some(sigterm) => {
            sigterm.recv().await;
        }
        None => std::future::pending().await,
    }
}
