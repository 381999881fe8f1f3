//! arch-transfer command-line entry point.

mod cli;

use arch_transfer::{transfer, CancellationToken, LocalFs, SftpClient, TransferError, TransferReport};
use clap::Parser;
use cli::{Cli, Command};
use std::io;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(cli)) {
        Ok(report) => {
            tracing::info!(
                "Transferred {} bytes in {:?}",
                report.bytes_written,
                round_to_tenth(report.elapsed)
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Run the transfer on a blocking worker and cancel it on SIGINT/SIGTERM.
async fn run(cli: Cli) -> arch_transfer::Result<TransferReport> {
    let cancel = CancellationToken::new();
    let mut worker = {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || execute(cli.command, &cancel))
    };

    let joined = tokio::select! {
        joined = &mut worker => joined,
        _ = shutdown_signal() => {
            tracing::warn!("received shutdown signal, cancelling transfer");
            cancel.cancel();
            worker.await
        }
    };

    joined.map_err(|e| {
        TransferError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("transfer worker failed: {}", e),
        ))
    })?
}

fn execute(command: Command, cancel: &CancellationToken) -> arch_transfer::Result<TransferReport> {
    match command {
        Command::Local(args) => {
            let options = args.options()?;
            transfer(
                &args.source_path(),
                &mut LocalFs,
                &args.destination,
                &options,
                cancel,
            )
        }
        Command::Sftp(args) => {
            let options = args.archive.options()?;
            let config = args.remote_config()?;

            let mut client = SftpClient::connect(&config)?;
            client.set_cancellation(cancel.clone());
            tracing::info!(address = client.address(), "connected to sftp server");

            let result = transfer(
                &args.archive.source_path(),
                &mut client,
                &args.archive.destination,
                &options,
                cancel,
            );
            if let Err(e) = client.close() {
                tracing::warn!(error = %e, "failed to disconnect from sftp server");
            }
            result
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn round_to_tenth(elapsed: Duration) -> Duration {
    let millis = (elapsed.as_millis() + 50) / 100 * 100;
    Duration::from_millis(millis as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_rounded_to_100ms() {
        assert_eq!(round_to_tenth(Duration::from_millis(1234)), Duration::from_millis(1200));
        assert_eq!(round_to_tenth(Duration::from_millis(1250)), Duration::from_millis(1300));
        assert_eq!(round_to_tenth(Duration::from_millis(20)), Duration::ZERO);
    }
}
