// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{error, info, warn};

use cdrsender::init::args::{SenderConfig, SenderRun};
use cdrsender::init::logging::{LogArgs, setup_logging};
use cdrsender::init::sender::Sender;
use cdrsender::init::wait;

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Ship CDR records to the collector
    Start(Box<SenderRun>),

    /// Return version
    Version,
}

#[derive(Debug, Parser)]
#[command(name = "cdrsender")]
#[command(bin_name = "cdrsender")]
#[command(version, about, long_about = None)]
#[command(subcommand_required = true)]
struct Arguments {
    #[command(flatten)]
    log: LogArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    match opt.command {
        Some(Commands::Version) => {
            println!("{}", get_version())
        }
        Some(Commands::Start(run)) => {
            let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), get_version());
            let _guard = match setup_logging(&opt.log, app_name) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("ERROR: failed to setup logging: {}", e);
                    return ExitCode::from(1);
                }
            };

            let config = match run.build_config() {
                Ok(config) => config,
                Err(e) => {
                    error!(error = e, "Invalid configuration.");
                    return ExitCode::from(1);
                }
            };

            info!(version = get_version(), "Starting cdrsender");
            if let Err(e) = run_sender(config) {
                error!(error = e, "Failed to run sender.");
                return ExitCode::from(1);
            }
        }
        _ => {
            // it shouldn't be possible to get here since we mark a subcommand as
            // required
            eprintln!("ERROR: Must specify a command");
            return ExitCode::from(2);
        }
    }

    ExitCode::SUCCESS
}

/// How long exit waits for spool reads parked on a stalled file system.
const BLOCKING_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

fn run_sender(config: SenderConfig) -> Result<(), BoxError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run_sender_tasks(config));
    runtime.shutdown_timeout(BLOCKING_SHUTDOWN_TIMEOUT);
    result
}

async fn run_sender_tasks(config: SenderConfig) -> Result<(), BoxError> {
    let mut join_set = JoinSet::new();

    let cancel_token = CancellationToken::new();
    {
        let token = cancel_token.clone();
        join_set.spawn(async move { Sender::new(config).run(token).await });
    }

    select! {
        r = signal_wait() => {
            r?;
            info!("Shutdown signal received.");
            cancel_token.cancel();
        },
        e = wait::wait_for_any_task(&mut join_set) => {
            match e {
                Ok(()) => warn!("Unexpected early exit of sender."),
                Err(e) => return Err(e),
            }
        },
    }

    // The pump stops between records, so this only waits for an in-flight request.
    wait::wait_for_tasks_with_timeout(&mut join_set, Duration::from_secs(10)).await?;

    info!("Sender stopped");
    Ok(())
}

fn get_version() -> String {
    // Set during CI
    let version_build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");

    format!("{}-{}", env!("CARGO_PKG_VERSION"), version_build)
}

async fn signal_wait() -> Result<(), BoxError> {
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_int = signal(SignalKind::interrupt())?;

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
    Ok(())
}
