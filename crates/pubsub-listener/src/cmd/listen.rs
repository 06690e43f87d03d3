use std::process::ExitCode;
use std::time::Duration;

use clap::Args;
use gcp_pubsub::{BoxError, ListenExit, ListenOptions, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::ConnectionArgs;
use crate::WATCHDOG_EXIT_CODE;

#[derive(Args)]
pub struct ListenArgs {
    #[command(flatten)]
    connection: ConnectionArgs,
    /// Subscription name
    #[arg(long, short)]
    subscription: String,
    /// Maximum envelopes per pull
    #[arg(long, default_value_t = gcp_pubsub::DEFAULT_MAX_MESSAGES)]
    max_messages: u32,
    /// Sleep after an empty pull or an error, in milliseconds
    #[arg(long, default_value_t = 30_000)]
    poll_sleep_ms: u64,
    /// Skip messages older than this many milliseconds (still acked)
    #[arg(long)]
    limit_message_time_ms: Option<u64>,
    /// Liveness budget in milliseconds (default: 3 × poll sleep)
    #[arg(long)]
    max_timeout_ms: Option<u64>,
}

/// Listen until SIGINT/SIGTERM or the watchdog trips.
pub async fn run_listen(args: ListenArgs) -> Result<ExitCode> {
    let pubsub = args.connection.connect()?;
    let subscription = pubsub.subscription(args.subscription)?;

    let options = ListenOptions {
        max_messages: args.max_messages,
        limit_message_time: args.limit_message_time_ms.map(Duration::from_millis),
        poll_sleep: Duration::from_millis(args.poll_sleep_ms),
        max_timeout: args.max_timeout_ms.map(Duration::from_millis),
        ..ListenOptions::from_env()?
    };

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let exit = subscription
        .listen(
            |payload: serde_json::Value| async move {
                info!(payload = %payload, "message received");
                Ok::<(), BoxError>(())
            },
            options,
            cancel,
        )
        .await?;

    if let ListenExit::Stalled { idle } = exit {
        error!(
            idle_ms = idle.as_millis() as u64,
            exit_code = WATCHDOG_EXIT_CODE,
            "listener stalled, exiting for restart"
        );
    }
    Ok(ExitCode::from(exit_status(exit)))
}

/// Process exit status for a finished listen loop.
fn exit_status(exit: ListenExit) -> u8 {
    match exit {
        ListenExit::Cancelled => 0,
        ListenExit::Stalled { .. } => WATCHDOG_EXIT_CODE,
    }
}

async fn cancel_on_signal(cancel: CancellationToken) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).ok();
    let mut sigint = signal(SignalKind::interrupt()).ok();

    tokio::select! {
        _ = recv_signal(&mut sigterm) => {
            info!("received SIGTERM, stopping");
        }
        _ = recv_signal(&mut sigint) => {
            info!("received SIGINT, stopping");
        }
    }
    cancel.cancel();
}

async fn recv_signal(sig: &mut Option<tokio::signal::unix::Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}
