//! Polling CLI command.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::Context;
use crate::acks::AckProcrastinator;
use crate::mailbox::MaildirSink;
use crate::poller::{ChannelPoller, RoundSummary};

/// How long an exiting `poll` waits for acknowledgments that are already due.
const ACK_DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Run `slotmail poll`.
///
/// Acknowledgments still waiting for their delay when the command exits
/// stay queued on disk with their due time and are published by a later run.
pub async fn run_poll_command(ctx: &Context, once: bool) -> anyhow::Result<()> {
    let client = Arc::new(ctx.client());
    let (acks, mut ack_task) =
        AckProcrastinator::start(ctx.ack_queue_dir(), client.clone(), ctx.config.acks.clone())?;
    let acks = Arc::new(acks);

    let poller = ChannelPoller::new(
        Arc::clone(&ctx.store),
        ctx.account.clone(),
        client,
        Arc::new(MaildirSink::new(ctx.mail_dir())),
        acks.clone(),
    );

    if once {
        let results = poller.poll_once().await?;
        let summary = RoundSummary::from_results(&results);
        println!(
            "Polled {} channel(s): {} delivered, {} failed, {} interrupted.",
            summary.peers, summary.delivered, summary.failed, summary.terminated
        );
        let queued = acks.pending()?.len();
        if queued > 0 {
            println!("  {} acknowledgment(s) queued.", queued);
        }
    } else {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctrl_c = async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            tracing::info!("Shutting down");
            let _ = shutdown_tx.send(true);
        };
        // The Ctrl-C future owns the sender; run() also stops if it drops.
        tokio::join!(poller.run(ctx.config.poll_interval, shutdown_rx), ctrl_c);
    }

    // Closing intake lets due acks finish while later ones stay queued.
    drop(poller);
    drop(acks);
    if tokio::time::timeout(ACK_DRAIN_GRACE, &mut ack_task).await.is_err() {
        ack_task.abort();
    }
    Ok(())
}
