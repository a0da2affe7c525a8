//! Message sending CLI command.

use std::io::Read;
use std::path::Path;

use super::Context;

/// Run `slotmail send`: read the body from `file` or stdin and insert it.
pub async fn run_send_command(ctx: &Context, remote: &str, file: Option<&Path>) -> anyhow::Result<()> {
    let body = match file {
        Some(path) => tokio::fs::read(path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    let channel = ctx.store.get_channel(&ctx.account, remote)?;
    let client = ctx.client();
    let sent = channel.send(&client, &body).await?;

    tracing::info!(remote = %remote, id = sent.id, slot = %sent.slot, "Message inserted");
    println!("Message {} sent to '{}'.", sent.id, remote);
    Ok(())
}
