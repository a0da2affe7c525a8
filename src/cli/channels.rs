//! Channel management CLI commands.

use clap::Args;

use super::Context;
use crate::channels::{ChannelStatus, KeyPair};
use crate::slots::is_well_formed;

/// Arguments for `slotmail init`.
#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    /// Remote identity
    pub remote: String,

    /// Slot the remote peer inserts messages for us at
    #[arg(long)]
    pub fetch_slot: String,

    /// Slot we insert messages for the remote peer at
    #[arg(long)]
    pub send_slot: String,

    /// Insert key shared by both ends of the channel
    #[arg(long, env = "SLOTMAIL_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,

    /// Request key matching the insert key
    #[arg(long)]
    pub public_key: String,

    /// We sent the handshake that set up this channel
    #[arg(long)]
    pub initiator: bool,
}

/// Run `slotmail init`.
pub fn run_init_command(ctx: &Context, args: InitArgs) -> anyhow::Result<()> {
    for (name, slot) in [("fetch", &args.fetch_slot), ("send", &args.send_slot)] {
        if !is_well_formed(slot) {
            anyhow::bail!("The {} slot {:?} is not a 52-character slot token", name, slot);
        }
    }

    let keys = KeyPair::new(args.private_key, args.public_key);
    let channel = ctx.store.initialize_channel(
        &ctx.account,
        &args.remote,
        args.initiator,
        &args.fetch_slot,
        &args.send_slot,
        &keys,
    )?;
    println!("Channel with '{}' initialized.", args.remote);
    println!("  Directory: {}", channel.dir().display());
    Ok(())
}

/// Run `slotmail set-ack-key`.
pub fn run_set_ack_key_command(ctx: &Context, remote: &str, key: &str) -> anyhow::Result<()> {
    let channel = ctx.store.get_channel(&ctx.account, remote)?;
    channel.set_ack_key(key)?;
    println!("Acknowledgment key for '{}' stored.", remote);
    Ok(())
}

/// Run `slotmail status`.
pub fn run_status_command(ctx: &Context, json: bool) -> anyhow::Result<()> {
    let mut statuses = Vec::new();
    for remote in ctx.store.list_remotes(&ctx.account)? {
        statuses.push(ctx.store.get_channel(&ctx.account, &remote)?.status());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    if statuses.is_empty() {
        println!("No channels for account '{}'.", ctx.account.id);
        println!("\nUse 'slotmail init <remote> ...' to set one up.");
        return Ok(());
    }

    println!("Channels of account '{}':", ctx.account.id);
    for status in &statuses {
        print_status(status);
    }
    Ok(())
}

fn print_status(status: &ChannelStatus) {
    println!("  {}", status.remote);
    println!(
        "    Role:          {}",
        if status.is_initiator { "initiator" } else { "responder" }
    );
    println!("    Fetch slots:   {}", status.fetch_slots);
    println!(
        "    Ack key:       {}",
        if status.has_ack_key { "set" } else { "missing" }
    );
    match status.delivered {
        Some(n) => println!("    Delivered:     {}", n),
        None => println!("    Delivered:     (log unreadable)"),
    }
    println!("    Next send id:  {}", status.next_message_id);
}
