//! CLI command handling.
//!
//! Provides subcommands for:
//! - Generating a fresh seed slot (`seed`)
//! - Setting up a channel with a remote peer (`init`, `set-ack-key`)
//! - Sending a message (`send`)
//! - Fetching incoming messages (`poll`, `poll --once`)
//! - Inspecting channels (`status`)

mod channels;
mod message;
mod poll;

pub use channels::{InitArgs, run_init_command, run_set_ack_key_command, run_status_command};
pub use message::run_send_command;
pub use poll::run_poll_command;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::channels::{Account, ChannelStore};
use crate::config::Config;
use crate::slots::HashChain;
use crate::transport::FsStoreClient;

#[derive(Parser, Debug)]
#[command(name = "slotmail")]
#[command(about = "Asynchronous peer-to-peer message channels over a slot-indexed store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Local account to act as
    #[arg(short, long, global = true, env = "SLOTMAIL_ACCOUNT", default_value = "default")]
    pub account: String,

    /// Data directory (overrides SLOTMAIL_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Shared store directory (overrides SLOTMAIL_STORE_DIR)
    #[arg(long, global = true)]
    pub store_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a random seed slot
    Seed,

    /// Initialize a channel with a remote peer
    Init(InitArgs),

    /// Store the acknowledgment base key announced by the remote peer
    SetAckKey {
        /// Remote identity
        remote: String,

        /// Base key acknowledgments are published under
        key: String,
    },

    /// Send a message over a channel
    Send {
        /// Remote identity
        remote: String,

        /// File holding the message body (stdin if omitted)
        file: Option<PathBuf>,
    },

    /// Fetch incoming messages for every channel of the account
    Poll {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },

    /// Show channels and their state
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

/// Everything a command needs to reach an account's channels.
pub struct Context {
    pub config: Config,
    pub account: Account,
    pub store: Arc<ChannelStore>,
}

impl Context {
    /// Load configuration and apply CLI overrides.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = Config::from_env()?;
        if let Some(dir) = &cli.data_dir {
            // A relocated data dir takes its default store along.
            if cli.store_dir.is_none() && std::env::var_os("SLOTMAIL_STORE_DIR").is_none() {
                config.store_dir = dir.join("store");
            }
            config.data_dir = dir.clone();
        }
        if let Some(dir) = &cli.store_dir {
            config.store_dir = dir.clone();
        }

        let account = Account::new(cli.account.clone(), config.account_dir(&cli.account));
        let store = Arc::new(ChannelStore::new(config.channel.clone()));
        Ok(Self {
            config,
            account,
            store,
        })
    }

    /// Client over the shared store, downloading into the account.
    pub fn client(&self) -> FsStoreClient {
        FsStoreClient::new(&self.config.store_dir, self.account.dir.join("downloads"))
    }

    pub fn mail_dir(&self) -> PathBuf {
        self.account.dir.join("mail")
    }

    pub fn ack_queue_dir(&self) -> PathBuf {
        self.account.dir.join("acks")
    }
}

/// Run the parsed command line.
pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    if let Command::Seed = cli.command {
        println!("{}", HashChain::random_seed());
        return Ok(());
    }

    let ctx = Context::load(&cli)?;
    match cli.command {
        Command::Seed => Ok(()),
        Command::Init(args) => run_init_command(&ctx, args),
        Command::SetAckKey { remote, key } => run_set_ack_key_command(&ctx, &remote, &key),
        Command::Send { remote, file } => run_send_command(&ctx, &remote, file.as_deref()).await,
        Command::Poll { once } => run_poll_command(&ctx, once).await,
        Command::Status { json } => run_status_command(&ctx, json),
    }
}
