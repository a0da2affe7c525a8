//! Peer-to-peer channels over the slot-indexed store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ChannelStore                          │
//! │        (account dir)/channels/(remote) → Arc<Channel>        │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        ▼                       ▼                       ▼
//!   PropsFile              DeliveryLog              SlotCursor
//!  (fetchslot,             (ids already            (frontier +
//!   sendslot, keys)         delivered)              look-ahead)
//!                                │
//!                                ▼
//!              Channel::fetch → PassReport
//!          StoreClient ─▶ envelope ─▶ MailboxSink ─▶ AckScheduler
//! ```
//!
//! A channel directory contains `props` and `log`; nothing else is
//! required to resume a channel after a restart.

mod channel;
mod engine;
pub mod envelope;
mod ledger;
mod props;
mod report;
mod store;

pub use channel::{Channel, ChannelStatus, KeyPair, PROPS_FILE, SentMessage, prop};
pub use ledger::{DeliveryLog, LOG_FILE};
pub use props::PropsFile;
pub use report::{
    AckStatus, DeferReason, MalformedReason, PassEnd, PassReport, SlotOutcome, SlotReport,
};
pub use store::{Account, CHANNELS_DIR, ChannelStore};
