//! slotmail: asynchronous peer-to-peer message channels over a
//! content-addressed, slot-indexed store.
//!
//! Two peers share a seed slot and derive every later slot from it with a
//! one-way hash chain. A sender inserts each message at the next free slot;
//! the receiver polls a window of candidate slots, hands what it finds to a
//! mailbox exactly once, and publishes an acknowledgment.

pub mod acks;
pub mod channels;
pub mod cli;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod poller;
pub mod slots;
pub mod transport;

pub use channels::{Account, Channel, ChannelStore, PassReport};
pub use config::Config;
