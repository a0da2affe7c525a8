//! Slot tokens and the cursor that walks them.
//!
//! A slot is a single-use lookup token. Concatenated with a channel's base
//! key it names the document a peer polls for. Slots form a one-way hash
//! chain, so the sender and the receiver derive the same sequence from a
//! shared seed.

pub mod base32;
pub mod cursor;
pub mod sequencer;

pub use cursor::{Clock, PendingSlot, SlotCursor};
pub use sequencer::{HashChain, SLOT_LEN, SlotSequencer, is_well_formed};
