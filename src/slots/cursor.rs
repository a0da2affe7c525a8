//! Look-ahead window over a slot chain.
//!
//! The cursor keeps the *frontier*: slots that are still worth polling. Its
//! persisted form is a comma-separated list, the last entry being the head
//! (the first slot after the most recently used one). Earlier entries were
//! skipped because a later slot turned out to hold a message; they stay
//! on the list, stamped with the time they were skipped, until they are
//! used or outlive the slot lifetime.
//!
//! ```text
//!   SLOT_A=1700000000000,SLOT_C=1700000000000,SLOT_E
//!   └─ skipped ──────────┘ └─ skipped ───────┘ └ head
//! ```
//!
//! Past the head the cursor generates up to `poll_ahead` more candidates
//! from the sequencer. Every mutation is handed to the save callback before
//! the call returns.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::sequencer::SlotSequencer;
use crate::error::{CursorError, PropsError};

/// Default number of slots generated beyond the head per pass.
pub const DEFAULT_POLL_AHEAD: usize = 6;

/// Default time a skipped slot stays on the frontier.
pub const DEFAULT_SLOT_LIFETIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const SLOTS_SEP: char = ',';
const TIME_SEP: char = '=';

/// Persists the serialized frontier.
pub type SaveSlots<'a> = Box<dyn FnMut(&str) -> Result<(), PropsError> + Send + 'a>;

/// Source of the current time for skip stamps and expiry.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// An entry on the frontier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSlot {
    /// The slot token.
    pub token: String,
    /// When the slot was skipped over. `None` for the head.
    pub skipped_at: Option<DateTime<Utc>>,
}

/// Walks the frontier and the look-ahead window of a slot chain.
pub struct SlotCursor<'a> {
    slots: Vec<PendingSlot>,
    /// Index of the next candidate; indices past `slots` are generated.
    next_index: usize,
    /// The token most recently returned by `next_slot`.
    current: Option<String>,
    poll_ahead: usize,
    slot_lifetime: Duration,
    sequencer: Arc<dyn SlotSequencer>,
    save: SaveSlots<'a>,
    clock: Clock,
    expired: Vec<String>,
}

impl<'a> SlotCursor<'a> {
    /// Create a cursor over a persisted slot list.
    ///
    /// An empty list means no seed is configured; such a cursor never
    /// yields a slot.
    pub fn new(slotlist: &str, sequencer: Arc<dyn SlotSequencer>, save: SaveSlots<'a>) -> Self {
        Self {
            slots: parse_slotlist(slotlist),
            next_index: 0,
            current: None,
            poll_ahead: DEFAULT_POLL_AHEAD,
            slot_lifetime: DEFAULT_SLOT_LIFETIME,
            sequencer,
            save,
            clock: Arc::new(Utc::now),
            expired: Vec::new(),
        }
    }

    /// Set how many slots are generated beyond the head.
    pub fn with_poll_ahead(mut self, poll_ahead: usize) -> Self {
        self.poll_ahead = poll_ahead;
        self
    }

    /// Set how long skipped slots are kept.
    pub fn with_slot_lifetime(mut self, lifetime: Duration) -> Self {
        self.slot_lifetime = lifetime;
        self
    }

    /// Replace the wall clock.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Return the next untried slot, or `None` once the window is exhausted.
    pub fn next_slot(&mut self) -> Result<Option<String>, CursorError> {
        loop {
            if self.slots.is_empty() || self.next_index >= self.slots.len() + self.poll_ahead {
                return Ok(None);
            }

            if self.next_index < self.slots.len() {
                let is_head = self.next_index + 1 == self.slots.len();
                if !is_head && self.is_expired(&self.slots[self.next_index]) {
                    let expired = self.slots.remove(self.next_index);
                    self.expired.push(expired.token);
                    self.persist()?;
                    continue;
                }
                let token = self.slots[self.next_index].token.clone();
                return Ok(Some(self.hand_out(token)));
            }

            let base = if self.next_index == self.slots.len() {
                self.slots[self.slots.len() - 1].token.clone()
            } else {
                self.current.clone().unwrap_or_default()
            };
            let token = self.advance(&base)?;
            return Ok(Some(self.hand_out(token)));
        }
    }

    /// Retire the slot most recently returned by [`next_slot`](Self::next_slot).
    pub fn mark_used(&mut self) -> Result<(), CursorError> {
        let used = match (self.next_index, self.current.take()) {
            (0, _) | (_, None) => return Err(CursorError::NothingReturned),
            (_, Some(token)) => token,
        };
        let used_index = self.next_index - 1;
        let head_index = self.slots.len() - 1;

        if used_index < head_index {
            self.slots.remove(used_index);
        } else {
            if used_index == head_index {
                self.slots.pop();
            } else {
                // Everything between the old head and the used slot was
                // polled without result; keep it around for late inserts.
                let now = (self.clock)();
                self.slots[head_index].skipped_at = Some(now);
                let mut token = self.slots[head_index].token.clone();
                for _ in head_index + 1..used_index {
                    token = self.advance(&token)?;
                    self.slots.push(PendingSlot {
                        token: token.clone(),
                        skipped_at: Some(now),
                    });
                }
            }
            let head = self.advance(&used)?;
            self.slots.push(PendingSlot {
                token: head,
                skipped_at: None,
            });
        }

        self.next_index = used_index;
        self.persist()
    }

    /// Serialize the frontier in its persisted form.
    pub fn to_blob(&self) -> String {
        let mut out = String::new();
        for (i, slot) in self.slots.iter().enumerate() {
            if i > 0 {
                out.push(SLOTS_SEP);
            }
            out.push_str(&slot.token);
            if let Some(at) = slot.skipped_at {
                out.push(TIME_SEP);
                out.push_str(&at.timestamp_millis().to_string());
            }
        }
        out
    }

    /// The frontier, head last.
    pub fn pending(&self) -> &[PendingSlot] {
        &self.slots
    }

    /// Drain the tokens dropped for outliving the slot lifetime.
    pub fn take_expired(&mut self) -> Vec<String> {
        std::mem::take(&mut self.expired)
    }

    fn hand_out(&mut self, token: String) -> String {
        self.next_index += 1;
        self.current = Some(token.clone());
        token
    }

    fn advance(&self, token: &str) -> Result<String, CursorError> {
        self.sequencer
            .advance(token)
            .map_err(|source| CursorError::Malformed {
                token: token.to_string(),
                source,
            })
    }

    fn is_expired(&self, slot: &PendingSlot) -> bool {
        let Some(skipped_at) = slot.skipped_at else {
            return false;
        };
        let Ok(lifetime) = chrono::Duration::from_std(self.slot_lifetime) else {
            return false;
        };
        skipped_at
            .checked_add_signed(lifetime)
            .is_some_and(|deadline| deadline < (self.clock)())
    }

    fn persist(&mut self) -> Result<(), CursorError> {
        let list = self.to_blob();
        (self.save)(&list)?;
        Ok(())
    }
}

/// Parse a persisted slot list. Unparseable timestamps are dropped.
pub fn parse_slotlist(slotlist: &str) -> Vec<PendingSlot> {
    slotlist
        .split(SLOTS_SEP)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(TIME_SEP) {
            Some((token, millis)) => PendingSlot {
                token: token.to_string(),
                skipped_at: millis
                    .parse::<i64>()
                    .ok()
                    .and_then(DateTime::from_timestamp_millis),
            },
            None => PendingSlot {
                token: entry.to_string(),
                skipped_at: None,
            },
        })
        .collect()
}
