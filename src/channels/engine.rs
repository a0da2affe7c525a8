//! The fetch pass.
//!
//! One pass walks the fetch cursor, polls the store at every candidate slot
//! and delivers what it finds. Slots are processed strictly in order; a slot
//! is only marked used once its fate is settled:
//!
//! | fetch / handling result          | slot      | pass     |
//! |----------------------------------|-----------|----------|
//! | connection terminated            | kept      | aborts   |
//! | fatal failure                    | retired   | continues|
//! | not found / transient failure    | kept      | continues|
//! | malformed message                | retired   | continues|
//! | ledger unreadable, mailbox error | kept      | continues|
//! | duplicate                        | retired   | continues|
//! | delivered                        | retired   | continues|
//! | cursor could not be saved        | unsaved   | aborts   |
//!
//! Delivery is at-most-once: the ledger is consulted before the mailbox and
//! written after it. A crash between retiring the slot and writing the
//! ledger is the one window left; the slot is already gone by then.

use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use super::channel::{Channel, prop};
use super::envelope::{EnvelopeHeader, IdProblem};
use super::report::{
    AckStatus, DeferReason, MalformedReason, PassEnd, PassReport, SlotOutcome,
};
use crate::acks::{AckScheduler, ack_key};
use crate::error::{ChannelError, CursorError, MailboxError};
use crate::mailbox::MailboxSink;
use crate::slots::{SlotCursor, is_well_formed};
use crate::transport::{FetchError, StoreClient};

/// A downloaded document, removed from disk when dropped.
struct Artifact(PathBuf);

impl Artifact {
    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Result of handling one fetched message.
enum Handled {
    Outcome(SlotOutcome),
    /// The connection went away mid-handling; the slot stays.
    Terminated,
    /// The slot's fate was settled but the cursor could not be saved.
    Unsaved(SlotOutcome, CursorError),
}

impl Channel {
    /// Run one fetch pass.
    ///
    /// Errors are reserved for a channel that cannot be polled at all
    /// (missing fetch slot or base key). Everything else, including a
    /// cursor that could not be saved, is recorded in the returned report.
    pub async fn fetch(
        &self,
        mailbox: &dyn MailboxSink,
        client: &dyn StoreClient,
        acks: &dyn AckScheduler,
    ) -> Result<PassReport, ChannelError> {
        let slots = self.required(prop::FETCH_SLOT)?;
        let base_key = self.required(prop::PRIVATE_KEY)?;

        let mut cursor = self.cursor(prop::FETCH_SLOT, &slots);
        let mut report = PassReport::new(self.remote.clone(), self.dir.clone());

        report.end = loop {
            let next = cursor.next_slot();
            for token in cursor.take_expired() {
                report.push(token, SlotOutcome::Expired);
            }
            let slot = match next {
                Ok(Some(slot)) => slot,
                Ok(None) => break PassEnd::Exhausted,
                Err(CursorError::Malformed { token, .. }) => {
                    break PassEnd::MalformedSlot { slot: token };
                }
                Err(source) => break self.persist_failed(source),
            };
            if !is_well_formed(&slot) {
                break PassEnd::MalformedSlot { slot };
            }

            let handled = match client.fetch(&format!("{base_key}{slot}")).await {
                Ok(path) => {
                    self.handle_message(&mut cursor, Artifact(path), mailbox, acks)
                        .await
                }
                Err(FetchError::ConnectionTerminated) => Handled::Terminated,
                Err(FetchError::Failed { code, message }) if code.is_fatal() => {
                    settle(&mut cursor, SlotOutcome::Retired { code, message })
                }
                Err(FetchError::Failed { code, .. }) => Handled::Outcome(SlotOutcome::Empty { code }),
            };

            match handled {
                Handled::Outcome(outcome) => report.push(slot, outcome),
                Handled::Terminated => break PassEnd::Terminated { slot },
                Handled::Unsaved(outcome, source) => {
                    report.push(slot, outcome);
                    break self.persist_failed(source);
                }
            }
        };

        Ok(report)
    }

    async fn handle_message(
        &self,
        cursor: &mut SlotCursor<'_>,
        artifact: Artifact,
        mailbox: &dyn MailboxSink,
        acks: &dyn AckScheduler,
    ) -> Handled {
        let file = match File::open(artifact.path()) {
            Ok(file) => file,
            Err(e) => {
                return Handled::Outcome(SlotOutcome::Deferred {
                    id: None,
                    reason: DeferReason::ArtifactUnreadable {
                        error: e.to_string(),
                    },
                });
            }
        };
        let mut reader = BufReader::new(file);

        let header = match EnvelopeHeader::read_from(&mut reader) {
            Ok(header) => header,
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return malformed(cursor, MalformedReason::Unreadable);
            }
            Err(e) => {
                return Handled::Outcome(SlotOutcome::Deferred {
                    id: None,
                    reason: DeferReason::ArtifactUnreadable {
                        error: e.to_string(),
                    },
                });
            }
        };

        let id = match header.id() {
            Ok(id) => id,
            Err(IdProblem::Missing) => return malformed(cursor, MalformedReason::MissingId),
            Err(IdProblem::NotNumeric(value)) => {
                return malformed(cursor, MalformedReason::NonNumericId { value });
            }
        };

        match self.ledger.is_delivered(id) {
            Ok(false) => {}
            Ok(true) => return settle(cursor, SlotOutcome::Duplicate { id }),
            Err(e) => {
                return Handled::Outcome(SlotOutcome::Deferred {
                    id: Some(id),
                    reason: DeferReason::LedgerUnreadable {
                        error: e.to_string(),
                    },
                });
            }
        }

        if !header.has_body() {
            return malformed(cursor, MalformedReason::NoBody);
        }

        match mailbox.store(&self.remote, &mut reader).await {
            Ok(()) => {}
            Err(MailboxError::ConnectionTerminated) => return Handled::Terminated,
            Err(e) => {
                return Handled::Outcome(SlotOutcome::Deferred {
                    id: Some(id),
                    reason: DeferReason::MailboxFailed {
                        error: e.to_string(),
                    },
                });
            }
        }
        drop(reader);
        drop(artifact);

        // The ledger and the ack follow delivery even if the cursor save fails.
        let retired = cursor.mark_used();
        let ledger_error = self.ledger.record_delivered(id).err().map(|e| e.to_string());
        let ack = match self.ack_key() {
            Some(base) => {
                let key = ack_key(&base, id);
                acks.schedule(key.clone());
                AckStatus::Scheduled { key }
            }
            None => AckStatus::NoAckKey,
        };
        let outcome = SlotOutcome::Delivered {
            id,
            ack,
            ledger_error,
        };
        match retired {
            Ok(()) => Handled::Outcome(outcome),
            Err(source) => Handled::Unsaved(outcome, source),
        }
    }

    fn persist_failed(&self, source: CursorError) -> PassEnd {
        PassEnd::PersistFailed {
            error: self.cursor_err(source).to_string(),
        }
    }
}

/// Retire the current slot with `outcome`.
fn settle(cursor: &mut SlotCursor<'_>, outcome: SlotOutcome) -> Handled {
    match cursor.mark_used() {
        Ok(()) => Handled::Outcome(outcome),
        Err(source) => Handled::Unsaved(outcome, source),
    }
}

fn malformed(cursor: &mut SlotCursor<'_>, reason: MalformedReason) -> Handled {
    settle(cursor, SlotOutcome::Malformed { reason })
}
