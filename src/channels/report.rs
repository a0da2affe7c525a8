//! Outcome of a fetch pass.
//!
//! The engine records what happened to every slot it touched and how the
//! pass ended; whoever runs the pass decides how to surface it. [`PassReport::log`]
//! is the standard rendering.

use std::path::PathBuf;

use serde::Serialize;

use crate::transport::FetchErrorCode;

/// Why a fetched message was discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MalformedReason {
    MissingId,
    NonNumericId { value: String },
    /// Header not terminated by a blank line.
    NoBody,
    /// Header is not valid text.
    Unreadable,
}

/// Why a fetched message was left for a later pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeferReason {
    /// The downloaded artifact could not be read.
    ArtifactUnreadable { error: String },
    /// Unknown whether the message was already delivered.
    LedgerUnreadable { error: String },
    /// The mailbox refused or failed to store the message.
    MailboxFailed { error: String },
}

/// What happened to the acknowledgment of a delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AckStatus {
    Scheduled { key: String },
    /// No ack base key is configured; the sender will eventually time out.
    NoAckKey,
}

/// What happened at one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SlotOutcome {
    /// Nothing there yet.
    Empty { code: FetchErrorCode },
    /// The store ruled the slot out for good; retired.
    Retired {
        code: FetchErrorCode,
        message: String,
    },
    /// A skipped slot outlived its lifetime and was dropped.
    Expired,
    /// Unusable message; retired and discarded.
    Malformed { reason: MalformedReason },
    /// Message left in place to be fetched again.
    Deferred { id: Option<u64>, reason: DeferReason },
    /// Already delivered earlier; retired without touching the mailbox.
    Duplicate { id: u64 },
    /// Handed to the mailbox and retired.
    Delivered {
        id: u64,
        ack: AckStatus,
        /// Set if the delivery could not be written to the ledger.
        ledger_error: Option<String>,
    },
}

impl SlotOutcome {
    /// Whether this outcome marked the slot used.
    pub fn retires_slot(&self) -> bool {
        matches!(
            self,
            Self::Retired { .. } | Self::Malformed { .. } | Self::Duplicate { .. } | Self::Delivered { .. }
        )
    }
}

/// A slot and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotReport {
    pub slot: String,
    #[serde(flatten)]
    pub outcome: SlotOutcome,
}

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PassEnd {
    /// Every candidate in the look-ahead window was tried.
    Exhausted,
    /// The store connection went away; the pass stopped at `slot`.
    Terminated { slot: String },
    /// A slot of the wrong shape halted the pass. Needs manual repair.
    MalformedSlot { slot: String },
    /// The fetch cursor could not be saved; the pass stopped after the last
    /// recorded outcome. Retired slots may be fetched again next pass.
    PersistFailed { error: String },
}

/// Everything one fetch pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub remote: String,
    pub dir: PathBuf,
    pub outcomes: Vec<SlotReport>,
    pub end: PassEnd,
}

impl PassReport {
    pub(super) fn new(remote: String, dir: PathBuf) -> Self {
        Self {
            remote,
            dir,
            outcomes: Vec::new(),
            end: PassEnd::Exhausted,
        }
    }

    pub(super) fn push(&mut self, slot: String, outcome: SlotOutcome) {
        self.outcomes.push(SlotReport { slot, outcome });
    }

    /// Ids handed to the mailbox during the pass.
    pub fn delivered(&self) -> Vec<u64> {
        self.outcomes
            .iter()
            .filter_map(|r| match r.outcome {
                SlotOutcome::Delivered { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Number of slots marked used during the pass.
    pub fn retired_slots(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|r| r.outcome.retires_slot())
            .count()
    }

    /// Emit the report through `tracing`.
    pub fn log(&self) {
        let channel = self.dir.display().to_string();
        for SlotReport { slot, outcome } in &self.outcomes {
            match outcome {
                SlotOutcome::Empty { code } => {
                    tracing::trace!(channel = %channel, slot = %slot, code = %code, "No message in slot");
                }
                SlotOutcome::Retired { code, message } => {
                    tracing::info!(
                        channel = %channel,
                        slot = %slot,
                        code = %code,
                        message = %message,
                        "Fatal fetch failure, marked slot as used"
                    );
                }
                SlotOutcome::Expired => {
                    tracing::debug!(channel = %channel, slot = %slot, "Dropped expired slot");
                }
                SlotOutcome::Malformed { reason } => {
                    tracing::error!(
                        channel = %channel,
                        slot = %slot,
                        reason = ?reason,
                        "Got a message with an invalid header, discarding"
                    );
                }
                SlotOutcome::Deferred { id, reason } => match reason {
                    DeferReason::LedgerUnreadable { error } => tracing::error!(
                        channel = %channel,
                        slot = %slot,
                        id = ?id,
                        error = %error,
                        "Couldn't read delivery log; unknown whether message is a duplicate, leaving it to try later"
                    ),
                    DeferReason::MailboxFailed { error } | DeferReason::ArtifactUnreadable { error } => {
                        tracing::warn!(
                            channel = %channel,
                            slot = %slot,
                            id = ?id,
                            error = %error,
                            "Couldn't store message, leaving it to try later"
                        )
                    }
                },
                SlotOutcome::Duplicate { id } => {
                    tracing::info!(
                        channel = %channel,
                        slot = %slot,
                        id = id,
                        "Message id already logged as received, discarding"
                    );
                }
                SlotOutcome::Delivered {
                    id,
                    ack,
                    ledger_error,
                } => {
                    tracing::info!(channel = %channel, slot = %slot, id = id, "Message delivered");
                    if let Some(error) = ledger_error {
                        tracing::warn!(
                            channel = %channel,
                            id = id,
                            error = %error,
                            "Failed to write delivery log"
                        );
                    }
                    if *ack == AckStatus::NoAckKey {
                        tracing::warn!(
                            channel = %channel,
                            id = id,
                            "No ack key configured; this message will eventually bounce even though it was received"
                        );
                    }
                }
            }
        }

        match &self.end {
            PassEnd::Exhausted => tracing::debug!(
                channel = %channel,
                slots = self.outcomes.len(),
                delivered = self.delivered().len(),
                "Fetch pass complete"
            ),
            PassEnd::Terminated { slot } => tracing::warn!(
                channel = %channel,
                slot = %slot,
                "Connection terminated, fetch pass aborted"
            ),
            PassEnd::MalformedSlot { slot } => tracing::error!(
                channel = %channel,
                slot = %slot,
                "Ignoring malformed slot; fix the fetchslot entry of this channel"
            ),
            PassEnd::PersistFailed { error } => tracing::error!(
                channel = %channel,
                error = %error,
                delivered = self.delivered().len(),
                "Couldn't save fetch slots, fetch pass aborted"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample() -> PassReport {
        let mut report = PassReport::new("bob".to_string(), PathBuf::from("/acct/channels/bob"));
        report.push(
            "S0".to_string(),
            SlotOutcome::Empty {
                code: FetchErrorCode::DataNotFound,
            },
        );
        report.push("S1".to_string(), SlotOutcome::Duplicate { id: 3 });
        report.push(
            "S2".to_string(),
            SlotOutcome::Delivered {
                id: 4,
                ack: AckStatus::NoAckKey,
                ledger_error: None,
            },
        );
        report
    }

    #[test]
    fn test_counts() {
        let report = sample();
        assert_eq!(report.delivered(), vec![4]);
        assert_eq!(report.retired_slots(), 2);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            json["outcomes"][0],
            serde_json::json!({"slot": "S0", "outcome": "empty", "code": "data_not_found"})
        );
        assert_eq!(
            json["outcomes"][2]["ack"],
            serde_json::json!({"kind": "no_ack_key"})
        );
        assert_eq!(json["end"], serde_json::json!({"kind": "exhausted"}));
    }

    #[test]
    fn test_persist_failure_keeps_outcomes() {
        let mut report = sample();
        report.end = PassEnd::PersistFailed {
            error: "disk full".to_string(),
        };
        assert_eq!(report.delivered(), vec![4]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json["end"],
            serde_json::json!({"kind": "persist_failed", "error": "disk full"})
        );
        report.log();
    }

    #[test]
    fn test_log_does_not_panic() {
        let mut report = sample();
        report.end = PassEnd::MalformedSlot {
            slot: "SHORT".to_string(),
        };
        report.log();
    }
}
