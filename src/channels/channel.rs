//! Persisted state of one peer-to-peer channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;

use super::envelope;
use super::ledger::DeliveryLog;
use super::props::PropsFile;
use crate::config::ChannelConfig;
use crate::error::{ChannelError, CursorError, PropsError};
use crate::slots::{SlotCursor, SlotSequencer, is_well_formed};
use crate::transport::{InsertError, StoreClient};

/// File name of the property file inside a channel directory.
pub const PROPS_FILE: &str = "props";

/// Property names in a channel's property file.
pub mod prop {
    pub const IS_INITIATOR: &str = "isInitiator";
    pub const FETCH_SLOT: &str = "fetchslot";
    pub const SEND_SLOT: &str = "sendslot";
    pub const PRIVATE_KEY: &str = "privatekey";
    pub const PUBLIC_KEY: &str = "publickey";
    pub const ACK_KEY: &str = "ackssk";
    pub const NEXT_MESSAGE_ID: &str = "nextmessageid";
}

/// Keypair a channel derives its store keys from.
#[derive(Clone)]
pub struct KeyPair {
    /// Insert key; concatenated with a slot it names a message document.
    pub private_key: SecretString,
    /// Request key matching `private_key`.
    pub public_key: String,
}

impl KeyPair {
    pub fn new(private_key: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            private_key: SecretString::from(private_key.into()),
            public_key: public_key.into(),
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"[REDACTED]")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// A message handed to the store by [`Channel::send`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentMessage {
    pub id: u64,
    pub slot: String,
}

/// Snapshot of a channel for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub remote: String,
    pub is_initiator: bool,
    /// Fetch frontier entries, head last.
    pub fetch_slots: usize,
    pub has_ack_key: bool,
    /// Number of delivered messages, `None` if the log is unreadable.
    pub delivered: Option<usize>,
    pub next_message_id: u64,
}

/// One end of a channel with a remote identity.
///
/// Instances are shared through [`ChannelStore`](super::ChannelStore);
/// callers must not run two passes on the same channel at once.
pub struct Channel {
    pub(super) dir: PathBuf,
    pub(super) remote: String,
    pub(super) props: PropsFile,
    pub(super) ledger: DeliveryLog,
    pub(super) config: ChannelConfig,
    pub(super) sequencer: Arc<dyn SlotSequencer>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("dir", &self.dir)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Open the channel stored in `dir`.
    pub(super) fn open(
        dir: PathBuf,
        remote: String,
        config: ChannelConfig,
        sequencer: Arc<dyn SlotSequencer>,
    ) -> Result<Self, PropsError> {
        let props = PropsFile::open(dir.join(PROPS_FILE))?;
        let ledger = DeliveryLog::new(&dir);
        Ok(Self {
            dir,
            remote,
            props,
            ledger,
            config,
            sequencer,
        })
    }

    /// The remote identity.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// The channel directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The channel's delivery ledger.
    pub fn ledger(&self) -> &DeliveryLog {
        &self.ledger
    }

    /// Whether the local side sent the handshake.
    pub fn is_initiator(&self) -> bool {
        self.props
            .get(prop::IS_INITIATOR)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Base key acknowledgments are published under, once known.
    pub fn ack_key(&self) -> Option<String> {
        self.props.get(prop::ACK_KEY).filter(|k| !k.is_empty())
    }

    /// Store the acknowledgment base key announced by the remote side.
    pub fn set_ack_key(&self, key: &str) -> Result<(), ChannelError> {
        self.props
            .put(prop::ACK_KEY, key)
            .map_err(|source| self.props_err(source))
    }

    /// Raw fetch frontier as persisted.
    pub fn fetch_slots(&self) -> Option<String> {
        self.props.get(prop::FETCH_SLOT)
    }

    /// Current state for display.
    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            remote: self.remote.clone(),
            is_initiator: self.is_initiator(),
            fetch_slots: self
                .fetch_slots()
                .map(|list| crate::slots::cursor::parse_slotlist(&list).len())
                .unwrap_or(0),
            has_ack_key: self.ack_key().is_some(),
            delivered: self.ledger.delivered_ids().ok().map(|ids| ids.len()),
            next_message_id: self.next_message_id(),
        }
    }

    /// Send `body` to the remote side.
    ///
    /// The next message id is persisted before the insert; an id is never
    /// handed out twice.
    pub async fn send(
        &self,
        client: &dyn StoreClient,
        body: &[u8],
    ) -> Result<SentMessage, ChannelError> {
        let slots = self.required(prop::SEND_SLOT)?;
        let base_key = self.required(prop::PRIVATE_KEY)?;

        let id = self.next_message_id();
        self.props
            .put(prop::NEXT_MESSAGE_ID, &(id + 1).to_string())
            .map_err(|source| self.props_err(source))?;
        let document = envelope::encode(id, body);

        let mut cursor = self.cursor(prop::SEND_SLOT, &slots);
        for _ in 0..=self.config.poll_ahead {
            let Some(slot) = cursor.next_slot().map_err(|source| self.cursor_err(source))? else {
                break;
            };
            if !is_well_formed(&slot) {
                return Err(ChannelError::MalformedSlot {
                    channel: self.name(),
                    slot,
                });
            }

            match client.insert(&format!("{base_key}{slot}"), &document).await {
                Ok(()) => {
                    cursor.mark_used().map_err(|source| self.cursor_err(source))?;
                    return Ok(SentMessage { id, slot });
                }
                // Someone already wrote here; the slot is burnt either way.
                Err(InsertError::Collision { .. }) => {
                    cursor.mark_used().map_err(|source| self.cursor_err(source))?;
                }
                Err(InsertError::ConnectionTerminated) => {
                    return Err(ChannelError::ConnectionTerminated {
                        channel: self.name(),
                    });
                }
                Err(InsertError::Failed(reason)) => {
                    return Err(ChannelError::SendFailed {
                        channel: self.name(),
                        reason,
                    });
                }
            }
        }

        Err(ChannelError::NoSendSlot {
            channel: self.name(),
        })
    }

    fn next_message_id(&self) -> u64 {
        self.props
            .get(prop::NEXT_MESSAGE_ID)
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
    }

    /// Cursor over the slot list stored under `prop`, persisting back to it.
    pub(super) fn cursor(&self, prop: &'static str, slotlist: &str) -> SlotCursor<'_> {
        let props = &self.props;
        SlotCursor::new(
            slotlist,
            Arc::clone(&self.sequencer),
            Box::new(move |list: &str| props.put(prop, list)),
        )
        .with_poll_ahead(self.config.poll_ahead)
        .with_slot_lifetime(self.config.slot_lifetime)
    }

    /// A required property, or a corruption error naming it.
    pub(super) fn required(&self, name: &str) -> Result<String, ChannelError> {
        self.props
            .get(name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ChannelError::Corrupt {
                channel: self.name(),
                field: name.to_string(),
            })
    }

    /// Name used in errors and logs: the channel directory.
    pub(super) fn name(&self) -> String {
        self.dir.display().to_string()
    }

    pub(super) fn cursor_err(&self, source: CursorError) -> ChannelError {
        ChannelError::Cursor {
            channel: self.name(),
            source,
        }
    }

    fn props_err(&self, source: PropsError) -> ChannelError {
        ChannelError::Props {
            channel: self.name(),
            source,
        }
    }
}
