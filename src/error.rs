//! Error types for slotmail.

use std::path::PathBuf;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("No home directory available to place {what}")]
    NoHomeDir { what: String },
}

/// Slot token errors raised by a sequencer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("Slot {token:?} is not valid base-32 (bad character {found:?})")]
    InvalidEncoding { token: String, found: char },
}

/// Slot cursor errors.
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("Malformed slot {token:?}: {source}")]
    Malformed {
        token: String,
        #[source]
        source: SlotError,
    },

    #[error("No slot has been returned yet, nothing to mark used")]
    NothingReturned,

    #[error("Failed to persist slot list: {0}")]
    Persist(#[from] PropsError),
}

/// Property file errors.
#[derive(Debug, thiserror::Error)]
pub enum PropsError {
    #[error("Failed to read property file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write property file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid property {name:?}: {reason}")]
    InvalidEntry { name: String, reason: String },
}

/// Delivery ledger errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Failed to read delivery log {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to append to delivery log {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Delivery log {path} has a corrupt entry at line {line}: {content:?}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        content: String,
    },
}

/// Channel store (registry) errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Channel with {remote} has not been initialized")]
    NotInitialized { remote: String },

    #[error("Invalid remote identity {remote:?}: {reason}")]
    InvalidIdentity { remote: String, reason: String },

    #[error("Couldn't create channel directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't list channels in {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Channel properties error: {0}")]
    Props(#[from] PropsError),
}

/// Errors from a single channel's operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {channel} is corrupt: property file has no '{field}' entry")]
    Corrupt { channel: String, field: String },

    #[error("Channel {channel} slot cursor failed: {source}")]
    Cursor {
        channel: String,
        #[source]
        source: CursorError,
    },

    #[error("Channel {channel} properties error: {source}")]
    Props {
        channel: String,
        #[source]
        source: PropsError,
    },

    #[error("Channel {channel} has a malformed slot {slot:?}; fix the entry in its property file")]
    MalformedSlot { channel: String, slot: String },

    #[error("Channel {channel} lost its connection to the store")]
    ConnectionTerminated { channel: String },

    #[error("Channel {channel} failed to insert message: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Channel {channel} has no free send slot within the look-ahead window")]
    NoSendSlot { channel: String },
}

/// Mailbox sink errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mailbox rejected message: {0}")]
    Rejected(String),

    #[error("Connection terminated while storing message")]
    ConnectionTerminated,
}

/// Acknowledgment scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum AckError {
    #[error("Failed to access acknowledgment queue {path}: {source}")]
    Queue {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
