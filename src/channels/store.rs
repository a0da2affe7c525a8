//! Registry of channels per local account.
//!
//! Every channel directory maps to at most one live [`Channel`]. Two peers
//! asking for the same remote get the same instance, so property writes
//! made through one are seen by the other.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use secrecy::ExposeSecret;
use serde::Serialize;

use super::channel::{Channel, KeyPair, PROPS_FILE, prop};
use crate::config::ChannelConfig;
use crate::error::StoreError;
use crate::slots::{HashChain, SlotSequencer};

/// Directory inside an account holding one sub-directory per remote.
pub const CHANNELS_DIR: &str = "channels";

/// A local identity owning a set of channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Account {
    pub id: String,
    pub dir: PathBuf,
}

impl Account {
    pub fn new(id: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            dir: dir.into(),
        }
    }

    pub fn channels_dir(&self) -> PathBuf {
        self.dir.join(CHANNELS_DIR)
    }
}

/// Hands out shared channel instances.
pub struct ChannelStore {
    config: ChannelConfig,
    sequencer: Arc<dyn SlotSequencer>,
    channels: Mutex<HashMap<PathBuf, Arc<Channel>>>,
}

impl ChannelStore {
    /// Create a store whose channels walk the SHA-256 hash chain.
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_sequencer(config, Arc::new(HashChain))
    }

    /// Create a store with a custom slot sequencer.
    pub fn with_sequencer(config: ChannelConfig, sequencer: Arc<dyn SlotSequencer>) -> Self {
        Self {
            config,
            sequencer,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Directory of the channel between `account` and `remote`.
    pub fn channel_dir(account: &Account, remote: &str) -> Result<PathBuf, StoreError> {
        validate_identity(remote)?;
        Ok(account.channels_dir().join(remote))
    }

    /// Get the channel with `remote`.
    ///
    /// Fails with [`StoreError::NotInitialized`] if the channel directory
    /// has no property file yet.
    pub fn get_channel(&self, account: &Account, remote: &str) -> Result<Arc<Channel>, StoreError> {
        let dir = Self::channel_dir(account, remote)?;
        let mut channels = self.lock();
        if let Some(channel) = channels.get(&dir) {
            return Ok(Arc::clone(channel));
        }

        if !dir.join(PROPS_FILE).is_file() {
            return Err(StoreError::NotInitialized {
                remote: remote.to_string(),
            });
        }
        let channel = Arc::new(self.open(dir.clone(), remote)?);
        channels.insert(dir, Arc::clone(&channel));
        Ok(channel)
    }

    /// Create (or re-key) the channel with `remote`.
    ///
    /// All properties are written with one file replacement. If the channel
    /// is already live the write goes through the live instance.
    pub fn initialize_channel(
        &self,
        account: &Account,
        remote: &str,
        is_initiator: bool,
        fetch_slot: &str,
        send_slot: &str,
        keys: &KeyPair,
    ) -> Result<Arc<Channel>, StoreError> {
        let dir = Self::channel_dir(account, remote)?;
        let mut channels = self.lock();

        std::fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let channel = match channels.get(&dir) {
            Some(channel) => Arc::clone(channel),
            None => Arc::new(self.open(dir.clone(), remote)?),
        };
        channel.props.put_all(&[
            (prop::IS_INITIATOR, if is_initiator { "true" } else { "false" }),
            (prop::FETCH_SLOT, fetch_slot),
            (prop::SEND_SLOT, send_slot),
            (prop::PRIVATE_KEY, keys.private_key.expose_secret()),
            (prop::PUBLIC_KEY, keys.public_key.as_str()),
        ])?;
        channels.insert(dir, Arc::clone(&channel));

        tracing::info!(
            account = %account.id,
            remote = %remote,
            is_initiator,
            "Initialized channel"
        );
        Ok(channel)
    }

    /// Remote identities with an initialized channel, sorted.
    pub fn list_remotes(&self, account: &Account) -> Result<Vec<String>, StoreError> {
        let dir = account.channels_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::List { path: dir, source }),
        };

        let mut remotes = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::List {
                path: dir.clone(),
                source,
            })?;
            if !entry.path().join(PROPS_FILE).is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if validate_identity(&name).is_ok() => remotes.push(name),
                Ok(_) | Err(_) => {
                    tracing::debug!(path = %entry.path().display(), "Skipping unusable channel directory");
                }
            }
        }
        remotes.sort();
        Ok(remotes)
    }

    fn open(&self, dir: PathBuf, remote: &str) -> Result<Channel, StoreError> {
        Ok(Channel::open(
            dir,
            remote.to_string(),
            self.config.clone(),
            Arc::clone(&self.sequencer),
        )?)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<Channel>>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Remote identities become directory names.
fn validate_identity(remote: &str) -> Result<(), StoreError> {
    let reason = if remote.is_empty() {
        "identity is empty"
    } else if remote == "." || remote == ".." {
        "identity is a relative path component"
    } else if remote.contains(['/', '\\', '\0']) {
        "identity contains a path separator"
    } else {
        return Ok(());
    };
    Err(StoreError::InvalidIdentity {
        remote: remote.to_string(),
        reason: reason.to_string(),
    })
}
