//! Periodic fetch passes over every channel of an account.
//!
//! Peers are polled concurrently; one peer never has more than one pass in
//! flight. Pass reports are logged here, once, after the pass returns.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;

use crate::acks::AckScheduler;
use crate::channels::{Account, ChannelStore, PassEnd, PassReport};
use crate::error::StoreError;
use crate::mailbox::MailboxSink;
use crate::transport::StoreClient;

/// Result of polling one peer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeerPoll {
    Completed { report: PassReport },
    /// A pass for this peer was still running; skipped.
    Busy { remote: String },
    Failed { remote: String, error: String },
}

impl PeerPoll {
    fn log(&self) {
        match self {
            Self::Completed { report } => report.log(),
            Self::Busy { remote } => {
                tracing::debug!(remote = %remote, "Previous pass still running, skipping")
            }
            Self::Failed { remote, error } => {
                tracing::error!(remote = %remote, error = %error, "Fetch pass failed")
            }
        }
    }
}

/// Totals over one polling round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoundSummary {
    pub peers: usize,
    pub delivered: usize,
    pub terminated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RoundSummary {
    pub fn from_results(results: &[PeerPoll]) -> Self {
        let mut summary = Self {
            peers: results.len(),
            ..Self::default()
        };
        for result in results {
            match result {
                PeerPoll::Completed { report } => {
                    summary.delivered += report.delivered().len();
                    match report.end {
                        PassEnd::Terminated { .. } => summary.terminated += 1,
                        PassEnd::PersistFailed { .. } => summary.failed += 1,
                        _ => {}
                    }
                }
                PeerPoll::Busy { .. } => summary.skipped += 1,
                PeerPoll::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }
}

/// Runs fetch passes for all initialized channels of one account.
pub struct ChannelPoller {
    store: Arc<ChannelStore>,
    account: Account,
    client: Arc<dyn StoreClient>,
    mailbox: Arc<dyn MailboxSink>,
    acks: Arc<dyn AckScheduler>,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChannelPoller {
    pub fn new(
        store: Arc<ChannelStore>,
        account: Account,
        client: Arc<dyn StoreClient>,
        mailbox: Arc<dyn MailboxSink>,
        acks: Arc<dyn AckScheduler>,
    ) -> Self {
        Self {
            store,
            account,
            client,
            mailbox,
            acks,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Poll every peer once and log the outcome.
    pub async fn poll_once(&self) -> Result<Vec<PeerPoll>, StoreError> {
        let remotes = self.store.list_remotes(&self.account)?;
        let results = join_all(remotes.iter().map(|remote| self.poll_peer(remote))).await;
        for result in &results {
            result.log();
        }
        Ok(results)
    }

    /// Poll on a fixed interval until `shutdown` flips to true or its
    /// sender is dropped.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            account = %self.account.id,
            interval_secs = interval.as_secs(),
            "Channel polling started"
        );

        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.poll_once().await {
                        Ok(results) => {
                            let summary = RoundSummary::from_results(&results);
                            tracing::debug!(
                                peers = summary.peers,
                                delivered = summary.delivered,
                                failed = summary.failed,
                                "Polling round complete"
                            );
                        }
                        Err(e) => tracing::error!(error = %e, "Couldn't list channels"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(account = %self.account.id, "Channel polling stopped");
    }

    async fn poll_peer(&self, remote: &str) -> PeerPoll {
        let Ok(_guard) = self.peer_lock(remote).try_lock_owned() else {
            return PeerPoll::Busy {
                remote: remote.to_string(),
            };
        };

        let failed = |error: String| PeerPoll::Failed {
            remote: remote.to_string(),
            error,
        };
        let channel = match self.store.get_channel(&self.account, remote) {
            Ok(channel) => channel,
            Err(e) => return failed(e.to_string()),
        };
        match channel
            .fetch(self.mailbox.as_ref(), self.client.as_ref(), self.acks.as_ref())
            .await
        {
            Ok(report) => PeerPoll::Completed { report },
            Err(e) => failed(e.to_string()),
        }
    }

    fn peer_lock(&self, remote: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(in_flight.entry(remote.to_string()).or_default())
    }
}
