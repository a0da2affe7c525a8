//! Where delivered messages end up.

mod maildir;

use std::io::BufRead;

use async_trait::async_trait;

pub use maildir::MaildirSink;

use crate::error::MailboxError;

/// Accepts message bodies fetched by a channel.
#[async_trait]
pub trait MailboxSink: Send + Sync {
    /// Store one message body received over `channel`.
    ///
    /// Returning an error leaves the slot unretired, so the message will be
    /// fetched and offered again on a later pass.
    async fn store(
        &self,
        channel: &str,
        body: &mut (dyn BufRead + Send),
    ) -> Result<(), MailboxError>;
}
