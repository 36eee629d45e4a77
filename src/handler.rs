use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::{internal, smtp::mime::Headers};

/// Everything known about a message apart from its content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Body bytes consumed so far, after dot-decoding.
    pub bytes_read: usize,
    pub remote_addr: SocketAddr,
    /// The reverse path; empty for the null sender.
    pub from: String,
    /// Accepted recipients in RCPT order.
    pub recipients: Vec<String>,
}

/// Logs one wire line: `(remote ip, direction, line)`.
pub type LineLogger = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Application hooks invoked by every session.
///
/// A single handler is shared by all connections, so its methods may run
/// concurrently.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Receive a message.
    ///
    /// `body` yields everything after the header block. Reading past the
    /// configured size limit fails with [`crate::error::MessageTooBig`]; if
    /// that error is returned (with or without added context) the client is
    /// told the message was too big. Unread body bytes are drained and
    /// still counted against the limit once this returns `Ok`.
    async fn handle_message(
        &self,
        envelope: &Envelope,
        headers: &Headers,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> anyhow::Result<()>;

    /// Called once a message has been fully received and accepted.
    fn handle_success(&self, _envelope: &Envelope) {}

    /// Decide whether `to` is an acceptable recipient.
    fn accept_recipient(&self, _remote_addr: SocketAddr, _from: &str, _to: &str) -> bool {
        true
    }
}

/// Reads and drops every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard {
    pub verbose: bool,
}

#[async_trait]
impl Handler for Discard {
    async fn handle_message(
        &self,
        envelope: &Envelope,
        headers: &Headers,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> anyhow::Result<()> {
        let size = tokio::io::copy(body, &mut tokio::io::sink()).await?;

        if self.verbose {
            internal!(
                level = DEBUG,
                "Discarding message from <{}> for {:?}: {} headers, {} body bytes",
                envelope.from,
                envelope.recipients,
                headers.len(),
                size
            );
        }

        Ok(())
    }
}
