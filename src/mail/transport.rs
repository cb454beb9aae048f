//! The seam between the session and the network.

use async_trait::async_trait;
use lettre::Message;
use secrecy::{ExposeSecret, SecretString};

use crate::error::Result;

/// Account credentials shared by both links.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub secret: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    /// Whether `other` names the same account with the same secret.
    pub fn same_as(&self, other: &Credentials) -> bool {
        self.username == other.username
            && self.secret.expose_secret() == other.secret.expose_secret()
    }
}

/// Where to fetch mail from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEndpoint {
    pub host: String,
    pub port: u16,
    /// Implicit TLS (IMAPS) when true, plain TCP otherwise.
    pub secure: bool,
}

/// Where to send mail through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEndpoint {
    pub host: String,
    pub port: u16,
    /// STARTTLS when true, plain SMTP otherwise.
    pub use_tls: bool,
}

/// An unread message as the server handed it over.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    pub data: Vec<u8>,
}

/// Network operations for both links.
///
/// Implementations hold at most one open connection per link. Errors must
/// be classified: credential rejections as `MailError::Auth`, broken links
/// as `MailError::Connect`, unparseable server responses as
/// `MailError::Protocol`.
#[async_trait]
pub trait MailTransport: Send {
    /// Open the mailbox connection and select the inbox.
    async fn connect_inbound(
        &mut self,
        endpoint: &InboundEndpoint,
        credentials: &Credentials,
    ) -> Result<()>;

    /// Close the mailbox connection. Never fails; errors are logged.
    async fn disconnect_inbound(&mut self);

    /// Every message currently flagged unread, without changing its flags.
    async fn fetch_unseen(&mut self) -> Result<Vec<RawMessage>>;

    /// Flag the given messages as read.
    async fn mark_seen(&mut self, uids: &[u32]) -> Result<()>;

    /// Open and authenticate the send connection.
    async fn connect_outbound(
        &mut self,
        endpoint: &OutboundEndpoint,
        credentials: &Credentials,
    ) -> Result<()>;

    /// Drop the send connection.
    async fn disconnect_outbound(&mut self);

    /// Transmit one message over the send connection.
    async fn send(&mut self, message: Message) -> Result<()>;
}
