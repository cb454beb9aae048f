//! Everything that talks to the mailbox provider.

pub mod email;
pub mod inbound;
pub mod queue;
pub mod remote;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use email::{Attachment, Email};
pub use queue::PendingQueue;
pub use remote::RemoteTransport;
pub use session::{MailSession, Reload, SessionSettings, SessionState};
pub use transport::{Credentials, InboundEndpoint, MailTransport, OutboundEndpoint, RawMessage};
