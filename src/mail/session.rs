//! The shared mail session.
//!
//! One [`MailSession`] exists per process and every task receives an
//! `Arc` to it. All state behind it (credentials, both connections, the
//! pending queue, the pattern table, the schedule) sits behind a single
//! async mutex; holding the [`SessionState`] guard is the only way to touch
//! the network.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::email::Email;
use super::inbound::parse_message;
use super::queue::PendingQueue;
use super::transport::{Credentials, InboundEndpoint, MailTransport, OutboundEndpoint};
use crate::dispatch::patterns::PatternTable;
use crate::error::Result;

const WELCOME_SUBJECT: &str = "Welcome to makeme!";

const WELCOME_BODY: &str = "\
makeme lets you run commands on this computer from anywhere, simply by
sending an email to this address. Each configured pattern maps to a
script; when a message matches, the script runs and its output is
mailed back to you.";

/// Everything a session needs to start.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub credentials: Credentials,
    pub contact_address: Option<String>,
    pub inbound: InboundEndpoint,
    pub outbound: OutboundEndpoint,
    pub reconnect_attempts: u32,
    pub schedule: String,
    pub patterns: PatternTable,
    pub attachment_dir: PathBuf,
    pub unsent_log: PathBuf,
}

/// Replacement values applied by a configuration reload.
#[derive(Debug, Clone)]
pub struct Reload {
    pub credentials: Credentials,
    pub contact_address: Option<String>,
    pub patterns: PatternTable,
    pub schedule: String,
}

/// Shared handle to the account's connections and state.
pub struct MailSession {
    state: Mutex<SessionState>,
}

impl MailSession {
    pub fn new(settings: SessionSettings, transport: Box<dyn MailTransport>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SessionState {
                credentials: settings.credentials,
                contact_address: settings.contact_address,
                inbound: settings.inbound,
                outbound: settings.outbound,
                reconnect_attempts: settings.reconnect_attempts,
                schedule: settings.schedule,
                patterns: Arc::new(settings.patterns),
                attachment_dir: settings.attachment_dir,
                unsent_log: settings.unsent_log,
                transport,
                pending: PendingQueue::new(),
            }),
        })
    }

    /// Acquire the session lock.
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }
}

/// Session fields and operations, reachable only through [`MailSession::lock`].
pub struct SessionState {
    credentials: Credentials,
    contact_address: Option<String>,
    inbound: InboundEndpoint,
    outbound: OutboundEndpoint,
    reconnect_attempts: u32,
    schedule: String,
    patterns: Arc<PatternTable>,
    attachment_dir: PathBuf,
    unsent_log: PathBuf,
    transport: Box<dyn MailTransport>,
    pending: PendingQueue,
}

impl SessionState {
    pub async fn login_inbound(&mut self) -> Result<()> {
        self.transport
            .connect_inbound(&self.inbound, &self.credentials)
            .await
    }

    pub async fn logout_inbound(&mut self) {
        self.transport.disconnect_inbound().await;
    }

    pub async fn login_outbound(&mut self) -> Result<()> {
        debug!(host = %self.outbound.host, port = self.outbound.port, "Logging in SMTP");
        self.transport
            .connect_outbound(&self.outbound, &self.credentials)
            .await
    }

    pub async fn logout_outbound(&mut self) {
        self.transport.disconnect_outbound().await;
    }

    /// All unread messages, parsed. Only messages that parse are flagged as
    /// read; the rest stay unread on the server.
    pub async fn fetch_unread(&mut self) -> Result<Vec<Email>> {
        let raw = self.transport.fetch_unseen().await?;

        let mut emails = Vec::with_capacity(raw.len());
        let mut parsed_uids = Vec::with_capacity(raw.len());
        for message in raw {
            match parse_message(&message.data, &self.attachment_dir) {
                Some(email) => {
                    debug!(uid = message.uid, from = %email.sender, subject = %email.subject, "Received email");
                    emails.push(email);
                    parsed_uids.push(message.uid);
                }
                None => warn!(uid = message.uid, "Could not parse message, leaving it unread"),
            }
        }

        self.transport.mark_seen(&parsed_uids).await?;
        if !emails.is_empty() {
            info!(count = emails.len(), "Fetched new emails");
        }
        Ok(emails)
    }

    /// Serialize and transmit one email over the outbound link.
    pub async fn send(&mut self, email: &Email) -> Result<()> {
        info!(to = %email.receiver_list(), subject = %email.subject, "Sending message");
        let message = email.to_message()?;
        self.transport.send(message).await?;
        debug!("Message sent");
        Ok(())
    }

    /// Swap in reloaded configuration. Changed credentials force a fresh
    /// outbound login.
    pub async fn reload(&mut self, update: Reload) -> Result<()> {
        let credentials_changed = !self.credentials.same_as(&update.credentials);

        self.credentials = update.credentials;
        self.contact_address = update.contact_address;
        self.patterns = Arc::new(update.patterns);
        self.schedule = update.schedule;
        info!(
            patterns = self.patterns.len(),
            schedule = %self.schedule,
            "Configuration reloaded"
        );

        if credentials_changed {
            info!(username = %self.credentials.username, "Credentials changed, logging in again");
            self.transport.disconnect_outbound().await;
            self.login_outbound().await?;
        }
        Ok(())
    }

    /// Introductory message to the contact address.
    pub async fn send_intro_email(&mut self) -> Result<()> {
        let email = Email::new(
            None,
            vec![self.contact_address().to_string()],
            WELCOME_SUBJECT,
            WELCOME_BODY,
        );
        self.send(&email).await
    }

    /// Send the introductory message unless `marker` shows it already went
    /// out. Returns whether it was sent on this call.
    pub async fn send_welcome_once(&mut self, marker: &Path) -> Result<bool> {
        if marker.exists() {
            debug!(marker = %marker.display(), "Welcome email already sent");
            return Ok(false);
        }
        self.send_intro_email().await?;
        if let Err(e) = std::fs::write(marker, format!("{}\n", self.contact_address())) {
            warn!(marker = %marker.display(), "Could not record welcome email: {e}");
        }
        Ok(true)
    }

    /// Where system messages go: the contact address, or the account itself.
    pub fn contact_address(&self) -> &str {
        self.contact_address
            .as_deref()
            .unwrap_or(&self.credentials.username)
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    /// Snapshot of the pattern table in force right now.
    pub fn patterns(&self) -> Arc<PatternTable> {
        Arc::clone(&self.patterns)
    }

    pub fn schedule(&self) -> &str {
        &self.schedule
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn unsent_log(&self) -> &Path {
        &self.unsent_log
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingQueue {
        &mut self.pending
    }
}
