//! In-memory transport for unit tests.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lettre::Message;
use mail_parser::{MessageParser, MimeHeaders};

use super::session::SessionSettings;
use super::transport::{
    Credentials, InboundEndpoint, MailTransport, OutboundEndpoint, RawMessage,
};
use crate::dispatch::patterns::PatternTable;
use crate::error::{Link, MailError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Connect,
    Auth,
    Rejected,
}

impl Failure {
    fn into_error(self, link: Link) -> MailError {
        match self {
            Self::Connect => MailError::connect(link, "connection refused"),
            Self::Auth => MailError::Auth {
                link,
                reason: "bad credentials".into(),
            },
            Self::Rejected => MailError::Rejected("550 mailbox unavailable".into()),
        }
    }
}

/// A message as the mock saw it leave.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub to: Vec<String>,
    pub subject: Option<String>,
    pub body: String,
    pub attachments: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub inbox: Vec<RawMessage>,
    pub seen: Vec<u32>,
    pub sent: Vec<SentMessage>,
    pub inbound_logins: u32,
    pub outbound_logins: u32,
    pub inbound_failure: Option<Failure>,
    pub outbound_failure: Option<Failure>,
    pub send_failure: Option<Failure>,
    pub fetch_delay: Option<Duration>,
}

pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn state(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn connect_inbound(&mut self, _: &InboundEndpoint, _: &Credentials) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.inbound_logins += 1;
        match state.inbound_failure {
            Some(failure) => Err(failure.into_error(Link::Inbound)),
            None => Ok(()),
        }
    }

    async fn disconnect_inbound(&mut self) {}

    async fn fetch_unseen(&mut self) -> Result<Vec<RawMessage>> {
        let delay = self.state.lock().unwrap().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .inbox
            .iter()
            .filter(|m| !state.seen.contains(&m.uid))
            .cloned()
            .collect())
    }

    async fn mark_seen(&mut self, uids: &[u32]) -> Result<()> {
        self.state.lock().unwrap().seen.extend_from_slice(uids);
        Ok(())
    }

    async fn connect_outbound(&mut self, _: &OutboundEndpoint, _: &Credentials) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.outbound_logins += 1;
        match state.outbound_failure {
            Some(failure) => Err(failure.into_error(Link::Outbound)),
            None => Ok(()),
        }
    }

    async fn disconnect_outbound(&mut self) {}

    async fn send(&mut self, message: Message) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(failure) = state.send_failure {
            return Err(failure.into_error(Link::Outbound));
        }

        let to = message
            .envelope()
            .to()
            .iter()
            .map(|a| a.to_string())
            .collect();
        let raw = message.formatted();
        let parsed = MessageParser::default()
            .parse(&raw)
            .expect("mock received unparseable message");
        state.sent.push(SentMessage {
            to,
            subject: parsed.subject().map(str::to_string),
            body: parsed.body_text(0).map(|b| b.into_owned()).unwrap_or_default(),
            attachments: parsed
                .attachments()
                .map(|a| {
                    (
                        a.attachment_name().unwrap_or_default().to_string(),
                        a.contents().to_vec(),
                    )
                })
                .collect(),
        });
        Ok(())
    }
}

/// Session settings rooted in a scratch directory.
pub fn settings(dir: &Path) -> SessionSettings {
    SessionSettings {
        credentials: Credentials::new("me@example.com", "secret"),
        contact_address: None,
        inbound: InboundEndpoint {
            host: "imap.example.com".into(),
            port: 993,
            secure: true,
        },
        outbound: OutboundEndpoint {
            host: "smtp.example.com".into(),
            port: 587,
            use_tls: true,
        },
        reconnect_attempts: 2,
        schedule: "s1".into(),
        patterns: PatternTable::default(),
        attachment_dir: dir.join("attachments"),
        unsent_log: dir.join("unsent_emails.log"),
    }
}

/// A minimal RFC 5322 message.
pub fn raw_email(uid: u32, from: &str, subject: &str, body: &str) -> RawMessage {
    let data = format!(
        "From: {from}\r\nTo: me@example.com\r\nSubject: {subject}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\r\n{body}\r\n"
    );
    RawMessage {
        uid,
        data: data.into_bytes(),
    }
}
