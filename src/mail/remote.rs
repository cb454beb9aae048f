//! IMAP + SMTP transport.
//!
//! Inbound uses the `imap` client over either plain TCP or rustls;
//! outbound uses lettre's pooled `SmtpTransport`. Both libraries block, so
//! every network call runs on the blocking pool.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::Error as SmtpError;
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use super::transport::{Credentials, InboundEndpoint, MailTransport, OutboundEndpoint, RawMessage};
use crate::error::{Link, MailError, Result};

/// Socket read/write timeout for both links.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Port on which SMTP expects TLS from the first byte rather than STARTTLS.
const SMTPS_PORT: u16 = 465;

const INBOX: &str = "INBOX";

/// SMTP replies meaning the server refused our credentials.
const AUTH_REJECTED: [u16; 3] = [530, 534, 535];

type ImapSession = imap::Session<ImapStream>;

/// Mailbox connection, with or without TLS.
enum ImapStream {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Read for ImapStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf),
            Self::Tls(s) => s.read(buf),
        }
    }
}

impl Write for ImapStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.write(buf),
            Self::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(s) => s.flush(),
            Self::Tls(s) => s.flush(),
        }
    }
}

/// Live IMAP + SMTP connections for one account.
#[derive(Default)]
pub struct RemoteTransport {
    inbound: Option<ImapSession>,
    outbound: Option<SmtpTransport>,
}

impl RemoteTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a blocking operation against the open IMAP session.
    async fn with_inbound<T, F>(&mut self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession) -> Result<T> + Send + 'static,
    {
        let mut session = self
            .inbound
            .take()
            .ok_or_else(|| MailError::connect(Link::Inbound, "not logged in"))?;

        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut session);
            (session, result)
        })
        .await
        .map_err(|e| MailError::connect(Link::Inbound, format!("IMAP task panicked: {e}")))?;

        // A dead socket is not worth keeping around.
        if !matches!(result, Err(MailError::Connect { .. })) {
            self.inbound = Some(session);
        }
        result
    }
}

#[async_trait]
impl MailTransport for RemoteTransport {
    async fn connect_inbound(
        &mut self,
        endpoint: &InboundEndpoint,
        credentials: &Credentials,
    ) -> Result<()> {
        self.disconnect_inbound().await;

        let endpoint = endpoint.clone();
        let username = credentials.username.clone();
        let secret = credentials.secret.expose_secret().to_string();

        let session = tokio::task::spawn_blocking(move || open_imap(&endpoint, &username, &secret))
            .await
            .map_err(|e| MailError::connect(Link::Inbound, format!("IMAP task panicked: {e}")))??;

        self.inbound = Some(session);
        info!("IMAP logged in");
        Ok(())
    }

    async fn disconnect_inbound(&mut self) {
        let Some(mut session) = self.inbound.take() else {
            return;
        };
        debug!("Logging out IMAP");
        // The server may already have hung up on us; nothing to recover.
        let _ = tokio::task::spawn_blocking(move || {
            if let Err(e) = session.logout() {
                debug!("IMAP logout failed: {e}");
            }
        })
        .await;
        info!("IMAP logged out");
    }

    async fn fetch_unseen(&mut self) -> Result<Vec<RawMessage>> {
        self.with_inbound(|session| {
            let mut uids: Vec<u32> = session
                .uid_search("UNSEEN")
                .map_err(inbound_error)?
                .into_iter()
                .collect();
            uids.sort_unstable();

            if uids.is_empty() {
                debug!("There are no new emails");
                return Ok(Vec::new());
            }
            debug!(count = uids.len(), "Found unseen emails");

            let uid_set = join_uids(&uids);
            let fetches = session
                .uid_fetch(&uid_set, "BODY.PEEK[]")
                .map_err(inbound_error)?;

            let mut messages = Vec::with_capacity(uids.len());
            for fetch in fetches.iter() {
                let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) else {
                    return Err(MailError::Protocol {
                        link: Link::Inbound,
                        reason: format!("FETCH response without UID or body: {fetch:?}"),
                    });
                };
                messages.push(RawMessage {
                    uid,
                    data: body.to_vec(),
                });
            }
            Ok(messages)
        })
        .await
    }

    async fn mark_seen(&mut self, uids: &[u32]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let uid_set = join_uids(uids);
        self.with_inbound(move |session| {
            session
                .uid_store(&uid_set, "+FLAGS (\\Seen)")
                .map(|_| ())
                .map_err(inbound_error)
        })
        .await
    }

    async fn connect_outbound(
        &mut self,
        endpoint: &OutboundEndpoint,
        credentials: &Credentials,
    ) -> Result<()> {
        self.outbound = None;

        let transport = build_smtp(endpoint, credentials)?;
        let probe = transport.clone();
        let reachable = tokio::task::spawn_blocking(move || probe.test_connection())
            .await
            .map_err(|e| MailError::connect(Link::Outbound, format!("SMTP task panicked: {e}")))?
            .map_err(|e| {
                if e.is_permanent() {
                    auth_rejected(&e)
                } else {
                    MailError::connect(Link::Outbound, e.to_string())
                }
            })?;

        if !reachable {
            return Err(MailError::connect(
                Link::Outbound,
                format!("{}:{} did not answer", endpoint.host, endpoint.port),
            ));
        }

        self.outbound = Some(transport);
        info!("SMTP logged in");
        Ok(())
    }

    async fn disconnect_outbound(&mut self) {
        if self.outbound.take().is_some() {
            info!("SMTP logged out");
        }
    }

    async fn send(&mut self, message: Message) -> Result<()> {
        let transport = self
            .outbound
            .clone()
            .ok_or_else(|| MailError::connect(Link::Outbound, "not logged in"))?;

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| MailError::connect(Link::Outbound, format!("SMTP task panicked: {e}")))?
            .map(|_| ())
            .map_err(send_error)
    }
}

fn open_imap(endpoint: &InboundEndpoint, username: &str, secret: &str) -> Result<ImapSession> {
    debug!(host = %endpoint.host, port = endpoint.port, "Logging in IMAP");

    let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .map_err(|e| MailError::connect(Link::Inbound, e.to_string()))?;
    tcp.set_read_timeout(Some(IO_TIMEOUT))
        .and_then(|()| tcp.set_write_timeout(Some(IO_TIMEOUT)))
        .map_err(|e| MailError::connect(Link::Inbound, e.to_string()))?;

    let stream = if endpoint.secure {
        ImapStream::Tls(Box::new(tls_stream(&endpoint.host, tcp)?))
    } else {
        ImapStream::Plain(tcp)
    };

    let mut client = imap::Client::new(stream);
    client.read_greeting().map_err(inbound_error)?;

    let mut session = client
        .login(username, secret)
        .map_err(|(e, _client)| match e {
            imap::Error::No(reason) | imap::Error::Bad(reason) => MailError::Auth {
                link: Link::Inbound,
                reason,
            },
            other => inbound_error(other),
        })?;

    session.select(INBOX).map_err(inbound_error)?;
    Ok(session)
}

fn tls_stream(
    host: &str,
    tcp: TcpStream,
) -> Result<rustls::StreamOwned<rustls::ClientConnection, TcpStream>> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| MailError::connect(Link::Inbound, format!("invalid server name: {e}")))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| MailError::connect(Link::Inbound, format!("TLS setup failed: {e}")))?;
    Ok(rustls::StreamOwned::new(conn, tcp))
}

fn build_smtp(endpoint: &OutboundEndpoint, credentials: &Credentials) -> Result<SmtpTransport> {
    let creds = SmtpCredentials::new(
        credentials.username.clone(),
        credentials.secret.expose_secret().to_string(),
    );

    let builder = if endpoint.use_tls && endpoint.port == SMTPS_PORT {
        SmtpTransport::relay(&endpoint.host)
    } else if endpoint.use_tls {
        SmtpTransport::starttls_relay(&endpoint.host)
    } else {
        Ok(SmtpTransport::builder_dangerous(&endpoint.host))
    }
    .map_err(|e| MailError::connect(Link::Outbound, format!("SMTP relay error: {e}")))?;

    Ok(builder
        .port(endpoint.port)
        .credentials(creds)
        .timeout(Some(IO_TIMEOUT))
        .build())
}

/// Each send logs in again, so a credential failure can surface here.
fn send_error(e: SmtpError) -> MailError {
    if is_auth_rejection(&e) {
        auth_rejected(&e)
    } else if e.is_permanent() {
        MailError::Rejected(e.to_string())
    } else {
        warn!("SMTP send failed: {e}");
        MailError::connect(Link::Outbound, e.to_string())
    }
}

fn is_auth_rejection(e: &SmtpError) -> bool {
    e.status()
        .is_some_and(|code| AUTH_REJECTED.contains(&u16::from(code)))
}

fn auth_rejected(e: &SmtpError) -> MailError {
    MailError::Auth {
        link: Link::Outbound,
        reason: e.to_string(),
    }
}

fn inbound_error(e: imap::Error) -> MailError {
    match e {
        imap::Error::Io(e) => MailError::connect(Link::Inbound, e.to_string()),
        imap::Error::ConnectionLost => MailError::connect(Link::Inbound, "connection lost"),
        other => MailError::Protocol {
            link: Link::Inbound,
            reason: other.to_string(),
        },
    }
}

fn join_uids(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
