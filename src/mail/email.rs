//! The [`Email`] value type and its outbound wire form.

use std::fmt;
use std::path::{Path, PathBuf};

use lettre::Message;
use lettre::message::header::{ContentDisposition, ContentTransferEncoding, ContentType};
use lettre::message::{Body, Mailbox, MultiPart, SinglePart};
use regex::Regex;

use crate::error::MailError;

/// A file carried by an email: display name plus where its bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub path: PathBuf,
}

impl Attachment {
    /// Attachment named after the base filename of `path`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = base_name(&path.to_string_lossy());
        Self { name, path }
    }
}

/// A message in flight, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub sender: String,
    pub receivers: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl Email {
    /// Build an email. Without an explicit sender the message is
    /// self-addressed: the first receiver becomes the sender.
    pub fn new(
        sender: Option<String>,
        receivers: impl IntoIterator<Item = String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let receivers: Vec<String> = receivers.into_iter().collect();
        let sender = sender
            .filter(|s| !s.trim().is_empty())
            .or_else(|| receivers.first().cloned())
            .unwrap_or_default();

        Self {
            sender,
            receivers,
            subject: subject.into(),
            body: body.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Whether the subject or the body contains a match for `pattern`.
    pub fn matches(&self, pattern: &Regex) -> bool {
        pattern.is_match(&self.subject) || pattern.is_match(&self.body)
    }

    /// Receivers as a single comma-separated header value.
    pub fn receiver_list(&self) -> String {
        self.receivers.join(", ")
    }

    pub fn reply_subject(&self) -> String {
        format!("RE: {}", self.subject)
    }

    /// Attachment list encoded for a handler's command line: a JSON array
    /// of `[name, path]` pairs. `None` when there are no attachments.
    pub fn attachments_arg(&self) -> Option<String> {
        if self.attachments.is_empty() {
            return None;
        }
        let pairs: Vec<(&str, String)> = self
            .attachments
            .iter()
            .map(|a| (a.name.as_str(), a.path.to_string_lossy().into_owned()))
            .collect();
        serde_json::to_string(&pairs).ok()
    }

    /// Serialize to a multipart MIME message: a plain-text body followed by
    /// one base64 `application/octet-stream` part per attachment.
    ///
    /// Attachment files are read at this point, not when they were attached.
    pub fn to_message(&self) -> Result<Message, MailError> {
        let mut builder = Message::builder()
            .from(parse_mailbox(&self.sender)?)
            .subject(self.subject.clone())
            .date_now();
        for receiver in &self.receivers {
            builder = builder.to(parse_mailbox(receiver)?);
        }

        let octet_stream: ContentType = "application/octet-stream"
            .parse()
            .map_err(|e| MailError::Compose(format!("content type: {e}")))?;

        let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(self.body.clone()));
        for attachment in &self.attachments {
            let content = std::fs::read(&attachment.path).map_err(|source| MailError::Attachment {
                path: attachment.path.clone(),
                source,
            })?;
            let body = Body::new_with_encoding(content, ContentTransferEncoding::Base64)
                .map_err(|_| MailError::Compose(format!("could not encode {}", attachment.name)))?;
            multipart = multipart.singlepart(
                SinglePart::builder()
                    .header(octet_stream.clone())
                    .header(ContentDisposition::attachment(&base_name(&attachment.name)))
                    .body(body),
            );
        }

        builder
            .multipart(multipart)
            .map_err(|e| MailError::Compose(e.to_string()))
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.attachments.iter().map(|a| a.name.as_str()).collect();
        write!(
            f,
            "from={} to={} subject={:?} body={:?} attachments={:?}",
            self.sender,
            self.receiver_list(),
            self.subject,
            self.body,
            names
        )
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .trim()
        .parse()
        .map_err(|e| MailError::Compose(format!("invalid address {address:?}: {e}")))
}

/// Strip any directory components, keeping only the file name.
pub(crate) fn base_name(name: &str) -> String {
    let trimmed = name.trim_end_matches(['/', '\\']);
    let base = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        "attachment".to_string()
    } else {
        base.to_string()
    }
}

/// Whether `path` points somewhere a reply could attach from.
pub(crate) fn is_attachable(path: &Path) -> bool {
    path.is_file()
}
