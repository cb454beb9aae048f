//! Error types for makeme.
//!
//! Two categories: [`MailError`] for anything a mail operation can report
//! (some of it retryable), and [`FatalError`] for conditions that end the
//! process with a specific exit code.

use std::fmt;
use std::path::PathBuf;

/// Which connection an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// IMAP mailbox connection.
    Inbound,
    /// SMTP send connection.
    Outbound,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("IMAP"),
            Self::Outbound => f.write_str("SMTP"),
        }
    }
}

/// Errors reported by mail session operations.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("{link} authentication failed: {reason}")]
    Auth { link: Link, reason: String },

    #[error("{link} connection failed: {reason}")]
    Connect { link: Link, reason: String },

    #[error("Malformed {link} response: {reason}")]
    Protocol { link: Link, reason: String },

    #[error("Message rejected by SMTP server: {0}")]
    Rejected(String),

    #[error("Could not build message: {0}")]
    Compose(String),

    #[error("Could not read attachment {}: {source}", path.display())]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MailError {
    pub fn connect(link: Link, reason: impl Into<String>) -> Self {
        Self::Connect {
            link,
            reason: reason.into(),
        }
    }

    /// Broken-link failures: worth retrying or queuing for later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Protocol { .. })
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Conditions that terminate the process.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("{link} credentials rejected: {reason}")]
    Auth { link: Link, reason: String },

    #[error("Could not reach mailbox after {attempts} attempts: {reason}")]
    MailboxUnreachable { attempts: u32, reason: String },

    #[error("Could not deliver {count} pending replies: {reason}")]
    QueueFlush { count: usize, reason: String },

    #[error("Invalid refresh schedule: {0:?}")]
    InvalidSchedule(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

impl FatalError {
    /// Process exit code for this condition.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Auth {
                link: Link::Outbound,
                ..
            } => 2,
            Self::Auth {
                link: Link::Inbound,
                ..
            } => 3,
            Self::Config(ConfigError::MissingRequired { .. }) => 4,
            Self::Config(_) | Self::InvalidSchedule(_) => 1,
            Self::Unexpected(_) => 5,
            Self::MailboxUnreachable { .. } => 6,
            Self::QueueFlush { .. } => 7,
        }
    }
}

/// Result type alias for mail operations.
pub type Result<T> = std::result::Result<T, MailError>;
