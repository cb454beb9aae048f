//! Replies waiting for a working SMTP link, and the log they go to when
//! that link never comes back.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::Local;
use tracing::{error, info};

use super::email::Email;

/// Ordered holding area for undelivered replies.
#[derive(Debug, Default)]
pub struct PendingQueue {
    emails: VecDeque<Email>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, email: Email) {
        info!(to = %email.receiver_list(), queued = self.emails.len() + 1, "Reply queued for later delivery");
        self.emails.push_back(email);
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Email> {
        self.emails.iter()
    }

    /// Take the oldest reply.
    pub fn pop(&mut self) -> Option<Email> {
        self.emails.pop_front()
    }

    /// Put a reply back at the head of the queue.
    pub fn restore(&mut self, email: Email) {
        self.emails.push_front(email);
    }

    /// Empty the queue, oldest first.
    pub fn drain(&mut self) -> Vec<Email> {
        self.emails.drain(..).collect()
    }
}

/// Append an undeliverable batch to the failure log at `path`.
///
/// Each episode is a timestamp header, the reason, then one line per email.
pub fn persist(path: &Path, reason: &str, emails: &[Email]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    writeln!(file, "[{}]", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(file, "Reason: {reason}")?;
    for email in emails {
        writeln!(file, "{email}")?;
    }
    file.flush()?;

    error!(
        path = %path.display(),
        count = emails.len(),
        "Saved undeliverable replies to failure log"
    );
    Ok(())
}
