//! Running handler programs.
//!
//! A handler is invoked as
//! `handler <sender> <receiver> <subject> <body> [<attachments>]`
//! and waited on without a timeout.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::mail::Email;

/// What a handler wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerOutput {
    /// Directive stream.
    pub stdout: String,
    /// Fallback reply text.
    pub stderr: String,
    /// Exit code, if the process ran and exited normally.
    pub status: Option<i32>,
}

impl HandlerOutput {
    pub fn has_directives(&self) -> bool {
        !self.stdout.trim().is_empty()
    }
}

/// Run `handler` for `email` and collect its output.
///
/// A handler that cannot be started yields the launch error as its
/// stderr, so the failure reaches the sender like any other reply.
pub async fn run_handler(handler: &Path, email: &Email) -> HandlerOutput {
    let mut command = Command::new(handler);
    command
        .arg(&email.sender)
        .arg(email.receiver_list())
        .arg(&email.subject)
        .arg(&email.body);
    if let Some(attachments) = email.attachments_arg() {
        command.arg(attachments);
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(handler = %handler.display(), from = %email.sender, "Running handler");

    match command.output().await {
        Ok(output) => {
            if !output.status.success() {
                warn!(
                    handler = %handler.display(),
                    status = %output.status,
                    "Handler exited unsuccessfully"
                );
            }
            HandlerOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                status: output.status.code(),
            }
        }
        Err(e) => {
            warn!(handler = %handler.display(), "Failed to start handler: {e}");
            HandlerOutput {
                stdout: String::new(),
                stderr: format!("Failed to run {}: {e}\n", handler.display()),
                status: None,
            }
        }
    }
}
