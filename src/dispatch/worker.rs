//! The per-message worker.
//!
//! A [`Dispatcher`] owns one matched inbound email. It runs the mapped
//! handler, turns the handler's output into a reply and hands that reply
//! to the shared session. A reply that cannot go out because the SMTP link
//! is down is parked in the pending queue for the cycle's flush.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::directive::{Directive, parse_directives};
use super::handler::{HandlerOutput, run_handler};
use crate::error::{FatalError, MailError};
use crate::mail::email::is_attachable;
use crate::mail::{Attachment, Email, MailSession};

/// How a dispatched reply left the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Outbound link broken; reply waits in the pending queue.
    Queued,
    /// The reply could never be delivered as built and was discarded.
    Dropped,
}

pub struct Dispatcher {
    session: Arc<MailSession>,
    email: Email,
    handler: PathBuf,
}

impl Dispatcher {
    pub fn new(session: Arc<MailSession>, email: Email, handler: PathBuf) -> Self {
        Self {
            session,
            email,
            handler,
        }
    }

    /// Run the handler and deliver (or queue) its reply.
    ///
    /// Only a rejected SMTP login escalates; every other delivery problem
    /// is settled here.
    pub async fn run(self) -> Result<DispatchOutcome, FatalError> {
        info!(
            from = %self.email.sender,
            subject = %self.email.subject,
            handler = %self.handler.display(),
            "Dispatching email"
        );
        let output = run_handler(&self.handler, &self.email).await;
        debug!(
            handler = %self.handler.display(),
            status = ?output.status,
            directives = output.has_directives(),
            "Handler finished"
        );

        let account = self.session.lock().await.username().to_string();
        let reply = build_reply(&self.email, &output, &account);
        deliver(&self.session, reply).await
    }
}

/// Build the reply to `original` from what its handler wrote.
///
/// Directives on stdout shape the reply and its body stays empty. With no
/// directives, stderr becomes the body. Attachments naming files that do
/// not exist are skipped. The reply is sent from `account`.
pub fn build_reply(original: &Email, output: &HandlerOutput, account: &str) -> Email {
    let mut reply_to = original.sender.clone();
    let mut attachments = Vec::new();

    let body = if output.has_directives() {
        for directive in parse_directives(&output.stdout) {
            match directive {
                Directive::AttachFile(path) => {
                    if is_attachable(&path) {
                        attachments.push(Attachment::from_path(path));
                    } else {
                        warn!(path = %path.display(), "Handler asked to attach a missing file, skipping");
                    }
                }
                Directive::ChangeReplyAddress(address) => {
                    debug!(to = %address, "Handler changed reply address");
                    reply_to = address;
                }
            }
        }
        String::new()
    } else {
        output.stderr.clone()
    };

    let mut reply = Email::new(
        Some(account.to_string()),
        vec![reply_to],
        original.reply_subject(),
        body,
    );
    reply.attachments = attachments;
    reply
}

/// Send `reply` under the session lock, queuing it if the link is broken.
pub async fn deliver(
    session: &MailSession,
    reply: Email,
) -> Result<DispatchOutcome, FatalError> {
    let mut state = session.lock().await;
    match state.send(&reply).await {
        Ok(()) => Ok(DispatchOutcome::Sent),
        Err(e) if e.is_retryable() => {
            warn!(to = %reply.receiver_list(), "Send failed, queuing reply: {e}");
            state.pending_mut().push(reply);
            Ok(DispatchOutcome::Queued)
        }
        Err(MailError::Auth { link, reason }) => {
            error!(%link, "Credentials rejected while sending reply");
            state.pending_mut().push(reply);
            Err(FatalError::Auth { link, reason })
        }
        Err(e) => {
            error!(to = %reply.receiver_list(), subject = %reply.subject, "Dropping reply: {e}");
            Ok(DispatchOutcome::Dropped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Link;
    use crate::mail::mock::{Failure, MockTransport, settings};

    const ACCOUNT: &str = "me@example.com";

    fn inbound() -> Email {
        Email::new(
            Some("alice@example.com".into()),
            vec!["me@example.com".to_string()],
            "status",
            "uptime please",
        )
    }

    fn output(stdout: &str, stderr: &str) -> HandlerOutput {
        HandlerOutput {
            stdout: stdout.into(),
            stderr: stderr.into(),
            status: Some(0),
        }
    }

    #[test]
    fn stderr_becomes_body_without_directives() {
        let reply = build_reply(&inbound(), &output("", "up 3 days\n"), ACCOUNT);
        assert_eq!(reply.sender, "me@example.com");
        assert_eq!(reply.receivers, vec!["alice@example.com"]);
        assert_eq!(reply.subject, "RE: status");
        assert_eq!(reply.body, "up 3 days\n");
        assert!(reply.attachments.is_empty());
    }

    #[test]
    fn reply_comes_from_the_account_even_without_to_header() {
        let bcc = Email::new(
            Some("alice@example.com".into()),
            Vec::<String>::new(),
            "status",
            "",
        );
        let reply = build_reply(&bcc, &output("", "up"), ACCOUNT);
        assert_eq!(reply.sender, "me@example.com");
        assert_eq!(reply.receivers, vec!["alice@example.com"]);
    }

    #[test]
    fn directives_supersede_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.csv");
        std::fs::write(&file, "a,b\n").unwrap();

        let stdout = format!(
            "attach_file {}\nchange_reply_address other@example.com\n",
            file.display()
        );
        let reply = build_reply(&inbound(), &output(&stdout, "ignored"), ACCOUNT);

        assert_eq!(reply.receivers, vec!["other@example.com"]);
        assert_eq!(reply.attachments.len(), 1);
        assert_eq!(reply.attachments[0].name, "out.csv");
        assert_eq!(reply.attachments[0].path, file);
        assert!(reply.body.is_empty());
    }

    #[test]
    fn missing_attachment_is_skipped() {
        let reply = build_reply(
            &inbound(),
            &output("attach_file /nonexistent/makeme/out.csv\n", ""),
            ACCOUNT,
        );
        assert!(reply.attachments.is_empty());
        assert_eq!(reply.receivers, vec!["alice@example.com"]);
    }

    #[test]
    fn non_directive_stdout_still_suppresses_stderr() {
        let reply = build_reply(&inbound(), &output("chatter\n", "oops"), ACCOUNT);
        assert!(reply.body.is_empty());
    }

    #[tokio::test]
    async fn sent_reply_reaches_transport() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockTransport::new();
        let state = mock.state();
        let session = MailSession::new(settings(dir.path()), Box::new(mock));

        let reply = build_reply(&inbound(), &output("", "done"), ACCOUNT);
        let outcome = deliver(&session, reply).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Sent);
        let state = state.lock().unwrap();
        assert_eq!(state.sent.len(), 1);
        assert_eq!(state.sent[0].to, vec!["alice@example.com"]);
    }

    #[tokio::test]
    async fn broken_link_queues_exactly_one_reply() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockTransport::new();
        mock.state().lock().unwrap().send_failure = Some(Failure::Connect);
        let session = MailSession::new(settings(dir.path()), Box::new(mock));

        let reply = build_reply(&inbound(), &output("", "done"), ACCOUNT);
        let outcome = deliver(&session, reply).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Queued);
        let state = session.lock().await;
        assert_eq!(state.pending().len(), 1);
        assert_eq!(
            state.pending().iter().next().unwrap().subject,
            "RE: status"
        );
    }

    #[tokio::test]
    async fn rejected_reply_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockTransport::new();
        mock.state().lock().unwrap().send_failure = Some(Failure::Rejected);
        let session = MailSession::new(settings(dir.path()), Box::new(mock));

        let outcome = deliver(&session, build_reply(&inbound(), &output("", "x"), ACCOUNT))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Dropped);
        assert!(session.lock().await.pending().is_empty());
    }

    #[tokio::test]
    async fn auth_rejection_is_fatal_and_keeps_reply() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockTransport::new();
        mock.state().lock().unwrap().send_failure = Some(Failure::Auth);
        let session = MailSession::new(settings(dir.path()), Box::new(mock));

        let err = deliver(&session, build_reply(&inbound(), &output("", "x"), ACCOUNT))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FatalError::Auth {
                link: Link::Outbound,
                ..
            }
        ));
        assert_eq!(session.lock().await.pending().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dispatcher_runs_handler_and_replies() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("uptime");
        std::fs::write(&script, "#!/bin/sh\necho \"hello $1\" >&2\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mock = MockTransport::new();
        let state = mock.state();
        let session = MailSession::new(settings(dir.path()), Box::new(mock));

        let outcome = Dispatcher::new(Arc::clone(&session), inbound(), script)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Sent);
        let state = state.lock().unwrap();
        let sent = &state.sent[0];
        assert_eq!(sent.to, vec!["alice@example.com"]);
        assert_eq!(sent.subject.as_deref(), Some("RE: status"));
        assert_eq!(sent.body.trim_end(), "hello alice@example.com");
    }
}
