//! One scheduled poll of the mailbox.
//!
//! A cycle runs fetch, fan-out, join and flush in that order. Clones of a
//! [`PollCycle`] share one single-flight guard, so however often the
//! scheduler fires, at most one of them is past the guard at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::{FatalError, MailError};
use crate::mail::queue;
use crate::mail::{Email, MailSession, SessionState};

/// Default pause between failed mailbox connection attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(30);

/// Counts from a completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub dispatched: usize,
    pub sent: usize,
    pub queued: usize,
    pub dropped: usize,
    pub flushed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was already running.
    Skipped,
}

#[derive(Clone)]
pub struct PollCycle {
    session: Arc<MailSession>,
    guard: Arc<Semaphore>,
    backoff: Duration,
}

impl PollCycle {
    pub fn new(session: Arc<MailSession>, backoff: Duration) -> Self {
        Self {
            session,
            guard: Arc::new(Semaphore::new(1)),
            backoff,
        }
    }

    /// Whether some clone of this cycle is currently running.
    pub fn is_running(&self) -> bool {
        self.guard.available_permits() == 0
    }

    pub async fn run(&self) -> Result<CycleOutcome, FatalError> {
        let Ok(_permit) = Arc::clone(&self.guard).try_acquire_owned() else {
            info!("Previous poll still running, skipping this one");
            return Ok(CycleOutcome::Skipped);
        };

        let emails = self.fetch().await?;
        let mut report = CycleReport {
            fetched: emails.len(),
            ..Default::default()
        };

        let fatal = self.dispatch_all(emails, &mut report).await;
        if let Some(fatal) = fatal {
            let mut state = self.session.lock().await;
            abandon_pending(&mut state, &fatal.to_string());
            return Err(fatal);
        }

        report.flushed = self.flush().await?;

        if report.fetched > 0 || report.flushed > 0 {
            info!(
                fetched = report.fetched,
                dispatched = report.dispatched,
                sent = report.sent,
                queued = report.queued,
                flushed = report.flushed,
                "Poll complete"
            );
        }
        Ok(CycleOutcome::Completed(report))
    }

    /// Log in, fetch every unread message and log out again.
    ///
    /// Broken-link failures are retried `reconnect_attempts` times with a
    /// fixed pause. The session lock is not held while pausing.
    async fn fetch(&self) -> Result<Vec<Email>, FatalError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut state = self.session.lock().await;
            let allowed = state.reconnect_attempts().saturating_add(1);

            let result = fetch_once(&mut state).await;
            state.logout_inbound().await;

            match result {
                Ok(emails) => return Ok(emails),
                Err(MailError::Auth { link, reason }) => {
                    return Err(FatalError::Auth { link, reason });
                }
                Err(e) if e.is_retryable() && attempt < allowed => {
                    drop(state);
                    warn!(
                        attempt,
                        allowed,
                        backoff_secs = self.backoff.as_secs(),
                        "Could not reach mailbox: {e}"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(FatalError::MailboxUnreachable {
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(FatalError::Unexpected(e.to_string())),
            }
        }
    }

    /// Spawn a dispatcher for every email some pattern matches and wait
    /// for all of them. Returns the first fatal error a dispatcher raised.
    async fn dispatch_all(
        &self,
        emails: Vec<Email>,
        report: &mut CycleReport,
    ) -> Option<FatalError> {
        if emails.is_empty() {
            return None;
        }

        let patterns = self.session.lock().await.patterns();
        let mut workers = JoinSet::new();
        for email in emails {
            match patterns.select(&email) {
                Some(rule) => {
                    debug!(pattern = rule.pattern(), from = %email.sender, "Pattern matched");
                    let dispatcher = Dispatcher::new(
                        Arc::clone(&self.session),
                        email,
                        rule.handler().to_path_buf(),
                    );
                    workers.spawn(dispatcher.run());
                    report.dispatched += 1;
                }
                None => debug!(from = %email.sender, subject = %email.subject, "No pattern matched, ignoring"),
            }
        }

        let mut fatal = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(DispatchOutcome::Sent)) => report.sent += 1,
                Ok(Ok(DispatchOutcome::Queued)) => report.queued += 1,
                Ok(Ok(DispatchOutcome::Dropped)) => report.dropped += 1,
                Ok(Err(e)) => {
                    error!("Dispatcher failed: {e}");
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    error!("Dispatcher task aborted: {e}");
                    report.dropped += 1;
                }
            }
        }
        fatal
    }

    /// Send every queued reply, oldest first. If the link is still down the
    /// queue goes to the failure log and the cycle fails.
    async fn flush(&self) -> Result<usize, FatalError> {
        let mut state = self.session.lock().await;
        if state.pending().is_empty() {
            return Ok(0);
        }
        info!(count = state.pending().len(), "Flushing queued replies");

        if let Err(e) = state.login_outbound().await {
            return Err(give_up(&mut state, e));
        }

        let mut sent = 0;
        while let Some(email) = state.pending_mut().pop() {
            match state.send(&email).await {
                Ok(()) => sent += 1,
                Err(e) if e.is_retryable() || matches!(e, MailError::Auth { .. }) => {
                    state.pending_mut().restore(email);
                    return Err(give_up(&mut state, e));
                }
                Err(e) => {
                    error!(to = %email.receiver_list(), "Server refused queued reply: {e}");
                    record_refused(&state, &e, email);
                }
            }
        }
        Ok(sent)
    }
}

async fn fetch_once(state: &mut SessionState) -> Result<Vec<Email>, MailError> {
    state.login_inbound().await?;
    state.fetch_unread().await
}

/// Persist the queue and turn the flush failure into its fatal form.
fn give_up(state: &mut SessionState, error: MailError) -> FatalError {
    let reason = error.to_string();
    let count = abandon_pending(state, &reason);
    match error {
        MailError::Auth { link, reason } => FatalError::Auth { link, reason },
        _ => FatalError::QueueFlush { count, reason },
    }
}

/// Log a reply the server will never accept.
fn record_refused(state: &SessionState, error: &MailError, email: Email) {
    if let Err(e) = queue::persist(state.unsent_log(), &error.to_string(), &[email]) {
        error!(path = %state.unsent_log().display(), "Could not write failure log: {e}");
    }
}

/// Move everything still queued into the failure log.
fn abandon_pending(state: &mut SessionState, reason: &str) -> usize {
    let emails = state.pending_mut().drain();
    if emails.is_empty() {
        return 0;
    }
    if let Err(e) = queue::persist(state.unsent_log(), reason, &emails) {
        error!(
            path = %state.unsent_log().display(),
            count = emails.len(),
            "Could not write failure log: {e}"
        );
    }
    emails.len()
}
