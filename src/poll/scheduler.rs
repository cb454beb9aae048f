//! The driver loop: sleep per the refresh schedule, then start a poll.
//!
//! Polls are launched without waiting for the previous one; the cycle's
//! own guard turns overlapping launches into no-ops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::cycle::{CycleOutcome, PollCycle};
use crate::error::FatalError;
use crate::mail::MailSession;
use crate::schedule;

/// Stop request shared between the scheduler and whoever handles signals.
#[derive(Debug, Default)]
pub struct Shutdown {
    requested: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_triggered(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

pub struct Scheduler {
    session: Arc<MailSession>,
    cycle: PollCycle,
    shutdown: Arc<Shutdown>,
}

impl Scheduler {
    pub fn new(session: Arc<MailSession>, backoff: Duration) -> Self {
        let cycle = PollCycle::new(Arc::clone(&session), backoff);
        Self {
            session,
            cycle,
            shutdown: Shutdown::new(),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        Arc::clone(&self.shutdown)
    }

    /// Run until shutdown or until a poll hits a fatal error.
    ///
    /// On shutdown, a poll already in flight is allowed to finish.
    pub async fn run(self) -> Result<(), FatalError> {
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<FatalError>();
        let mut polls: JoinSet<()> = JoinSet::new();

        info!("Scheduler started");

        let result = loop {
            while polls.try_join_next().is_some() {}

            let expression = self.session.lock().await.schedule().to_string();
            let Some(wait) = schedule::wait_from_now(&expression) else {
                break Err(FatalError::InvalidSchedule(expression));
            };
            debug!(schedule = %expression, wait_secs = wait.as_secs(), "Next poll scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.shutdown.notify.notified() => {}
                Some(fatal) = fatal_rx.recv() => break Err(fatal),
            }

            if self.shutdown.is_triggered() {
                info!("Scheduler shutting down");
                break Ok(());
            }

            let cycle = self.cycle.clone();
            let fatal_tx = fatal_tx.clone();
            polls.spawn(async move {
                match cycle.run().await {
                    Ok(CycleOutcome::Completed(_)) | Ok(CycleOutcome::Skipped) => {}
                    Err(e) => {
                        error!("Poll failed: {e}");
                        let _ = fatal_tx.send(e);
                    }
                }
            });
        };

        if !polls.is_empty() {
            info!("Waiting for the running poll to finish");
        }
        while polls.join_next().await.is_some() {}

        match result {
            Ok(()) => match fatal_rx.try_recv() {
                Ok(fatal) => Err(fatal),
                Err(_) => Ok(()),
            },
            Err(e) => Err(e),
        }
    }
}
