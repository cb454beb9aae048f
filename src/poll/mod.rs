//! Scheduled polling of the mailbox.

pub mod cycle;
pub mod scheduler;

pub use cycle::{CycleOutcome, CycleReport, PollCycle};
pub use scheduler::{Scheduler, Shutdown};
