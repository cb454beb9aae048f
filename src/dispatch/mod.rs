//! Turning matched inbound mail into replies.

pub mod directive;
pub mod handler;
pub mod patterns;
pub mod worker;

pub use directive::Directive;
pub use handler::{HandlerOutput, run_handler};
pub use patterns::{PatternRule, PatternTable};
pub use worker::{DispatchOutcome, Dispatcher};
