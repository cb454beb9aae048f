//! makeme: run commands on this machine by sending it email.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod mail;
pub mod poll;
pub mod schedule;
