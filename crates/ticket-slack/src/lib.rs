//! Slack ticket backend.
//!
//! Tickets are Slack channels (or threads in a per-contact channel). The
//! system of record stays in the ticket store; Slack is only the place where
//! people are notified and reply with `close` / `snooze <days>`.

pub mod api;
pub mod backend;
pub mod naming;
pub mod signature;

pub use backend::{parse_command, Command, SlackBackend};
