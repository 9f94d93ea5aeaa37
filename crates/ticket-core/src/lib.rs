//! Core engine for turning cost recommendations into tracked tickets.
//!
//! - [`store`]: the system of record (recommendations, routing, tickets)
//! - [`routing`]: who owns a recommendation
//! - [`backend`]: the pluggable ticket/notification backend contract
//! - [`reconcile`]: the concurrent pass that ties them together

pub mod backend;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod routing;
pub mod store;
pub mod types;

pub use error::{Result, TicketError};
