pub mod health;
pub mod reconcile;
pub mod tickets;
pub mod webhooks;
