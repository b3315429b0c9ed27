//! Offline-first recipe sync engine.
//!
//! Reads are served from a durable local cache, writes are applied locally first and
//! then sent to the remote store or queued, and queued mutations are replayed in
//! order once connectivity returns.

pub mod cache;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod models;
pub mod queue;
pub mod remote;
pub mod replay;
pub mod service;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, FailureClass, Result};
pub use service::{HubConfig, HubStatus, RecipeHub};
