//! Durable storage for linked marketplace accounts
//!
//! Manages a JSON file mapping account IDs to credential records. All writes
//! use atomic temp-file + rename to prevent corruption on crash. A tokio Mutex
//! serializes concurrent writes from the request path, the preventive refresh
//! job, and the recovery sweep.
//!
//! The store is the single source of truth for token data. Policy (when to
//! refresh, when to quarantine) lives in the lifecycle manager; the store only
//! offers record-level atomic updates.

pub mod account;
pub mod error;
pub mod store;

pub use account::{Account, InvalidMark, now_millis};
pub use error::{Error, Result};
pub use store::AccountStore;
