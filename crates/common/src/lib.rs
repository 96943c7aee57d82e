//! Common types for the Storelink services

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
