//! In-process progress broadcasting
//!
//! Fans out structured progress events to zero or more live listeners per
//! subject (a user id or a job session id). Delivery is best-effort and
//! at-most-once: no buffering, no replay, no persistence. A listener that
//! connects after an event was published never sees it.
//!
//! This channel is purely an observability side-channel. The token lifecycle
//! and recovery logic produce identical account state whether or not anyone
//! is listening.

pub mod broadcast;
pub mod event;

pub use broadcast::{Listener, ProgressBroadcaster};
pub use event::{EventKind, ProgressEvent};
