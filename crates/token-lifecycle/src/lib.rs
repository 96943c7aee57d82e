//! Token lifecycle and recovery engine
//!
//! Keeps a usable access token available for every linked marketplace
//! account. The manager decides whether a token is still valid, refreshes it
//! through the platform's `RefreshClient` when it isn't, and drives the
//! quarantine state transitions on classified failures. The scheduler runs
//! two independent periodic jobs on top of the same paths: a preventive
//! refresh for tokens nearing expiry and a recovery sweep over quarantined
//! accounts.
//!
//! Per-account lifecycle:
//! 1. Caller needs a token → `ensure_fresh` returns it from the store when
//!    the expiry clears the safety margin (no network call)
//! 2. Inside the margin → single-flight refresh via the platform client
//! 3. Terminal failure (refresh token rejected) → quarantined with a growing
//!    backoff window; callers see `ReconnectionRequired`
//! 4. Transient failure → no state change, caller retries
//! 5. Recovery sweep or user action force-refreshes quarantined accounts
//! 6. User reconnection replaces the refresh token and revives the account

pub mod backoff;
pub mod error;
pub mod manager;
pub mod scheduler;

pub use backoff::quarantine_window;
pub use error::{Error, Result};
pub use manager::LifecycleManager;
pub use scheduler::{RecoveryScheduler, SweepReport, spawn_preventive_task, spawn_sweep_task};
