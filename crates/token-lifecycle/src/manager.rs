//! Lifecycle manager and per-account refresh serialization
//!
//! The manager owns all account state transitions. The store is the single
//! source of truth for token data; the manager reads it, decides, and writes
//! back through record-level updates.
//!
//! Refresh for a given account is single-flight: each account has an async
//! mutex, and a caller that waited on it re-checks freshness after acquiring
//! the guard. Concurrent callers therefore ride on the first caller's refresh
//! instead of issuing duplicates. Across different accounts refreshes proceed
//! fully in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use account_store::{Account, AccountStore, now_millis};
use marketplace::{FailureKind, Platform, RefreshClient};
use progress::{EventKind, ProgressBroadcaster, ProgressEvent};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backoff::quarantine_window;
use crate::error::{Error, Result};

/// Default safety margin: a returned token is valid at least this far ahead.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Token lifecycle manager for all linked accounts.
pub struct LifecycleManager {
    store: Arc<AccountStore>,
    clients: HashMap<Platform, Arc<dyn RefreshClient>>,
    broadcaster: Arc<ProgressBroadcaster>,
    safety_margin: Duration,
    /// Per-account refresh guards, created lazily, dropped with the account.
    guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<AccountStore>,
        clients: HashMap<Platform, Arc<dyn RefreshClient>>,
        broadcaster: Arc<ProgressBroadcaster>,
        safety_margin: Duration,
    ) -> Self {
        info!(
            platforms = clients.len(),
            safety_margin_secs = safety_margin.as_secs(),
            "lifecycle manager initialized"
        );
        Self {
            store,
            clients,
            broadcaster,
            safety_margin,
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// The account store backing this manager (for health reporting).
    pub fn store(&self) -> &Arc<AccountStore> {
        &self.store
    }

    /// Return an account whose access token is valid for at least the safety
    /// margin, refreshing it if necessary.
    ///
    /// The common path is cheap: when `expires_at` already clears the margin
    /// the stored account is returned with zero network calls.
    pub async fn ensure_fresh(&self, account_id: &str) -> Result<Account> {
        let account = self.load(account_id).await?;
        let now = now_millis();
        if !account.needs_refresh(self.margin_millis(), now) {
            return Ok(account);
        }

        let guard = self.guard_for(account_id).await;
        let _held = guard.lock().await;

        // Re-check after acquiring the guard: a concurrent caller may have
        // refreshed while we waited.
        let account = self.load(account_id).await?;
        let now = now_millis();
        if !account.needs_refresh(self.margin_millis(), now) {
            debug!(account_id, "token refreshed by concurrent caller");
            return Ok(account);
        }

        self.do_refresh(account, false, EventKind::Refreshed, now)
            .await
    }

    /// Refresh one account now.
    ///
    /// Without `force`, an active quarantine window fails fast with
    /// `Quarantined` and no client call. With `force`, the window is ignored
    /// (recovery and user-triggered retries).
    pub async fn refresh(&self, account_id: &str, force: bool) -> Result<Account> {
        let guard = self.guard_for(account_id).await;
        let _held = guard.lock().await;

        let account = self.load(account_id).await?;
        self.do_refresh(account, force, EventKind::Refreshed, now_millis())
            .await
    }

    /// Preventive renewal for the background job.
    ///
    /// Skips quarantined accounts entirely and does nothing when the expiry
    /// is outside `threshold`. Returns whether a refresh was performed.
    pub async fn preventive_refresh(&self, account_id: &str, threshold: Duration) -> Result<bool> {
        let account = self.load(account_id).await?;
        let now = now_millis();
        if account.is_quarantined(now) {
            return Ok(false);
        }
        if !account.needs_refresh(threshold.as_millis() as u64, now) {
            return Ok(false);
        }

        let guard = self.guard_for(account_id).await;
        let _held = guard.lock().await;

        let account = self.load(account_id).await?;
        let now = now_millis();
        if !account.needs_refresh(threshold.as_millis() as u64, now) {
            return Ok(false);
        }

        self.do_refresh(account, false, EventKind::Preventive, now)
            .await?;
        Ok(true)
    }

    /// Attempt to recover a quarantined account.
    ///
    /// Clears the quarantine mark, then force-refreshes. Returns true only on
    /// success; a terminal re-failure re-quarantines with an extended window.
    pub async fn attempt_recovery(&self, account_id: &str) -> bool {
        let guard = self.guard_for(account_id).await;
        let _held = guard.lock().await;

        let account = match self.load(account_id).await {
            Ok(a) => a,
            Err(_) => return false,
        };
        if account.invalid_until.is_some() {
            if let Err(e) = self.store.clear_invalid(account_id).await {
                warn!(account_id, error = %e, "failed to clear quarantine mark");
                return false;
            }
        }

        let account = match self.load(account_id).await {
            Ok(a) => a,
            Err(_) => return false,
        };
        match self
            .do_refresh(account, true, EventKind::Recovery, now_millis())
            .await
        {
            Ok(_) => {
                info!(account_id, "account recovered");
                true
            }
            Err(e) => {
                debug!(account_id, error = %e, "recovery attempt failed");
                false
            }
        }
    }

    /// Replace the refresh credential after user reconnection, then refresh.
    ///
    /// The new token clears the quarantine mark and failure count; the forced
    /// refresh validates it immediately.
    pub async fn reconnect(&self, account_id: &str, refresh_token: String) -> Result<Account> {
        let guard = self.guard_for(account_id).await;
        let _held = guard.lock().await;

        self.store
            .replace_refresh_token(account_id, refresh_token)
            .await?;
        let account = self.load(account_id).await?;
        self.do_refresh(account, true, EventKind::Refreshed, now_millis())
            .await
    }

    /// Explicit manual clear of a quarantine mark. Does not refresh.
    pub async fn clear_quarantine(&self, account_id: &str) -> Result<Account> {
        let account = self.store.clear_invalid(account_id).await?;
        info!(account_id, "quarantine mark cleared manually");
        Ok(account)
    }

    /// Unlink an account: delete the record and drop its refresh guard.
    pub async fn remove_account(&self, account_id: &str) -> Result<Option<Account>> {
        let removed = self.store.remove(account_id).await?;
        self.guards.lock().await.remove(account_id);
        Ok(removed)
    }

    fn margin_millis(&self) -> u64 {
        self.safety_margin.as_millis() as u64
    }

    async fn load(&self, account_id: &str) -> Result<Account> {
        self.store
            .get(account_id)
            .await
            .ok_or_else(|| Error::NotFound(account_id.to_string()))
    }

    async fn guard_for(&self, account_id: &str) -> Arc<Mutex<()>> {
        let mut guards = self.guards.lock().await;
        guards
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// One refresh attempt against the platform client, with state
    /// transitions on the classified outcome. Caller must hold the
    /// account's guard.
    async fn do_refresh(
        &self,
        account: Account,
        force: bool,
        kind: EventKind,
        now: u64,
    ) -> Result<Account> {
        let account_id = account.account_id.clone();
        let platform = account.platform;

        if !force && account.is_quarantined(now) {
            let invalid_until = account.invalid_until.unwrap_or(now);
            debug!(
                account_id,
                invalid_until, "refresh skipped, quarantine window active"
            );
            return Err(Error::Quarantined {
                account_id,
                invalid_until,
            });
        }

        if !account.has_refresh_token() {
            return Err(Error::ReconnectionRequired(format!(
                "account {account_id} has no refresh token"
            )));
        }

        let client = self
            .clients
            .get(&platform)
            .ok_or_else(|| Error::UnsupportedPlatform(platform.label().to_string()))?;

        let started = Instant::now();
        let outcome = client.refresh(&account.refresh_token).await;
        let duration = started.elapsed().as_secs_f64();

        match outcome {
            Ok(grant) => {
                let expires_at = now + grant.expires_in * 1000;
                let updated = self
                    .store
                    .update_tokens(
                        &account_id,
                        grant.access_token,
                        grant.refresh_token,
                        expires_at,
                    )
                    .await?;
                record_refresh(platform, "success", duration);
                info!(
                    account_id,
                    platform = platform.label(),
                    "token refresh succeeded"
                );
                self.broadcaster
                    .publish(ProgressEvent::new(
                        &account.user_id,
                        kind,
                        format!("{platform} token refreshed for {account_id}"),
                    ))
                    .await;
                Ok(updated)
            }
            Err(err) if err.kind == FailureKind::Terminal => {
                let failures = account.consecutive_failures.saturating_add(1);
                let window = quarantine_window(failures);
                let invalid_until = now + window.as_millis() as u64;
                self.store
                    .mark_invalid(&account_id, invalid_until, failures)
                    .await?;
                record_refresh(platform, "terminal", duration);
                warn!(
                    account_id,
                    platform = platform.label(),
                    consecutive_failures = failures,
                    quarantined_secs = window.as_secs(),
                    "refresh token rejected, account quarantined"
                );
                self.broadcaster
                    .publish(ProgressEvent::reconnection_required(
                        &account.user_id,
                        format!("{platform} connection for {account_id} must be re-authorized"),
                    ))
                    .await;
                Err(Error::ReconnectionRequired(err.message))
            }
            Err(err) => {
                // Transient and Unknown alike: never quarantine on an
                // ambiguous error, leave all state untouched.
                record_refresh(platform, err.kind.label(), duration);
                debug!(
                    account_id,
                    platform = platform.label(),
                    kind = err.kind.label(),
                    "refresh failed, will retry"
                );
                Err(Error::Transient(err.message))
            }
        }
    }
}

/// Record one refresh attempt in the metrics registry.
fn record_refresh(platform: Platform, outcome: &'static str, duration_secs: f64) {
    metrics::counter!(
        "token_refresh_total",
        "platform" => platform.label(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!(
        "token_refresh_duration_seconds",
        "platform" => platform.label()
    )
    .record(duration_secs);
}
