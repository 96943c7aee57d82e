//! File-backed account store
//!
//! Holds the account map in memory behind a tokio Mutex and persists every
//! mutation with an atomic temp-file + rename write. Reads briefly acquire
//! the lock to clone, so the request path doesn't block on background writes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use marketplace::Platform;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::account::{Account, InvalidMark};
use crate::error::{Error, Result};

/// Thread-safe account file manager.
pub struct AccountStore {
    path: PathBuf,
    state: Mutex<HashMap<String, Account>>,
}

impl AccountStore {
    /// Load accounts from the given file path.
    ///
    /// If the file doesn't exist, creates it as `{}` (cold start with zero
    /// linked accounts).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading account file: {e}")))?;
            let accounts: HashMap<String, Account> = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing account file: {e}")))?;
            info!(path = %path.display(), accounts = accounts.len(), "loaded accounts");
            accounts
        } else {
            info!(path = %path.display(), "account file not found, starting with empty store");
            let accounts = HashMap::new();
            write_atomic(&path, &accounts).await?;
            accounts
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Get a clone of a specific account.
    pub async fn get(&self, account_id: &str) -> Option<Account> {
        let state = self.state.lock().await;
        state.get(account_id).cloned()
    }

    /// List all account IDs.
    pub async fn account_ids(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.keys().cloned().collect()
    }

    /// Add or replace an account and persist to disk.
    pub async fn upsert(&self, account: Account) -> Result<()> {
        let mut state = self.state.lock().await;
        debug!(account_id = account.account_id, "stored account");
        state.insert(account.account_id.clone(), account);
        write_atomic(&self.path, &state).await
    }

    /// Remove an account and persist to disk.
    ///
    /// Returns the removed account if it existed.
    pub async fn remove(&self, account_id: &str) -> Result<Option<Account>> {
        let mut state = self.state.lock().await;
        let removed = state.remove(account_id);
        if removed.is_some() {
            debug!(account_id, "removed account");
            write_atomic(&self.path, &state).await?;
        }
        Ok(removed)
    }

    /// Fold a successful refresh into an account.
    ///
    /// Updates the access token, optionally rotates the refresh token, sets
    /// the new expiry, clears any quarantine mark, and zeroes the failure
    /// count. Returns an error if the account doesn't exist.
    pub async fn update_tokens(
        &self,
        account_id: &str,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: u64,
    ) -> Result<Account> {
        let mut state = self.state.lock().await;
        let account = state
            .get_mut(account_id)
            .ok_or_else(|| Error::NotFound(format!("account {account_id} not in store")))?;
        account.access_token = access_token;
        if let Some(rotated) = refresh_token {
            account.refresh_token = rotated;
        }
        account.expires_at = expires_at;
        account.invalid_until = None;
        account.consecutive_failures = 0;
        let updated = account.clone();
        debug!(account_id, "updated tokens");
        write_atomic(&self.path, &state).await?;
        Ok(updated)
    }

    /// Record a terminal refresh failure.
    ///
    /// Sets the quarantine window and the consecutive failure count computed
    /// by the lifecycle manager. Returns the updated account.
    pub async fn mark_invalid(
        &self,
        account_id: &str,
        invalid_until: u64,
        consecutive_failures: u32,
    ) -> Result<Account> {
        let mut state = self.state.lock().await;
        let account = state
            .get_mut(account_id)
            .ok_or_else(|| Error::NotFound(format!("account {account_id} not in store")))?;
        account.invalid_until = Some(invalid_until);
        account.consecutive_failures = consecutive_failures;
        let updated = account.clone();
        debug!(account_id, invalid_until, "marked account invalid");
        write_atomic(&self.path, &state).await?;
        Ok(updated)
    }

    /// Clear the quarantine mark without touching tokens.
    ///
    /// Used by explicit "clear" actions and by recovery before a forced
    /// refresh. Returns the updated account.
    pub async fn clear_invalid(&self, account_id: &str) -> Result<Account> {
        let mut state = self.state.lock().await;
        let account = state
            .get_mut(account_id)
            .ok_or_else(|| Error::NotFound(format!("account {account_id} not in store")))?;
        account.invalid_until = None;
        let updated = account.clone();
        debug!(account_id, "cleared quarantine mark");
        write_atomic(&self.path, &state).await?;
        Ok(updated)
    }

    /// Replace the refresh credential after user reconnection.
    ///
    /// Clears the quarantine mark and failure count: the new token makes the
    /// account recoverable immediately.
    pub async fn replace_refresh_token(
        &self,
        account_id: &str,
        refresh_token: String,
    ) -> Result<Account> {
        let mut state = self.state.lock().await;
        let account = state
            .get_mut(account_id)
            .ok_or_else(|| Error::NotFound(format!("account {account_id} not in store")))?;
        account.refresh_token = refresh_token;
        account.invalid_until = None;
        account.consecutive_failures = 0;
        let updated = account.clone();
        info!(account_id, "refresh token replaced by reconnection");
        write_atomic(&self.path, &state).await?;
        Ok(updated)
    }

    /// Quarantined accounts as token-free projections.
    ///
    /// Only marks still in the future at `now_millis` are returned;
    /// an elapsed window means the account is eligible for normal refresh
    /// again and needs no recovery.
    pub async fn list_quarantined(
        &self,
        platform: Option<Platform>,
        now_millis: u64,
    ) -> Vec<InvalidMark> {
        let state = self.state.lock().await;
        let mut marks: Vec<InvalidMark> = state
            .values()
            .filter(|a| a.is_quarantined(now_millis))
            .filter(|a| platform.is_none_or(|p| a.platform == p))
            .filter_map(|a| a.invalid_mark())
            .collect();
        marks.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        marks
    }

    /// One user's quarantined accounts, token-free.
    pub async fn quarantined_for_user(&self, user_id: &str, now_millis: u64) -> Vec<InvalidMark> {
        let state = self.state.lock().await;
        let mut marks: Vec<InvalidMark> = state
            .values()
            .filter(|a| a.user_id == user_id && a.is_quarantined(now_millis))
            .filter_map(|a| a.invalid_mark())
            .collect();
        marks.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        marks
    }

    /// Number of stored accounts.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Write accounts to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. This prevents corruption if the process crashes mid-write.
/// Sets file permissions to 0600 (owner read/write only) since the file
/// contains OAuth tokens.
async fn write_atomic(path: &Path, data: &HashMap<String, Account>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Parse(format!("serializing accounts: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("account path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".accounts.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp account file: {e}")))?;

    // Set 0600 permissions (unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting account file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp account file: {e}")))?;

    debug!(path = %path.display(), "persisted accounts");
    Ok(())
}
