//! Background recovery sweep and preventive refresh
//!
//! Two periodic tasks run independently of request traffic:
//! - the recovery sweep retries quarantined accounts on a long interval
//! - the preventive job renews tokens nearing expiry on a short interval,
//!   so live traffic rarely hits the safety margin
//!
//! A sweep already in progress makes a new trigger a no-op (skip, not queue).
//! Per-account failures never abort the rest of a sweep.

use std::sync::Arc;
use std::time::Duration;

use account_store::now_millis;
use marketplace::Platform;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::manager::LifecycleManager;

/// Default bound on concurrent recovery attempts within one sweep.
pub const DEFAULT_SWEEP_CONCURRENCY: usize = 5;

/// Outcome of one recovery sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub recovered: Vec<String>,
    pub failed: Vec<String>,
}

/// Periodic recovery over quarantined accounts.
pub struct RecoveryScheduler {
    manager: Arc<LifecycleManager>,
    sweep_lock: Mutex<()>,
    concurrency: usize,
}

impl RecoveryScheduler {
    pub fn new(manager: Arc<LifecycleManager>, concurrency: usize) -> Self {
        Self {
            manager,
            sweep_lock: Mutex::new(()),
            concurrency: concurrency.max(1),
        }
    }

    /// Run one sweep over currently quarantined accounts.
    ///
    /// Returns `None` when a sweep is already in progress. Each account is
    /// attempted independently under the concurrency bound; one account's
    /// failure never aborts the others.
    pub async fn run_sweep(&self, platform: Option<Platform>) -> Option<SweepReport> {
        let Ok(_held) = self.sweep_lock.try_lock() else {
            debug!("recovery sweep already running, skipping trigger");
            return None;
        };

        let marks = self
            .manager
            .store()
            .list_quarantined(platform, now_millis())
            .await;
        if marks.is_empty() {
            debug!("recovery sweep found no quarantined accounts");
            return Some(SweepReport::default());
        }
        info!(accounts = marks.len(), "recovery sweep started");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(marks.len());
        for mark in marks {
            let manager = self.manager.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                // Semaphore is never closed while the sweep holds it
                let _permit = semaphore.acquire_owned().await.ok();
                let recovered = manager.attempt_recovery(&mark.account_id).await;
                (mark.account_id, recovered)
            }));
        }

        let mut report = SweepReport::default();
        for handle in handles {
            match handle.await {
                Ok((account_id, true)) => report.recovered.push(account_id),
                Ok((account_id, false)) => report.failed.push(account_id),
                Err(e) => {
                    // Isolate even a panicked attempt; the account stays
                    // quarantined and the next sweep retries it
                    warn!(error = %e, "recovery task failed to complete");
                }
            }
        }
        report.recovered.sort();
        report.failed.sort();

        metrics::counter!("recovery_sweep_total").increment(1);
        metrics::counter!("recovery_sweep_recovered_total")
            .increment(report.recovered.len() as u64);
        metrics::counter!("recovery_sweep_failed_total").increment(report.failed.len() as u64);
        info!(
            recovered = report.recovered.len(),
            failed = report.failed.len(),
            "recovery sweep finished"
        );
        Some(report)
    }

    /// Run one preventive cycle: renew every non-quarantined token expiring
    /// within `threshold`.
    pub async fn preventive_cycle(&self, threshold: Duration) {
        let ids = self.manager.store().account_ids().await;
        for id in &ids {
            match self.manager.preventive_refresh(id, threshold).await {
                Ok(true) => debug!(account_id = id, "preventively refreshed"),
                Ok(false) => {}
                Err(e) => {
                    // Quarantine transitions are handled inside the manager;
                    // here we only keep the cycle going
                    debug!(account_id = id, error = %e, "preventive refresh failed");
                }
            }
        }
    }
}

/// Spawn the periodic recovery sweep task.
///
/// Runs every `interval` (design default 30 minutes). Skips the immediate
/// first tick. Returns a `JoinHandle` for the spawned task.
pub fn spawn_sweep_task(
    scheduler: Arc<RecoveryScheduler>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            scheduler.run_sweep(None).await;
        }
    })
}

/// Spawn the periodic preventive refresh task.
///
/// Runs every `interval` (design default 10 minutes) and renews tokens
/// expiring within `threshold`. Skips the immediate first tick.
pub fn spawn_preventive_task(
    scheduler: Arc<RecoveryScheduler>,
    interval: Duration,
    threshold: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            scheduler.preventive_cycle(threshold).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::DEFAULT_SAFETY_MARGIN;
    use account_store::{Account, AccountStore};
    use marketplace::{RefreshClient, RefreshError, TokenGrant};
    use progress::ProgressBroadcaster;
    use std::collections::{HashMap, VecDeque};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted refresh client keyed by refresh token value.
    struct MockClient {
        outcomes: std::sync::Mutex<HashMap<String, VecDeque<Result<TokenGrant, RefreshError>>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl MockClient {
        fn new(
            outcomes: Vec<(&str, Result<TokenGrant, RefreshError>)>,
            delay: Duration,
        ) -> Arc<Self> {
            let mut map: HashMap<String, VecDeque<Result<TokenGrant, RefreshError>>> =
                HashMap::new();
            for (token, outcome) in outcomes {
                map.entry(token.to_string()).or_default().push_back(outcome);
            }
            Arc::new(Self {
                outcomes: std::sync::Mutex::new(map),
                calls: AtomicUsize::new(0),
                delay,
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RefreshClient for MockClient {
        fn platform(&self) -> Platform {
            Platform::Ebay
        }

        fn refresh<'a>(
            &'a self,
            refresh_token: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<TokenGrant, RefreshError>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.outcomes
                    .lock()
                    .unwrap()
                    .get_mut(refresh_token)
                    .and_then(VecDeque::pop_front)
                    .unwrap_or_else(|| Err(RefreshError::transient("unscripted token")))
            })
        }
    }

    fn grant(access: &str) -> Result<TokenGrant, RefreshError> {
        Ok(TokenGrant {
            access_token: access.into(),
            refresh_token: None,
            expires_in: 3600,
        })
    }

    fn account(id: &str, platform: Platform, invalid_until: Option<u64>) -> Account {
        Account {
            account_id: id.into(),
            user_id: "user-1".into(),
            platform,
            access_token: format!("at_{id}"),
            refresh_token: format!("rt_{id}"),
            expires_at: 1_000,
            invalid_until,
            consecutive_failures: 1,
        }
    }

    async fn test_scheduler(
        client: Arc<MockClient>,
        accounts: Vec<Account>,
    ) -> (Arc<RecoveryScheduler>, Arc<AccountStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            AccountStore::load(dir.path().join("accounts.json"))
                .await
                .unwrap(),
        );
        for acct in accounts {
            store.upsert(acct).await.unwrap();
        }
        let mut clients: HashMap<Platform, Arc<dyn RefreshClient>> = HashMap::new();
        clients.insert(Platform::Ebay, client);
        let manager = Arc::new(LifecycleManager::new(
            store.clone(),
            clients,
            Arc::new(ProgressBroadcaster::new()),
            DEFAULT_SAFETY_MARGIN,
        ));
        (
            Arc::new(RecoveryScheduler::new(manager, 2)),
            store,
            dir,
        )
    }

    fn far_future() -> u64 {
        4_102_444_800_000
    }

    #[tokio::test]
    async fn sweep_recovers_and_isolates_failures() {
        // Account 2's refresh is rejected; 1 and 3 recover
        let client = MockClient::new(
            vec![
                ("rt_acct-1", grant("new-1")),
                ("rt_acct-2", Err(RefreshError::terminal("invalid_grant"))),
                ("rt_acct-3", grant("new-3")),
            ],
            Duration::ZERO,
        );
        let (scheduler, store, _dir) = test_scheduler(
            client,
            vec![
                account("acct-1", Platform::Ebay, Some(far_future())),
                account("acct-2", Platform::Ebay, Some(far_future())),
                account("acct-3", Platform::Ebay, Some(far_future())),
            ],
        )
        .await;

        let report = scheduler.run_sweep(None).await.unwrap();
        assert_eq!(report.recovered, vec!["acct-1", "acct-3"]);
        assert_eq!(report.failed, vec!["acct-2"]);

        // Recovered accounts are out of quarantine, the failed one is back in
        assert_eq!(store.get("acct-1").await.unwrap().invalid_until, None);
        assert!(store.get("acct-2").await.unwrap().invalid_until.is_some());
    }

    #[tokio::test]
    async fn sweep_with_no_quarantined_accounts_is_empty() {
        let client = MockClient::new(vec![], Duration::ZERO);
        let (scheduler, _store, _dir) = test_scheduler(
            client.clone(),
            vec![account("acct-1", Platform::Ebay, None)],
        )
        .await;

        let report = scheduler.run_sweep(None).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_sweep_trigger_is_skipped() {
        let client = MockClient::new(
            vec![("rt_acct-1", grant("new-1"))],
            Duration::from_millis(100),
        );
        let (scheduler, _store, _dir) = test_scheduler(
            client,
            vec![account("acct-1", Platform::Ebay, Some(far_future()))],
        )
        .await;

        let background = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_sweep(None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The first sweep still holds the lock
        assert!(scheduler.run_sweep(None).await.is_none());

        let report = background.await.unwrap().unwrap();
        assert_eq!(report.recovered, vec!["acct-1"]);
    }

    #[tokio::test]
    async fn sweep_scoped_to_platform() {
        let client = MockClient::new(vec![("rt_acct-ebay", grant("new"))], Duration::ZERO);
        let (scheduler, store, _dir) = test_scheduler(
            client.clone(),
            vec![
                account("acct-ebay", Platform::Ebay, Some(far_future())),
                account("acct-amazon", Platform::Amazon, Some(far_future())),
            ],
        )
        .await;

        let report = scheduler.run_sweep(Some(Platform::Ebay)).await.unwrap();
        assert_eq!(report.recovered, vec!["acct-ebay"]);
        assert!(report.failed.is_empty());
        assert_eq!(client.call_count(), 1);

        // The amazon account was not touched
        assert!(store.get("acct-amazon").await.unwrap().invalid_until.is_some());
    }

    #[tokio::test]
    async fn preventive_cycle_skips_quarantined_and_fresh_accounts() {
        let client = MockClient::new(vec![("rt_acct-expiring", grant("renewed"))], Duration::ZERO);

        let mut fresh = account("acct-fresh", Platform::Ebay, None);
        fresh.expires_at = far_future();
        let expiring = account("acct-expiring", Platform::Ebay, None);
        let quarantined = account("acct-quarantined", Platform::Ebay, Some(far_future()));

        let (scheduler, store, _dir) =
            test_scheduler(client.clone(), vec![fresh, expiring, quarantined]).await;

        scheduler.preventive_cycle(Duration::from_secs(900)).await;

        assert_eq!(client.call_count(), 1, "only the expiring account refreshes");
        assert_eq!(
            store.get("acct-expiring").await.unwrap().access_token,
            "renewed"
        );
        assert_eq!(store.get("acct-fresh").await.unwrap().access_token, "at_acct-fresh");
        assert_eq!(
            store.get("acct-quarantined").await.unwrap().access_token,
            "at_acct-quarantined"
        );
    }

    #[tokio::test]
    async fn preventive_cycle_survives_transient_failures() {
        let client = MockClient::new(
            vec![
                ("rt_acct-1", Err(RefreshError::transient("timeout"))),
                ("rt_acct-2", grant("renewed")),
            ],
            Duration::ZERO,
        );
        let (scheduler, store, _dir) = test_scheduler(
            client,
            vec![
                account("acct-1", Platform::Ebay, None),
                account("acct-2", Platform::Ebay, None),
            ],
        )
        .await;

        scheduler.preventive_cycle(Duration::from_secs(900)).await;

        // acct-1 failed transiently but acct-2 still got its renewal
        assert_eq!(store.get("acct-2").await.unwrap().access_token, "renewed");
        assert_eq!(store.get("acct-1").await.unwrap().invalid_until, None);
    }
}
