//! Account record and quarantine projection

use marketplace::Platform;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix timestamp in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One linked marketplace credential.
///
/// `expires_at` and `invalid_until` are unix timestamps in milliseconds
/// (absolute, not deltas). `invalid_until` set and in the future means the
/// account is quarantined: automatic refreshes are skipped except by the
/// recovery sweep. `consecutive_failures` counts terminal failures since the
/// last successful refresh and drives the quarantine backoff window.
///
/// Only the lifecycle manager mutates token and quarantine fields; user
/// reconnection replaces `refresh_token` through the same path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub user_id: String,
    pub platform: Platform,
    pub access_token: String,
    pub refresh_token: String,
    /// Expiration as unix timestamp in milliseconds
    pub expires_at: u64,
    /// Quarantined until this instant when set and in the future
    #[serde(default)]
    pub invalid_until: Option<u64>,
    /// Terminal failures since the last successful refresh
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl Account {
    /// Whether the quarantine window is currently active.
    pub fn is_quarantined(&self, now_millis: u64) -> bool {
        matches!(self.invalid_until, Some(until) if until > now_millis)
    }

    /// Whether the access token expires within the safety margin.
    pub fn needs_refresh(&self, margin_millis: u64, now_millis: u64) -> bool {
        self.expires_at <= now_millis + margin_millis
    }

    /// A blank refresh token means no automatic recovery is possible.
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.trim().is_empty()
    }

    /// Quarantine projection, safe to hand to API clients.
    pub fn invalid_mark(&self) -> Option<InvalidMark> {
        self.invalid_until.map(|until| InvalidMark {
            account_id: self.account_id.clone(),
            platform: self.platform,
            invalid_until: until,
        })
    }
}

/// The quarantine view of an account: no token material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidMark {
    pub account_id: String,
    pub platform: Platform,
    pub invalid_until: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(invalid_until: Option<u64>) -> Account {
        Account {
            account_id: "acct-1".into(),
            user_id: "user-1".into(),
            platform: Platform::Amazon,
            access_token: "at_1".into(),
            refresh_token: "rt_1".into(),
            expires_at: 10_000,
            invalid_until,
            consecutive_failures: 0,
        }
    }

    #[test]
    fn quarantine_active_only_while_in_future() {
        let acct = account(Some(5_000));
        assert!(acct.is_quarantined(4_999));
        assert!(!acct.is_quarantined(5_000));
        assert!(!acct.is_quarantined(6_000));
    }

    #[test]
    fn no_mark_means_not_quarantined() {
        assert!(!account(None).is_quarantined(0));
    }

    #[test]
    fn needs_refresh_inside_margin() {
        let acct = account(None); // expires_at = 10_000
        assert!(acct.needs_refresh(1_000, 9_500));
        assert!(acct.needs_refresh(0, 10_000));
        assert!(!acct.needs_refresh(1_000, 8_000));
    }

    #[test]
    fn blank_refresh_token_detected() {
        let mut acct = account(None);
        assert!(acct.has_refresh_token());
        acct.refresh_token = "".into();
        assert!(!acct.has_refresh_token());
        acct.refresh_token = "   ".into();
        assert!(!acct.has_refresh_token());
    }

    #[test]
    fn invalid_mark_carries_no_tokens() {
        let mark = account(Some(5_000)).invalid_mark().unwrap();
        let json = serde_json::to_string(&mark).unwrap();
        assert!(!json.contains("at_1"));
        assert!(!json.contains("rt_1"));
        assert!(json.contains("acct-1"));
    }

    #[test]
    fn account_json_round_trips() {
        let acct = account(Some(5_000));
        let json = serde_json::to_string(&acct).unwrap();
        let parsed: Account = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.account_id, "acct-1");
        assert_eq!(parsed.platform, Platform::Amazon);
        assert_eq!(parsed.invalid_until, Some(5_000));
    }

    #[test]
    fn missing_optional_fields_default() {
        // Records written before the quarantine fields existed still load
        let json = r#"{
            "account_id": "acct-old",
            "user_id": "user-1",
            "platform": "ebay",
            "access_token": "at",
            "refresh_token": "rt",
            "expires_at": 123
        }"#;
        let parsed: Account = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.invalid_until, None);
        assert_eq!(parsed.consecutive_failures, 0);
    }
}
