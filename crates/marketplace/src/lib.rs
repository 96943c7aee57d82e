//! Marketplace abstraction for credential refresh
//!
//! Defines the `RefreshClient` trait that decouples the token lifecycle engine
//! from each marketplace's token endpoint. One implementation exists per
//! platform; `HttpRefreshClient` covers the standard OAuth2
//! `grant_type=refresh_token` exchange that all currently supported
//! marketplaces speak.
//!
//! Failure classification happens here, at the client boundary, exactly once:
//! every error leaves this crate as a [`RefreshError`] carrying a closed
//! [`FailureKind`]. Downstream code branches on the enum and never re-inspects
//! error text.

pub mod classify;
pub mod http;

pub use classify::classify_refresh_failure;
pub use http::HttpRefreshClient;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Supported marketplace integrations, one tag per platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Amazon,
    Ebay,
    Etsy,
}

impl Platform {
    /// Platform label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Platform::Amazon => "amazon",
            Platform::Ebay => "ebay",
            Platform::Etsy => "etsy",
        }
    }

    /// All supported platforms, for config validation and iteration.
    pub fn all() -> &'static [Platform] {
        &[Platform::Amazon, Platform::Ebay, Platform::Etsy]
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "amazon" => Ok(Platform::Amazon),
            "ebay" => Ok(Platform::Ebay),
            "etsy" => Ok(Platform::Etsy),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Classification of a failed refresh attempt.
///
/// - `Terminal`: the refresh token itself was rejected (revoked, expired,
///   invalid). The account must be quarantined; only a user-supplied
///   replacement token recovers it.
/// - `Transient`: connectivity, timeout, or server-side trouble. Safe to
///   retry; no account state changes.
/// - `Unknown`: nothing matched. Consumers treat this like `Transient` —
///   an ambiguous error never quarantines an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Terminal,
    Transient,
    Unknown,
}

impl FailureKind {
    /// Kind label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Terminal => "terminal",
            FailureKind::Transient => "transient",
            FailureKind::Unknown => "unknown",
        }
    }
}

/// A classified refresh failure from a marketplace token endpoint.
#[derive(Debug, Clone, thiserror::Error)]
#[error("refresh failed ({}): {message}", .kind.label())]
pub struct RefreshError {
    pub kind: FailureKind,
    pub message: String,
}

impl RefreshError {
    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Terminal,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Unknown,
            message: message.into(),
        }
    }
}

/// Result of a successful refresh.
///
/// `expires_in` is a delta in seconds from the response time; the lifecycle
/// manager converts it to an absolute unix millisecond timestamp when folding
/// the grant into the stored account. `refresh_token` is `None` when the
/// platform does not rotate refresh tokens; the stored token is then kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
}

/// One marketplace's token-refresh endpoint.
///
/// Implementations must surface credential-rejection errors distinguishably
/// from connectivity errors via the [`RefreshError`] kind. Uses
/// `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn RefreshClient>` held in a per-platform registry).
pub trait RefreshClient: Send + Sync {
    /// Platform this client serves.
    fn platform(&self) -> Platform;

    /// Exchange a refresh token for a new token grant.
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenGrant, RefreshError>> + Send + 'a>>;
}
