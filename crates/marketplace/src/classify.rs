//! Failure classification for token endpoint responses
//!
//! Distinguishes terminal credential rejection (refresh token revoked,
//! expired, invalid) from transient trouble (timeouts, 5xx). Only terminal
//! failures quarantine an account. Classification is done once, here; the
//! resulting [`FailureKind`] is the only thing downstream code ever sees.

use crate::FailureKind;

/// Body phrases that mark a refresh token as unusable regardless of status.
///
/// OAuth2 token endpoints report credential rejection as a 400 with an
/// `invalid_grant` error code; some marketplaces use prose instead.
const TERMINAL_PATTERNS: &[&str] = &[
    "invalid_grant",
    "invalid refresh token",
    "refresh token expired",
    "refresh token has expired",
    "token has been revoked",
    "unauthorized_client",
];

/// Classify a non-success token endpoint response.
///
/// Any terminal body pattern wins. 401/403 are credential rejection even
/// with an unrecognized body. 408/429/5xx are transient. Everything else is
/// `Unknown` — consumers treat that as transient, so an ambiguous error can
/// never quarantine an account.
pub fn classify_refresh_failure(status: u16, body: &str) -> FailureKind {
    let lower = body.to_lowercase();
    for pattern in TERMINAL_PATTERNS {
        if lower.contains(pattern) {
            return FailureKind::Terminal;
        }
    }
    match status {
        401 | 403 => FailureKind::Terminal,
        408 | 429 | 500 | 502 | 503 | 504 => FailureKind::Transient,
        _ => FailureKind::Unknown,
    }
}
