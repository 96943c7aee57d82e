//! OAuth2 refresh over HTTP
//!
//! `HttpRefreshClient` implements [`RefreshClient`] for marketplaces that
//! speak the standard `grant_type=refresh_token` form POST. One instance is
//! constructed per configured platform, each with its own token endpoint and
//! client credentials.
//!
//! Every request is bounded by a timeout; a timeout or connection failure is
//! classified transient at this boundary. Non-success responses go through
//! [`classify_refresh_failure`] with the status and body.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::Secret;
use tracing::debug;

use crate::classify::classify_refresh_failure;
use crate::{Platform, RefreshClient, RefreshError, TokenGrant};

/// Standard OAuth2 refresh client for one marketplace platform.
pub struct HttpRefreshClient {
    platform: Platform,
    client: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    client_secret: Option<Secret<String>>,
    timeout: Duration,
}

impl HttpRefreshClient {
    /// Create a client for the given platform and token endpoint.
    ///
    /// `client_secret` is optional because some marketplaces use public
    /// clients where only the client id is sent.
    pub fn new(
        platform: Platform,
        client: reqwest::Client,
        token_endpoint: String,
        client_id: String,
        client_secret: Option<Secret<String>>,
        timeout: Duration,
    ) -> Self {
        Self {
            platform,
            client,
            token_endpoint,
            client_id,
            client_secret,
            timeout,
        }
    }

    async fn refresh_inner(&self, refresh_token: &str) -> Result<TokenGrant, RefreshError> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.expose().as_str()));
        }

        let response = self
            .client
            .post(&self.token_endpoint)
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    RefreshError::transient(format!("token refresh request failed: {e}"))
                } else {
                    RefreshError::unknown(format!("token refresh request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            let kind = classify_refresh_failure(status.as_u16(), &body);
            debug!(
                platform = self.platform.label(),
                status = status.as_u16(),
                kind = kind.label(),
                "token endpoint returned non-success"
            );
            return Err(RefreshError {
                kind,
                message: format!("token endpoint returned {status}: {body}"),
            });
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| RefreshError::unknown(format!("invalid refresh response: {e}")))
    }
}

impl RefreshClient for HttpRefreshClient {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenGrant, RefreshError>> + Send + 'a>> {
        Box::pin(self.refresh_inner(refresh_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;
    use axum::http::StatusCode;
    use tokio::net::TcpListener;

    /// Start a mock token endpoint that returns a fixed status and body.
    async fn mock_token_endpoint(
        status: StatusCode,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("http://{addr}/oauth/token");

        let handle = tokio::spawn(async move {
            let app = axum::Router::new().fallback(move || async move {
                (
                    status,
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    body,
                )
            });
            axum::serve(listener, app).await.unwrap();
        });

        (url, handle)
    }

    fn test_client(endpoint: String) -> HttpRefreshClient {
        HttpRefreshClient::new(
            Platform::Ebay,
            reqwest::Client::new(),
            endpoint,
            "client-1".into(),
            Some(Secret::new("secret-1".into())),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn successful_refresh_returns_grant() {
        let (url, _server) = mock_token_endpoint(
            StatusCode::OK,
            r#"{"access_token":"at_new","refresh_token":"rt_new","expires_in":3600}"#,
        )
        .await;

        let client = test_client(url);
        let grant = client.refresh("rt_old").await.unwrap();
        assert_eq!(grant.access_token, "at_new");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt_new"));
        assert_eq!(grant.expires_in, 3600);
    }

    #[tokio::test]
    async fn invalid_grant_response_is_terminal() {
        let (url, _server) = mock_token_endpoint(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"refresh token revoked"}"#,
        )
        .await;

        let client = test_client(url);
        let err = client.refresh("rt_revoked").await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Terminal);
        assert!(err.message.contains("invalid_grant"), "got: {}", err.message);
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let (url, _server) =
            mock_token_endpoint(StatusCode::SERVICE_UNAVAILABLE, "upstream down").await;

        let client = test_client(url);
        let err = client.refresh("rt_x").await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Transient);
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        // Nothing listens on port 1 — connect error, not a token rejection
        let client = test_client("http://127.0.0.1:1/oauth/token".into());
        let err = client.refresh("rt_x").await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Transient);
    }

    #[tokio::test]
    async fn malformed_success_body_is_unknown() {
        let (url, _server) = mock_token_endpoint(StatusCode::OK, "not json at all").await;

        let client = test_client(url);
        let err = client.refresh("rt_x").await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Unknown);
    }

    #[tokio::test]
    async fn platform_tag_is_reported() {
        let client = test_client("http://127.0.0.1:1".into());
        assert_eq!(client.platform(), Platform::Ebay);
    }
}
