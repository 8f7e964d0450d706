use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{UpstreamError, UpstreamResult};
use crate::security::token_cache::{IssuedToken, TokenIssuer};
use crate::utils::logging::preview;
use crate::utils::timing::{timed, CallHook, Hooks};

/// Token endpoint response. Both fields are optional here so that their
/// absence surfaces as a protocol error rather than a decode error.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

/// OAuth2 client-credentials issuer.
#[derive(Clone)]
pub struct OAuthTokenIssuer {
    oauth_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    http_client: Client,
    hooks: Hooks,
}

impl OAuthTokenIssuer {
    pub fn new(
        oauth_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
        http_client: Client,
    ) -> Self {
        Self {
            oauth_url: oauth_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
            http_client,
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CallHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    fn basic_credentials(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", general_purpose::STANDARD.encode(raw))
    }

    async fn send(&self) -> UpstreamResult<IssuedToken> {
        let url = format!("{}/oauth/token", self.oauth_url);
        debug!(
            url = %url,
            client_id = %preview(&self.client_id, 20),
            scope = %self.scope,
            "requesting client-credentials token"
        );

        let response = self
            .http_client
            .post(&url)
            .header(AUTHORIZATION, self.basic_credentials())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(format!("grant_type=client_credentials&scope={}", self.scope))
            .send()
            .await
            .map_err(|e| UpstreamError::Unavailable(format!("token request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "token endpoint rejected request");
            return Err(UpstreamError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::Unavailable(format!("reading token response: {e}")))?;
        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::MalformedPayload(format!("token response is not JSON: {e}")))?;

        match (parsed.access_token, parsed.expires_in) {
            (Some(access_token), Some(expires_in)) => Ok(IssuedToken {
                access_token,
                expires_in,
            }),
            (None, _) => Err(UpstreamError::MalformedPayload(
                "access_token missing from token response".to_string(),
            )),
            (_, None) => Err(UpstreamError::MalformedPayload(
                "expires_in missing from token response".to_string(),
            )),
        }
    }
}

#[async_trait]
impl TokenIssuer for OAuthTokenIssuer {
    async fn request_token(&self) -> UpstreamResult<IssuedToken> {
        timed(&self.hooks, "oauth.token", self.send()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::timing::tests::RecordingHook;
    use mockito::{Matcher, Server};
    use std::time::Duration;

    fn issuer(base_url: &str) -> OAuthTokenIssuer {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        OAuthTokenIssuer::new(base_url, "client-id", "client-secret", "extrato-info", client)
    }

    #[tokio::test]
    async fn request_token_posts_client_credentials() {
        let mut server = Server::new_async().await;
        let expected_auth = format!(
            "Basic {}",
            general_purpose::STANDARD.encode("client-id:client-secret")
        );
        let mock = server
            .mock("POST", "/oauth/token")
            .match_header("authorization", Matcher::Exact(expected_auth))
            .match_header(
                "content-type",
                Matcher::Exact("application/x-www-form-urlencoded".into()),
            )
            .match_body(Matcher::Exact(
                "grant_type=client_credentials&scope=extrato-info".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"abc","expires_in":3600,"token_type":"Bearer"}"#)
            .create_async()
            .await;

        let token = issuer(&server.url()).request_token().await.unwrap();
        assert_eq!(
            token,
            IssuedToken {
                access_token: "abc".into(),
                expires_in: 3600
            }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejection_keeps_status_and_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(401)
            .with_body(r#"{"error":"invalid_client"}"#)
            .create_async()
            .await;

        let err = issuer(&server.url()).request_token().await.unwrap_err();
        match err {
            UpstreamError::Rejected { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("invalid_client"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_expires_in_is_malformed() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(r#"{"access_token":"abc"}"#)
            .create_async()
            .await;

        let err = issuer(&server.url()).request_token().await.unwrap_err();
        assert!(matches!(err, UpstreamError::MalformedPayload(_)));
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn missing_access_token_is_malformed() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(r#"{"expires_in":600}"#)
            .create_async()
            .await;

        let err = issuer(&server.url()).request_token().await.unwrap_err();
        assert!(matches!(err, UpstreamError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn non_json_body_is_malformed() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let err = issuer(&server.url()).request_token().await.unwrap_err();
        assert!(matches!(err, UpstreamError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn unreachable_issuer_is_unavailable() {
        // Port 9 (discard) on localhost is not expected to accept connections.
        let err = issuer("http://127.0.0.1:9").request_token().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Unavailable(_)));
    }

    #[tokio::test]
    async fn hooks_observe_token_call() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(r#"{"access_token":"abc","expires_in":60}"#)
            .create_async()
            .await;

        let hook = Arc::new(RecordingHook::default());
        let issuer = issuer(&server.url()).with_hook(hook.clone());
        issuer.request_token().await.unwrap();

        let events = hook.events.lock().unwrap().clone();
        assert_eq!(events, vec!["start:oauth.token", "finish:oauth.token:true"]);
    }
}
