use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::UpstreamResult;
use crate::utils::logging::preview;

/// Raw result of a token request, before it is stamped with timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: u64,
}

/// Capability to obtain a fresh bearer token.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn request_token(&self) -> UpstreamResult<IssuedToken>;
}

/// Immutable bearer token with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: String, issued_at: DateTime<Utc>, lifetime_secs: u64) -> Self {
        let lifetime = i64::try_from(lifetime_secs)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .unwrap_or(ChronoDuration::MAX);
        Self {
            value,
            issued_at,
            expires_at: issued_at
                .checked_add_signed(lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Usable while more than `buffer` remains before expiry.
    pub fn is_usable_at(&self, now: DateTime<Utc>, buffer: ChronoDuration) -> bool {
        self.expires_at - now > buffer
    }
}

/// Snapshot returned by [`TokenCache::inspect`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    pub cached: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// Whole seconds until expiry; 0 when empty, negative once expired.
    pub expires_in: i64,
}

/// Bearer token cache with proactive renewal.
///
/// Clones share the same slot. The slot is replaced wholesale under a write
/// lock, so readers only ever see a complete token. Check-then-renew is not
/// single-flight: concurrent callers that both see a stale token both renew.
#[derive(Clone)]
pub struct TokenCache {
    issuer: Arc<dyn TokenIssuer>,
    slot: Arc<RwLock<Option<Arc<AccessToken>>>>,
    renewal_buffer: ChronoDuration,
}

pub const DEFAULT_RENEWAL_BUFFER: Duration = Duration::from_secs(5 * 60);

impl TokenCache {
    pub fn new(issuer: Arc<dyn TokenIssuer>, renewal_buffer: Duration) -> Self {
        Self {
            issuer,
            slot: Arc::new(RwLock::new(None)),
            renewal_buffer: ChronoDuration::from_std(renewal_buffer)
                .unwrap_or_else(|_| ChronoDuration::minutes(5)),
        }
    }

    pub fn with_default_buffer(issuer: Arc<dyn TokenIssuer>) -> Self {
        Self::new(issuer, DEFAULT_RENEWAL_BUFFER)
    }

    /// Cached token if still usable, otherwise a fresh one from the issuer.
    pub async fn get_token(&self) -> UpstreamResult<String> {
        if let Some(token) = self.usable_token().await {
            debug!(expires_at = %token.expires_at(), "using cached access token");
            return Ok(token.value().to_string());
        }
        self.force_refresh().await
    }

    /// Request a new token regardless of cache state and store it.
    ///
    /// On failure the slot is left untouched and the error is returned as is.
    pub async fn force_refresh(&self) -> UpstreamResult<String> {
        info!("requesting new access token");
        let issued = self.issuer.request_token().await?;

        let token = Arc::new(AccessToken::new(issued.access_token, Utc::now(), issued.expires_in));
        let value = token.value().to_string();
        let expires_at = token.expires_at();

        *self.slot.write().await = Some(token);

        info!(
            expires_in = issued.expires_in,
            expires_at = %expires_at,
            token = %preview(&value, 12),
            "access token renewed"
        );
        Ok(value)
    }

    /// Drop the cached token. Idempotent.
    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
        info!("access token cache cleared");
    }

    /// Report cache state without contacting the issuer.
    pub async fn inspect(&self) -> TokenStatus {
        let current = self.slot.read().await.clone();
        let now = Utc::now();
        match current {
            Some(token) => TokenStatus {
                cached: token.is_usable_at(now, self.renewal_buffer),
                expires_at: Some(token.expires_at()),
                expires_in: (token.expires_at() - now).num_seconds(),
            },
            None => TokenStatus {
                cached: false,
                expires_at: None,
                expires_in: 0,
            },
        }
    }

    async fn usable_token(&self) -> Option<Arc<AccessToken>> {
        let current = self.slot.read().await.clone()?;
        current
            .is_usable_at(Utc::now(), self.renewal_buffer)
            .then_some(current)
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("renewal_buffer_secs", &self.renewal_buffer.num_seconds())
            .finish_non_exhaustive()
    }
}
