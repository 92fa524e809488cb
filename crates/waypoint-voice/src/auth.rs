//! Bearer tokens for the agent service.
//!
//! The agent gateway never owns a credential. It asks an injected
//! [`AuthTokenProvider`] for one on every request and reports rejections back
//! through [`AuthTokenProvider::invalidate`].

use crate::config::AgentConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};
use waypoint_types::AgentStreamError;

/// Grant type for exchanging an API key at an IAM token endpoint.
pub const API_KEY_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// Tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Timeout for one token exchange.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait AuthTokenProvider: Send + Sync {
    /// Returns a bearer token valid for an agent request.
    async fn bearer_token(&self) -> Result<String, AgentStreamError>;

    /// Forgets any cached token so the next call obtains a fresh one.
    async fn invalidate(&self) {}
}

/// Builds the provider implied by the agent settings.
///
/// A configured `token_url` wins over a static `bearer_token`.
pub fn build_token_provider(
    config: &AgentConfig,
) -> Result<Arc<dyn AuthTokenProvider>, AgentStreamError> {
    if !config.token_url.is_empty() {
        if config.api_key.is_empty() {
            return Err(AgentStreamError::Authorization(
                "agent.token_url is set but agent.api_key is empty".to_string(),
            ));
        }
        return Ok(Arc::new(IamTokenProvider::new(
            &config.token_url,
            &config.api_key,
        )?));
    }
    if !config.bearer_token.is_empty() {
        return Ok(Arc::new(StaticToken::new(&config.bearer_token)));
    }
    Err(AgentStreamError::Authorization(
        "no agent credentials configured".to_string(),
    ))
}

/// A fixed, pre-issued bearer token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StaticToken").field(&"[REDACTED]").finish()
    }
}

#[async_trait]
impl AuthTokenProvider for StaticToken {
    async fn bearer_token(&self) -> Result<String, AgentStreamError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Lifetime in seconds. Tokens without one never expire locally.
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires_at) => now + REFRESH_MARGIN < expires_at,
            None => true,
        }
    }
}

/// Exchanges a long-lived API key for short-lived bearer tokens.
///
/// The current token is shared by all requests. Refreshes are serialized
/// behind the write lock, so concurrent requests that find a stale token
/// trigger a single exchange.
pub struct IamTokenProvider {
    client: reqwest::Client,
    token_url: String,
    api_key: String,
    cached: RwLock<Option<CachedToken>>,
}

impl IamTokenProvider {
    pub fn new(token_url: &str, api_key: &str) -> Result<Self, AgentStreamError> {
        let client = reqwest::Client::builder()
            .timeout(EXCHANGE_TIMEOUT)
            .build()
            .map_err(|e| AgentStreamError::Authorization(format!("failed to build client: {}", e)))?;
        Ok(Self {
            client,
            token_url: token_url.to_string(),
            api_key: api_key.to_string(),
            cached: RwLock::new(None),
        })
    }

    async fn exchange(&self) -> Result<CachedToken, AgentStreamError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[("apikey", self.api_key.as_str()), ("grant_type", API_KEY_GRANT_TYPE)])
            .send()
            .await
            .map_err(|e| AgentStreamError::Authorization(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentStreamError::Authorization(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AgentStreamError::Authorization(format!("invalid token response: {}", e)))?;

        info!(expires_in = ?token.expires_in, "obtained agent bearer token");
        Ok(CachedToken {
            value: token.access_token,
            // Lifetimes past what `Instant` can represent count as no expiry.
            expires_at: token
                .expires_in
                .and_then(|secs| Instant::now().checked_add(Duration::from_secs(secs))),
        })
    }
}

impl fmt::Debug for IamTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IamTokenProvider")
            .field("token_url", &self.token_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl AuthTokenProvider for IamTokenProvider {
    async fn bearer_token(&self) -> Result<String, AgentStreamError> {
        if let Some(token) = self.cached.read().await.as_ref() {
            if token.is_fresh(Instant::now()) {
                return Ok(token.value.clone());
            }
        }

        let mut cached = self.cached.write().await;
        // Another request may have refreshed while this one waited for the lock.
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Instant::now()) {
                return Ok(token.value.clone());
            }
        }

        let token = self.exchange().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn invalidate(&self) {
        if self.cached.write().await.take().is_some() {
            warn!("agent bearer token invalidated");
        }
    }
}
