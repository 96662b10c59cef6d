use reqwest::Client;
use std::sync::Arc;

use crate::config::Config;
use crate::rate_limiter::RateLimiter;

/// Obtains a short-lived bearer token for the primary registry via OAuth2
/// client-credentials exchange.
///
/// Reactive only: there is no caching or refresh scheduling. Callers obtain
/// one token per logical search and reuse it for every record fetch within
/// that search.
pub struct TokenAuthenticator {
    client: Client,
    auth_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    limiter: Arc<RateLimiter>,
}

impl TokenAuthenticator {
    /// The limiter is shared with the primary registry service: the auth
    /// endpoint counts against the same provider budget.
    pub fn new(config: &Config, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client: Client::new(),
            auth_url: config.registry_auth_url.clone(),
            client_id: config.registry_client_id.clone(),
            client_secret: config.registry_client_secret.clone(),
            limiter,
        }
    }

    /// Returns `None` on missing credentials, transport error, or any
    /// non-200 response, logging the failure. Never errors.
    pub async fn get_token(&self) -> Option<String> {
        let (client_id, client_secret) = match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => (id, secret),
            _ => {
                tracing::warn!("Primary registry credentials not configured");
                return None;
            }
        };

        self.limiter.acquire().await;

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("scope", "cnpj"),
        ];

        let response = match self.client.post(&self.auth_url).form(&params).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Token request failed: {}", e);
                return None;
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            tracing::warn!("Token endpoint returned status {}", response.status());
            return None;
        }

        match response.json::<serde_json::Value>().await {
            Ok(body) => {
                let token = body
                    .get("access_token")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                if token.is_none() {
                    tracing::warn!("Token response missing access_token");
                }
                token
            }
            Err(e) => {
                tracing::warn!("Failed to parse token response: {}", e);
                None
            }
        }
    }
}
