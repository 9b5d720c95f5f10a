//! Access-token renewal for Salesforce connections.
//!
//! The remote-write path never refreshes on its own schedule: a refresh runs
//! only after Salesforce answers 401, and the client retries the call once.

use std::future::Future;
use std::pin::Pin;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{error, info};

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Response from the OAuth token endpoint.
#[derive(Debug, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    /// May differ from the stored instance URL after an org migration.
    pub instance_url: String,
    #[serde(default)]
    pub token_type: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Refreshers
// ─────────────────────────────────────────────────────────────────────────────

/// Hook invoked by [`SalesforceClient`](super::SalesforceClient) when a
/// request comes back unauthorized.
pub trait TokenRefresher: Send + Sync {
    fn refresh<'a>(
        &'a self,
        http: &'a reqwest::Client,
        instance_url: &'a str,
        refresh_token: &'a SecretString,
    ) -> Pin<Box<dyn Future<Output = Result<AccessTokenResponse, AppError>> + Send + 'a>>;
}

/// Refresh-token grant against the Salesforce login domain.
#[derive(Debug, Clone)]
pub struct OAuthRefresher {
    client_id: String,
    /// Explicit login URL. When unset the login domain is derived from the
    /// instance URL (production vs sandbox).
    login_url: Option<String>,
}

impl OAuthRefresher {
    /// `client_id` is the consumer key of the connected app that issued the
    /// refresh tokens. Salesforce rejects the grant for any other key.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            login_url: None,
        }
    }

    pub fn with_login_url(mut self, login_url: impl Into<String>) -> Self {
        self.login_url = Some(login_url.into());
        self
    }
}

impl TokenRefresher for OAuthRefresher {
    fn refresh<'a>(
        &'a self,
        http: &'a reqwest::Client,
        instance_url: &'a str,
        refresh_token: &'a SecretString,
    ) -> Pin<Box<dyn Future<Output = Result<AccessTokenResponse, AppError>> + Send + 'a>> {
        Box::pin(async move {
            let login_url = match &self.login_url {
                Some(url) => url.clone(),
                None => get_login_url_for_refresh(instance_url),
            };
            refresh_access_token(http, &login_url, refresh_token, &self.client_id).await
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token Refresh
// ─────────────────────────────────────────────────────────────────────────────

/// Exchanges a refresh token for a new access token.
///
/// # Arguments
///
/// * `login_url` - Login domain hosting `/services/oauth2/token`
/// * `client_id` - Consumer key of the connected app that issued `refresh_token`
///
/// # Errors
///
/// - `AppError::SessionExpired` - the refresh token was rejected (400/401)
/// - `AppError::ConnectionFailed` - the token endpoint was unreachable
/// - `AppError::OAuthError` - any other non-success status
///
/// Neither token is ever logged.
pub async fn refresh_access_token(
    http: &reqwest::Client,
    login_url: &str,
    refresh_token: &SecretString,
    client_id: &str,
) -> Result<AccessTokenResponse, AppError> {
    let token_url = format!("{}/services/oauth2/token", login_url.trim_end_matches('/'));

    info!("[SFDC] Refreshing access token...");

    let params = [
        ("grant_type", "refresh_token"),
        ("client_id", client_id),
        ("refresh_token", refresh_token.expose_secret()),
    ];

    let response = http
        .post(&token_url)
        .form(&params)
        .send()
        .await
        .map_err(|_| {
            error!("[SFDC] Token refresh request failed");
            AppError::ConnectionFailed("Failed to connect for token refresh".to_string())
        })?;

    let status = response.status();

    if status.is_success() {
        let token_response: AccessTokenResponse = response.json().await.map_err(|_| {
            error!("[SFDC] Failed to parse token refresh response");
            AppError::Internal("Invalid token refresh response".to_string())
        })?;
        info!("[SFDC] Token refresh successful");
        return Ok(token_response);
    }

    error!("[SFDC] Token refresh failed with status: {}", status);
    match status {
        reqwest::StatusCode::BAD_REQUEST | reqwest::StatusCode::UNAUTHORIZED => {
            Err(AppError::SessionExpired)
        }
        _ => Err(AppError::OAuthError("Token refresh failed".to_string())),
    }
}

/// Picks the login domain for a refresh grant.
///
/// Sandboxes and scratch orgs authenticate against `test.salesforce.com`,
/// everything else against `login.salesforce.com`.
pub fn get_login_url_for_refresh(instance_url: &str) -> String {
    if instance_url.contains(".sandbox.")
        || instance_url.contains("test.salesforce.com")
        || instance_url.contains("--")
    {
        "https://test.salesforce.com".to_string()
    } else {
        "https://login.salesforce.com".to_string()
    }
}
