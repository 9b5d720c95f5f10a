//! Runtime configuration for the import engine.

use std::env;
use std::time::Duration;

/// Upper bound on records per sObject Collections call.
pub const MAX_CHUNK_SIZE: usize = 200;

/// Default number of jobs per history page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

/// Tunables for batching, history paging and HTTP behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    /// Records per chunk. Always within `1..=MAX_CHUNK_SIZE`.
    pub chunk_size: usize,
    /// Jobs per page returned by history listings.
    pub page_size: usize,
    /// Timeout applied to each Salesforce HTTP request.
    pub request_timeout: Duration,
    /// Consumer key of the connected app that issued the refresh tokens.
    /// Required for the OAuth refresh grant.
    pub oauth_client_id: Option<String>,
    /// Token endpoint host override. Unset means login or test domain,
    /// picked from the instance URL.
    pub oauth_login_url: Option<String>,
}

impl ImportConfig {
    /// Reads the `DATAFORGE_*` variables, falling back to defaults:
    ///
    /// - `DATAFORGE_CHUNK_SIZE`, `DATAFORGE_PAGE_SIZE`
    /// - `DATAFORGE_REQUEST_TIMEOUT_SECS`
    /// - `DATAFORGE_OAUTH_CLIENT_ID`, `DATAFORGE_OAUTH_LOGIN_URL`
    pub fn from_env() -> Self {
        Self {
            chunk_size: clamp_chunk_size(env_usize("DATAFORGE_CHUNK_SIZE", MAX_CHUNK_SIZE)),
            page_size: clamp_page_size(env_usize("DATAFORGE_PAGE_SIZE", DEFAULT_PAGE_SIZE)),
            request_timeout: env_duration_secs(
                "DATAFORGE_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            ),
            oauth_client_id: env_string("DATAFORGE_OAUTH_CLIENT_ID"),
            oauth_login_url: env_string("DATAFORGE_OAUTH_LOGIN_URL"),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = clamp_chunk_size(chunk_size);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = clamp_page_size(page_size);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_oauth_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.oauth_client_id = Some(client_id.into());
        self
    }

    pub fn with_oauth_login_url(mut self, login_url: impl Into<String>) -> Self {
        self.oauth_login_url = Some(login_url.into());
        self
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            chunk_size: MAX_CHUNK_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            oauth_client_id: None,
            oauth_login_url: None,
        }
    }
}

fn clamp_chunk_size(size: usize) -> usize {
    size.clamp(1, MAX_CHUNK_SIZE)
}

fn clamp_page_size(size: usize) -> usize {
    size.clamp(1, 200)
}
