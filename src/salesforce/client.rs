//! Authenticated Salesforce HTTP client with transparent token refresh.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use url::Url;

use crate::error::AppError;
use crate::salesforce::refresh::TokenRefresher;
use crate::salesforce::API_VERSION;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all Salesforce API requests.
const CLIENT_USER_AGENT: &str = concat!("dataforge/", env!("CARGO_PKG_VERSION"));

/// Query parameter keys (case-insensitive) whose values are redacted in logs.
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "access_token",
    "refresh_token",
    "client_secret",
    "code",
    "token",
    "sid",
    "session",
    "authorization",
];

// ─────────────────────────────────────────────────────────────────────────────
// LoggingMode
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how URLs are rendered in log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    /// Path component only, e.g. `/services/data/v60.0/composite/sobjects`.
    #[default]
    PathOnly,
    /// Path plus query string with sensitive values replaced by `***`.
    PathAndQueryRedacted,
}

// ─────────────────────────────────────────────────────────────────────────────
// OrgCredentials
// ─────────────────────────────────────────────────────────────────────────────

/// Connection context for one target org.
#[derive(Clone)]
pub struct OrgCredentials {
    /// Salesforce organization id, used as the import target id.
    pub org_id: String,
    pub username: String,
    /// e.g. `https://na1.salesforce.com`
    pub instance_url: String,
    pub access_token: SecretString,
    /// Without a refresh token a 401 cannot be recovered.
    pub refresh_token: Option<SecretString>,
    /// e.g. `v60.0`
    pub api_version: String,
}

impl std::fmt::Debug for OrgCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrgCredentials")
            .field("org_id", &self.org_id)
            .field("username", &self.username)
            .field("instance_url", &self.instance_url)
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl OrgCredentials {
    pub fn new(
        org_id: impl Into<String>,
        instance_url: impl Into<String>,
        access_token: SecretString,
    ) -> Self {
        Self {
            org_id: org_id.into(),
            username: String::new(),
            instance_url: instance_url.into(),
            access_token,
            refresh_token: None,
            api_version: API_VERSION.to_string(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: SecretString) -> Self {
        self.refresh_token = Some(refresh_token);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Sanitization
// ─────────────────────────────────────────────────────────────────────────────

fn is_sensitive_param(key: &str) -> bool {
    let key_lower = key.to_ascii_lowercase();
    SENSITIVE_QUERY_PARAMS.iter().any(|&s| key_lower == s)
}

/// Renders `url` for logging. Scheme, host and fragment are always dropped.
///
/// # Arguments
///
/// * `url` - The request URL
/// * `mode` - Whether the query string is kept (with sensitive values redacted)
pub fn sanitize_url_for_logs(url: &Url, mode: LoggingMode) -> String {
    let path = url.path();

    match mode {
        LoggingMode::PathOnly => path.to_string(),
        LoggingMode::PathAndQueryRedacted => {
            let pairs: Vec<String> = url
                .query_pairs()
                .map(|(key, value)| {
                    if is_sensitive_param(&key) {
                        format!("{}=***", key)
                    } else {
                        format!("{}={}", key, value)
                    }
                })
                .collect();

            if pairs.is_empty() {
                path.to_string()
            } else {
                format!("{}?{}", path, pairs.join("&"))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SalesforceClient
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP client bound to one org.
///
/// `creds` is read by every request and written only by a refresh.
/// `refresh_lock` serializes refreshes so concurrent 401s trigger one grant.
#[derive(Clone)]
pub struct SalesforceClient {
    http: reqwest::Client,
    creds: Arc<RwLock<OrgCredentials>>,
    refresh_lock: Arc<Mutex<()>>,
    refresher: Arc<dyn TokenRefresher>,
    logging_mode: LoggingMode,
}

impl SalesforceClient {
    /// Creates a client for one org.
    ///
    /// # Arguments
    ///
    /// * `creds` - Credentials of the org; replaced in place by refreshes
    /// * `refresher` - Grant used when a request comes back 401
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the HTTP client fails to initialize.
    pub fn new(
        creds: OrgCredentials,
        refresher: Arc<dyn TokenRefresher>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        Ok(Self {
            http: build_http_client(timeout)?,
            creds: Arc::new(RwLock::new(creds)),
            refresh_lock: Arc::new(Mutex::new(())),
            refresher,
            logging_mode: LoggingMode::default(),
        })
    }

    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }

    pub async fn api_version(&self) -> String {
        self.creds.read().await.api_version.clone()
    }

    pub async fn instance_url(&self) -> String {
        self.creds.read().await.instance_url.clone()
    }

    /// Sends an authenticated JSON request to `path` on the instance.
    ///
    /// On 401 the access token is refreshed once and the request retried once.
    ///
    /// # Arguments
    ///
    /// * `method` - HTTP method
    /// * `path` - Absolute path on the instance, e.g. `/services/data/v60.0/limits`
    /// * `body` - Serialized JSON body, if any
    ///
    /// # Errors
    ///
    /// - `AppError::NotAuthenticated` - no instance URL, or 401 without a refresh token
    /// - `AppError::SessionExpired` - refresh rejected, or still 401 after refresh
    /// - `AppError::ConnectionFailed` - network error
    pub async fn request_authed(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, AppError> {
        let (url, original_token) = self.resolve(path).await?;

        let response = self
            .send_once(method.clone(), url, body.clone(), &original_token)
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        info!("[SFDC] Received 401, attempting token refresh...");

        {
            let _guard = self.refresh_lock.lock().await;

            let current_token = self.creds.read().await.access_token.expose_secret().to_string();
            if current_token == original_token {
                self.do_token_refresh().await?;
            } else {
                info!("[SFDC] Token already refreshed by another request");
            }
        }

        // The instance URL may have moved during the refresh.
        let (retry_url, new_token) = self.resolve(path).await?;
        let retry_response = self.send_once(method, retry_url, body, &new_token).await?;

        if retry_response.status() == StatusCode::UNAUTHORIZED {
            warn!("[SFDC] Still unauthorized after token refresh");
            return Err(AppError::SessionExpired);
        }

        Ok(retry_response)
    }

    async fn resolve(&self, path: &str) -> Result<(Url, String), AppError> {
        let creds = self.creds.read().await;
        if creds.instance_url.is_empty() {
            return Err(AppError::NotAuthenticated);
        }

        let base = Url::parse(&creds.instance_url)
            .map_err(|_| AppError::Internal("Invalid instance URL".to_string()))?;
        let url = base
            .join(path)
            .map_err(|_| AppError::Internal(format!("Invalid path: {}", path)))?;

        Ok((url, creds.access_token.expose_secret().to_string()))
    }

    async fn send_once(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
        access_token: &str,
    ) -> Result<reqwest::Response, AppError> {
        let start = Instant::now();
        let sanitized_url = sanitize_url_for_logs(&url, self.logging_mode);

        let mut request = self
            .http
            .request(method.clone(), url.as_str())
            .bearer_auth(access_token);
        if let Some(bytes) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(bytes);
        }

        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                let x_request_id = response
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                info!(
                    "[SFDC] {} {} {} {}ms {}",
                    method,
                    sanitized_url,
                    response.status().as_u16(),
                    duration_ms,
                    x_request_id
                );
                Ok(response)
            }
            Err(_) => {
                // The reqwest error may embed the full URL; never surface it.
                info!("[SFDC] {} {} FAILED {}ms", method, sanitized_url, duration_ms);
                Err(AppError::ConnectionFailed(
                    "Connection to Salesforce failed".to_string(),
                ))
            }
        }
    }

    async fn do_token_refresh(&self) -> Result<(), AppError> {
        let (instance_url, refresh_token) = {
            let creds = self.creds.read().await;
            (creds.instance_url.clone(), creds.refresh_token.clone())
        };

        let Some(refresh_token) = refresh_token else {
            warn!("[SFDC] No refresh token available for this org");
            return Err(AppError::NotAuthenticated);
        };

        let token_response = self
            .refresher
            .refresh(&self.http, &instance_url, &refresh_token)
            .await?;

        let mut creds = self.creds.write().await;
        creds.access_token = SecretString::from(token_response.access_token);
        if !token_response.instance_url.is_empty() {
            creds.instance_url = token_response.instance_url;
        }

        info!("[SFDC] Token refresh complete, credentials updated");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Client Builder
// ─────────────────────────────────────────────────────────────────────────────

fn build_http_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::salesforce::refresh::{AccessTokenResponse, OAuthRefresher};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Hands out a fixed token and counts how often it was asked.
    pub(crate) struct StaticRefresher {
        pub token: String,
        pub instance_url: String,
        pub calls: AtomicUsize,
    }

    impl StaticRefresher {
        pub(crate) fn new(token: &str) -> Self {
            Self {
                token: token.to_string(),
                instance_url: String::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TokenRefresher for StaticRefresher {
        fn refresh<'a>(
            &'a self,
            _http: &'a reqwest::Client,
            _instance_url: &'a str,
            _refresh_token: &'a SecretString,
        ) -> Pin<Box<dyn Future<Output = Result<AccessTokenResponse, AppError>> + Send + 'a>>
        {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(AccessTokenResponse {
                    access_token: self.token.clone(),
                    instance_url: self.instance_url.clone(),
                    token_type: "Bearer".to_string(),
                })
            })
        }
    }

    fn creds_for(instance_url: &str) -> OrgCredentials {
        OrgCredentials::new(
            "00Dxx0000001234",
            instance_url,
            SecretString::from("old".to_string()),
        )
        .with_refresh_token(SecretString::from("refresh".to_string()))
    }

    fn client_with(creds: OrgCredentials, refresher: Arc<dyn TokenRefresher>) -> SalesforceClient {
        SalesforceClient::new(creds, refresher, Duration::from_secs(5)).expect("client builds")
    }

    #[test]
    fn sanitize_path_only_drops_host_query_and_fragment() {
        let url = Url::parse("https://na1.salesforce.com/services/oauth2/token?code=secret#frag")
            .unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathOnly);

        assert_eq!(result, "/services/oauth2/token");
    }

    #[test]
    fn sanitize_redacts_sensitive_query_values() {
        let url = Url::parse(
            "https://na1.salesforce.com/path?access_token=secret123&q=hello&SID=sess456",
        )
        .unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathAndQueryRedacted);

        assert!(result.contains("q=hello"));
        assert!(result.contains("access_token=***"));
        assert!(result.contains("SID=***"));
        assert!(!result.contains("secret123"));
        assert!(!result.contains("sess456"));
    }

    #[test]
    fn sensitive_params_require_exact_key() {
        assert!(is_sensitive_param("Refresh_Token"));
        assert!(!is_sensitive_param("access_token_id"));
        assert!(!is_sensitive_param("q"));
    }

    #[test]
    fn org_credentials_debug_redacts_tokens() {
        let creds = OrgCredentials::new(
            "00Dxx0000001234",
            "https://na1.salesforce.com",
            SecretString::from("super_secret_token".to_string()),
        )
        .with_refresh_token(SecretString::from("super_secret_refresh".to_string()))
        .with_username("ops@example.com");

        let debug_output = format!("{:?}", creds);

        assert!(debug_output.contains("00Dxx0000001234"));
        assert!(debug_output.contains("ops@example.com"));
        assert!(debug_output.contains(API_VERSION));
        assert!(!debug_output.contains("super_secret_token"));
        assert!(!debug_output.contains("super_secret_refresh"));
    }

    #[tokio::test]
    async fn empty_instance_url_is_not_authenticated() {
        let client = client_with(creds_for(""), Arc::new(StaticRefresher::new("new")));

        let result = client.request_authed(Method::GET, "/x", None).await;

        assert!(matches!(result, Err(AppError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn unauthorized_triggers_one_refresh_and_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v60.0/limits"))
            .and(header("Authorization", "Bearer old"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/services/data/v60.0/limits"))
            .and(header("Authorization", "Bearer new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let refresher = Arc::new(StaticRefresher::new("new"));
        let client = client_with(creds_for(&server.uri()), refresher.clone());

        let response = client
            .request_authed(Method::GET, "/services/data/v60.0/limits", None)
            .await
            .expect("retry succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_unauthorized_is_session_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let refresher = Arc::new(StaticRefresher::new("new"));
        let client = client_with(creds_for(&server.uri()), refresher.clone());

        let result = client.request_authed(Method::GET, "/any", None).await;

        assert!(matches!(result, Err(AppError::SessionExpired)));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unauthorized_without_refresh_token_is_not_authenticated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let creds = OrgCredentials::new(
            "00Dxx0000001234",
            server.uri(),
            SecretString::from("old".to_string()),
        );
        let client = client_with(creds, Arc::new(StaticRefresher::new("new")));

        let result = client.request_authed(Method::GET, "/any", None).await;

        assert!(matches!(result, Err(AppError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn concurrent_unauthorized_requests_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Authorization", "Bearer old"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("Authorization", "Bearer new"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let refresher = Arc::new(StaticRefresher::new("new"));
        let client = client_with(creds_for(&server.uri()), refresher.clone());

        let (a, b) = tokio::join!(
            client.request_authed(Method::GET, "/a", None),
            client.request_authed(Method::GET, "/b", None)
        );

        assert_eq!(a.expect("a succeeds").status(), StatusCode::OK);
        assert_eq!(b.expect("b succeeds").status(), StatusCode::OK);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_through_oauth_updates_migrated_instance() {
        let old_instance = MockServer::start().await;
        let new_instance = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&old_instance)
            .await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new",
                "instance_url": new_instance.uri(),
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&old_instance)
            .await;
        Mock::given(method("GET"))
            .and(header("Authorization", "Bearer new"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&new_instance)
            .await;

        let refresher = OAuthRefresher::new("forge_client").with_login_url(old_instance.uri());
        let client = client_with(creds_for(&old_instance.uri()), Arc::new(refresher));

        let response = client
            .request_authed(Method::GET, "/services/data/v60.0/limits", None)
            .await
            .expect("retry on migrated instance succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(client.instance_url().await, new_instance.uri());
    }
}
