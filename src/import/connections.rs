//! Resolution of a target id to a live remote-write connection.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::config::ImportConfig;
use crate::error::AppError;
use crate::import::RemoteWriteOps;
use crate::salesforce::{
    CompositeClient, OAuthRefresher, OrgCredentials, SalesforceClient, TokenRefresher,
};

/// Supplies the remote-write client for a target.
pub trait ConnectionProvider: Send + Sync + 'static {
    type Remote: RemoteWriteOps;

    /// # Errors
    ///
    /// `AppError::UnknownConnection` when the target has no registered connection.
    fn connect<'a>(
        &'a self,
        target_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Remote, AppError>> + Send + 'a>>;
}

/// In-memory registry of org connections keyed by org id.
///
/// One [`SalesforceClient`] is kept per org, so a token refreshed by one job
/// is seen by every later job on the same org.
pub struct OrgConnections {
    clients: RwLock<HashMap<String, SalesforceClient>>,
    refresher: Arc<dyn TokenRefresher>,
    config: ImportConfig,
}

impl OrgConnections {
    /// Registry whose clients refresh through the OAuth refresh-token grant.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidRequest` when `config.oauth_client_id` is unset.
    pub fn new(config: ImportConfig) -> Result<Self, AppError> {
        let client_id = config
            .oauth_client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                AppError::InvalidRequest(
                    "OAuth client id is required (set DATAFORGE_OAUTH_CLIENT_ID)".to_string(),
                )
            })?;

        let mut refresher = OAuthRefresher::new(client_id);
        if let Some(login_url) = &config.oauth_login_url {
            refresher = refresher.with_login_url(login_url.clone());
        }
        Ok(Self::with_refresher(config, Arc::new(refresher)))
    }

    pub fn with_refresher(config: ImportConfig, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            refresher,
            config,
        }
    }

    /// Adds or replaces the connection for `creds.org_id`.
    pub async fn register(&self, creds: OrgCredentials) -> Result<(), AppError> {
        let target_id = creds.org_id.trim().to_string();
        if target_id.is_empty() {
            return Err(AppError::InvalidRequest(
                "Connection requires an org id".to_string(),
            ));
        }

        let client = SalesforceClient::new(
            creds,
            self.refresher.clone(),
            self.config.request_timeout,
        )?;
        self.clients.write().await.insert(target_id.clone(), client);

        info!("[IMPORT] Registered connection for org {}", redact_id(&target_id));
        Ok(())
    }

    pub async fn remove(&self, target_id: &str) -> bool {
        self.clients.write().await.remove(target_id).is_some()
    }

    pub async fn contains(&self, target_id: &str) -> bool {
        self.clients.read().await.contains_key(target_id)
    }
}

impl ConnectionProvider for OrgConnections {
    type Remote = CompositeClient;

    fn connect<'a>(
        &'a self,
        target_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Remote, AppError>> + Send + 'a>> {
        Box::pin(async move {
            let clients = self.clients.read().await;
            clients
                .get(target_id)
                .cloned()
                .map(CompositeClient::new)
                .ok_or_else(|| AppError::UnknownConnection(target_id.to_string()))
        })
    }
}

/// Shortens an id to its first 8 characters for logging.
pub(crate) fn redact_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((end, _)) => format!("{}...", &id[..end]),
        None => id.to_string(),
    }
}
