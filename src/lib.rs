//! Batched record import into Salesforce with per-row error capture.
//!
//! The crate installs no tracing subscriber; embedding binaries pick one.

pub mod config;
pub mod error;
pub mod import;
pub mod salesforce;
pub mod storage;

use std::path::PathBuf;
use std::sync::Arc;

pub use crate::config::ImportConfig;
pub use crate::error::AppError;
pub use crate::import::{
    DatabaseJobStore, ImportOrchestrator, ImportRequest, ImportStarted, JobDetail, JobPage,
    JobStatus, Operation, OrgConnections, Record,
};
pub use crate::salesforce::{OrgCredentials, TokenRefresher};
pub use crate::storage::Database;

/// Orchestrator over SQLite storage and registered org connections.
pub type SqliteOrchestrator = ImportOrchestrator<DatabaseJobStore, OrgConnections>;

/// Opens (and migrates) the database at `db_path` and wires an orchestrator
/// to an empty connection registry. Register orgs on the returned registry
/// before submitting jobs for them.
///
/// Expired sessions are renewed with the OAuth refresh grant of the
/// connected app named by `config.oauth_client_id`.
///
/// # Errors
///
/// - `AppError::InvalidRequest` - `config.oauth_client_id` is unset
/// - `AppError::Internal` - the database could not be opened or migrated
pub async fn open(
    db_path: PathBuf,
    config: ImportConfig,
) -> Result<(SqliteOrchestrator, Arc<OrgConnections>), AppError> {
    let connections = Arc::new(OrgConnections::new(config.clone())?);
    open_with_connections(db_path, config, connections).await
}

/// Like [`open`], with a caller-supplied token refresher.
pub async fn open_with_refresher(
    db_path: PathBuf,
    config: ImportConfig,
    refresher: Arc<dyn TokenRefresher>,
) -> Result<(SqliteOrchestrator, Arc<OrgConnections>), AppError> {
    let connections = Arc::new(OrgConnections::with_refresher(config.clone(), refresher));
    open_with_connections(db_path, config, connections).await
}

async fn open_with_connections(
    db_path: PathBuf,
    config: ImportConfig,
    connections: Arc<OrgConnections>,
) -> Result<(SqliteOrchestrator, Arc<OrgConnections>), AppError> {
    let db = Database::init(db_path).await?;
    let orchestrator = ImportOrchestrator::new(
        DatabaseJobStore::new(db),
        Arc::clone(&connections),
        config,
    );
    Ok((orchestrator, connections))
}
