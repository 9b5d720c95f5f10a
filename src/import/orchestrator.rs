//! Import job life cycle: submit, run the batch loop, finalize.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{ImportConfig, MAX_CHUNK_SIZE};
use crate::error::AppError;
use crate::import::connections::{redact_id, ConnectionProvider};
use crate::import::dispatcher::{failure_message, BatchDispatcher, RecordOutcome};
use crate::import::model::{
    ErrorRow, ImportJob, ImportProgress, ImportRequest, ImportStarted, JobDetail, JobPage,
    JobStatus, IMPORT_STARTED_MESSAGE,
};
use crate::import::record::{self, Record};
use crate::import::{JobStoreOps, RemoteWriteOps};
use crate::salesforce::composite::UNKNOWN_ERROR;
use crate::storage::current_timestamp;

/// Number of jobs returned by [`ImportOrchestrator::recent_jobs`].
pub const RECENT_JOBS_LIMIT: usize = 5;

/// Entry point of the import engine.
///
/// Each started job runs on its own task; chunks within a job are written
/// strictly one after another.
pub struct ImportOrchestrator<S, P> {
    store: Arc<S>,
    connections: Arc<P>,
    config: ImportConfig,
}

impl<S, P> ImportOrchestrator<S, P>
where
    S: JobStoreOps,
    P: ConnectionProvider,
{
    pub fn new(store: S, connections: Arc<P>, config: ImportConfig) -> Self {
        Self {
            store: Arc::new(store),
            connections,
            config,
        }
    }

    /// Creates a PENDING job and returns it without touching any records.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidRequest` - blank target or resource type
    /// - `AppError::UnknownConnection` - no connection for the target
    pub async fn submit(&self, request: &ImportRequest) -> Result<ImportJob, AppError> {
        if request.target_id.trim().is_empty() {
            return Err(AppError::InvalidRequest("Target org is required".to_string()));
        }
        if request.resource_type.trim().is_empty() {
            return Err(AppError::InvalidRequest("Resource type is required".to_string()));
        }
        self.connections.connect(request.target_id.trim()).await?;

        let job = ImportJob::pending(Uuid::new_v4().to_string(), request, current_timestamp());
        self.store.create_job(&job).await?;

        info!(
            "[IMPORT] Job {} submitted: {} {} for org {}",
            redact_id(&job.id),
            job.operation.as_str(),
            job.resource_type,
            redact_id(&job.target_id)
        );
        Ok(job)
    }

    /// Spawns the batch loop for a PENDING job.
    ///
    /// The returned handle completes when the job reaches a terminal status;
    /// the run itself never fails, so awaiting it is optional.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` - unknown job
    /// - `AppError::InvalidTransition` - the job was already started
    /// - `AppError::UnknownConnection` - the job's target has no connection
    pub async fn start(&self, job_id: &str, records: Vec<Record>) -> Result<JoinHandle<()>, AppError> {
        let job = self.store.get_job(job_id).await?.job;
        if job.status != JobStatus::Pending {
            return Err(AppError::InvalidTransition {
                job_id: job.id,
                from: job.status.as_str().to_string(),
                to: JobStatus::Processing.as_str().to_string(),
            });
        }

        let remote = self.connections.connect(&job.target_id).await?;
        let store = Arc::clone(&self.store);
        let chunk_size = self.config.chunk_size.clamp(1, MAX_CHUNK_SIZE);

        Ok(tokio::spawn(run(
            store,
            BatchDispatcher::new(remote),
            job,
            records,
            chunk_size,
        )))
    }

    /// Submits and starts in one call.
    pub async fn import(
        &self,
        request: &ImportRequest,
        records: Vec<Record>,
    ) -> Result<ImportStarted, AppError> {
        let job = self.submit(request).await?;
        self.start(&job.id, records).await?;
        Ok(ImportStarted {
            job,
            message: IMPORT_STARTED_MESSAGE.to_string(),
        })
    }

    /// One zero-based page of a target's jobs, newest first.
    pub async fn jobs(&self, target_id: &str, page: usize) -> Result<JobPage, AppError> {
        self.store
            .list_jobs(target_id, page, self.config.page_size.max(1))
            .await
    }

    pub async fn recent_jobs(&self, target_id: &str) -> Result<Vec<ImportJob>, AppError> {
        self.store.recent_jobs(target_id, RECENT_JOBS_LIMIT).await
    }

    /// Job status and counters plus every error row, ordered by row number.
    pub async fn job(&self, job_id: &str) -> Result<JobDetail, AppError> {
        self.store.get_job(job_id).await
    }
}

/// The batch loop. Every failure ends up as data on the job; nothing escapes.
async fn run<S, R>(
    store: Arc<S>,
    dispatcher: BatchDispatcher<R>,
    job: ImportJob,
    records: Vec<Record>,
    chunk_size: usize,
) where
    S: JobStoreOps,
    R: RemoteWriteOps,
{
    let short_id = redact_id(&job.id);

    if let Err(e) = store.mark_processing(&job.id, records.len() as i64).await {
        error!("[IMPORT] Job {} could not start: {}", short_id, e);
        return;
    }
    info!(
        "[IMPORT] Job {} processing {} records in chunks of {}",
        short_id,
        records.len(),
        chunk_size
    );

    let mode = job.write_mode();
    let mut progress = ImportProgress::default();
    // Error rows whose write failed; retried with the next chunk's rows.
    let mut unsaved: Vec<ErrorRow> = Vec::new();

    for (chunk_index, chunk) in records.chunks(chunk_size).enumerate() {
        let offset = chunk_index * chunk_size;

        let outcomes = match dispatcher.dispatch(&job.resource_type, &mode, chunk).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(
                    "[IMPORT] Job {} chunk at row {} failed: {}",
                    short_id,
                    offset + 1,
                    e
                );
                vec![RecordOutcome::failed(failure_message(&e)); chunk.len()]
            }
        };

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        unsaved.extend(error_rows(offset, chunk, &outcomes));
        flush_errors(store.as_ref(), &job.id, &mut unsaved).await;

        progress.record(succeeded, chunk.len() - succeeded);
        if let Err(e) = store.update_progress(&job.id, progress).await {
            error!("[IMPORT] Job {} failed to store progress: {}", short_id, e);
        }
    }

    flush_errors(store.as_ref(), &job.id, &mut unsaved).await;
    if !unsaved.is_empty() {
        error!(
            "[IMPORT] Job {} finalizing with {} error rows unsaved",
            short_id,
            unsaved.len()
        );
    }

    let status = JobStatus::terminal_for(progress.error);
    match store
        .finalize(&job.id, status, progress, current_timestamp())
        .await
    {
        Ok(()) => info!(
            "[IMPORT] Job {} {}: {} succeeded, {} failed",
            short_id, status, progress.success, progress.error
        ),
        Err(e) => error!("[IMPORT] Job {} could not be finalized: {}", short_id, e),
    }
}

/// Writes `rows` as one batch and clears them on success. On failure they
/// stay in `rows` for the next attempt.
async fn flush_errors<S: JobStoreOps>(store: &S, job_id: &str, rows: &mut Vec<ErrorRow>) {
    if rows.is_empty() {
        return;
    }
    let written = store.append_errors(job_id, rows.as_slice()).await;
    match written {
        Ok(()) => rows.clear(),
        Err(e) => warn!(
            "[IMPORT] Job {} failed to store {} error rows: {}",
            redact_id(job_id),
            rows.len(),
            e
        ),
    }
}

/// Error rows for the failed records of the chunk starting at `offset`.
fn error_rows(offset: usize, chunk: &[Record], outcomes: &[RecordOutcome]) -> Vec<ErrorRow> {
    chunk
        .iter()
        .zip(outcomes)
        .enumerate()
        .filter(|(_, (_, outcome))| !outcome.success)
        .map(|(i, (rec, outcome))| ErrorRow {
            row_number: (offset + i + 1) as i64,
            error_message: outcome
                .error_message
                .clone()
                .unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
            raw_data: record::raw_snapshot(rec),
        })
        .collect()
}
