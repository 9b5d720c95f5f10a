//! Batched record import with per-row error capture.
//!
//! The orchestrator owns a job's life cycle and hands fixed-size chunks to the
//! dispatcher, which turns each chunk into one or two remote write calls.
//! Both collaborators sit behind traits so tests can swap in fakes.

use std::future::Future;
use std::pin::Pin;

use crate::error::AppError;
use crate::salesforce::{CompositeClient, SaveResult};
use crate::storage::{imports, Database};

pub mod connections;
pub mod dispatcher;
pub mod model;
pub mod orchestrator;
pub mod record;

#[cfg(test)]
pub(crate) mod fakes;

pub use connections::{ConnectionProvider, OrgConnections};
pub use dispatcher::{BatchDispatcher, RecordOutcome};
pub use model::{
    ErrorRow, ImportJob, ImportProgress, ImportRequest, ImportStarted, JobDetail, JobPage,
    JobStatus, Operation, WriteMode,
};
pub use orchestrator::ImportOrchestrator;
pub use record::Record;

/// Remote-write collaborator. Results come back in input order.
pub trait RemoteWriteOps: Send + Sync + 'static {
    fn create_collection<'a>(
        &'a self,
        resource_type: &'a str,
        records: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SaveResult>, AppError>> + Send + 'a>>;

    fn update_collection<'a>(
        &'a self,
        resource_type: &'a str,
        records: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SaveResult>, AppError>> + Send + 'a>>;

    fn upsert_collection<'a>(
        &'a self,
        resource_type: &'a str,
        external_id_field: &'a str,
        records: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SaveResult>, AppError>> + Send + 'a>>;
}

impl RemoteWriteOps for CompositeClient {
    fn create_collection<'a>(
        &'a self,
        resource_type: &'a str,
        records: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SaveResult>, AppError>> + Send + 'a>> {
        Box::pin(CompositeClient::create_collection(self, resource_type, records))
    }

    fn update_collection<'a>(
        &'a self,
        resource_type: &'a str,
        records: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SaveResult>, AppError>> + Send + 'a>> {
        Box::pin(CompositeClient::update_collection(self, resource_type, records))
    }

    fn upsert_collection<'a>(
        &'a self,
        resource_type: &'a str,
        external_id_field: &'a str,
        records: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SaveResult>, AppError>> + Send + 'a>> {
        Box::pin(CompositeClient::upsert_collection(
            self,
            resource_type,
            external_id_field,
            records,
        ))
    }
}

/// Persistence boundary for jobs and their error rows.
///
/// Exactly one run task writes to a given job, so implementations need not
/// arbitrate concurrent writers of the same job.
pub trait JobStoreOps: Send + Sync + 'static {
    fn create_job<'a>(
        &'a self,
        job: &'a ImportJob,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    /// PENDING to PROCESSING, recording the total record count.
    fn mark_processing<'a>(
        &'a self,
        job_id: &'a str,
        total_records: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    fn append_errors<'a>(
        &'a self,
        job_id: &'a str,
        rows: &'a [ErrorRow],
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    fn update_progress<'a>(
        &'a self,
        job_id: &'a str,
        progress: ImportProgress,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    /// PROCESSING to a terminal status, writing the final counters with it.
    fn finalize<'a>(
        &'a self,
        job_id: &'a str,
        status: JobStatus,
        progress: ImportProgress,
        completed_at: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    fn get_job<'a>(
        &'a self,
        job_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<JobDetail, AppError>> + Send + 'a>>;

    fn list_jobs<'a>(
        &'a self,
        target_id: &'a str,
        page: usize,
        page_size: usize,
    ) -> Pin<Box<dyn Future<Output = Result<JobPage, AppError>> + Send + 'a>>;

    fn recent_jobs<'a>(
        &'a self,
        target_id: &'a str,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ImportJob>, AppError>> + Send + 'a>>;
}

/// [`JobStoreOps`] over the SQLite database.
#[derive(Debug, Clone)]
pub struct DatabaseJobStore {
    db: Database,
}

impl DatabaseJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl JobStoreOps for DatabaseJobStore {
    fn create_job<'a>(
        &'a self,
        job: &'a ImportJob,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(imports::create_job(&self.db, job))
    }

    fn mark_processing<'a>(
        &'a self,
        job_id: &'a str,
        total_records: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(imports::mark_processing(&self.db, job_id, total_records))
    }

    fn append_errors<'a>(
        &'a self,
        job_id: &'a str,
        rows: &'a [ErrorRow],
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(imports::append_errors(&self.db, job_id, rows))
    }

    fn update_progress<'a>(
        &'a self,
        job_id: &'a str,
        progress: ImportProgress,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(imports::update_progress(&self.db, job_id, progress))
    }

    fn finalize<'a>(
        &'a self,
        job_id: &'a str,
        status: JobStatus,
        progress: ImportProgress,
        completed_at: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(imports::finalize(&self.db, job_id, status, progress, completed_at))
    }

    fn get_job<'a>(
        &'a self,
        job_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<JobDetail, AppError>> + Send + 'a>> {
        Box::pin(imports::get_job(&self.db, job_id))
    }

    fn list_jobs<'a>(
        &'a self,
        target_id: &'a str,
        page: usize,
        page_size: usize,
    ) -> Pin<Box<dyn Future<Output = Result<JobPage, AppError>> + Send + 'a>> {
        Box::pin(imports::list_jobs(&self.db, target_id, page, page_size))
    }

    fn recent_jobs<'a>(
        &'a self,
        target_id: &'a str,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ImportJob>, AppError>> + Send + 'a>> {
        Box::pin(imports::recent_jobs(&self.db, target_id, limit))
    }
}
