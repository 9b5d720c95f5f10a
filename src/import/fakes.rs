//! In-memory collaborators for import tests.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::AppError;
use crate::import::model::{ErrorRow, ImportJob, ImportProgress, JobDetail, JobPage, JobStatus};
use crate::import::record::Record;
use crate::import::{JobStoreOps, RemoteWriteOps};
use crate::salesforce::SaveResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    Create,
    Update,
    Upsert,
}

#[derive(Debug, Clone)]
pub(crate) struct RemoteCall {
    pub kind: CallKind,
    pub resource_type: String,
    pub external_id_field: Option<String>,
    pub records: Vec<Record>,
}

impl RemoteCall {
    pub fn names(&self) -> Vec<String> {
        self.records.iter().map(name_of).collect()
    }
}

pub(crate) fn name_of(record: &Record) -> String {
    match record.get("Name") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Accepts every record except those carrying a `Reject` field, whose value
/// becomes the remote error message. Accepted records get the id
/// `"{kind}:{Name}"`.
#[derive(Default)]
pub(crate) struct FakeRemote {
    pub calls: Mutex<Vec<RemoteCall>>,
    failing_calls: HashSet<usize>,
    failing_kinds: HashSet<&'static str>,
    short_results: bool,
    on_call: Option<Box<dyn Fn(usize) + Send + Sync>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// The zero-based `index`-th call fails as a whole.
    pub fn fail_call(mut self, index: usize) -> Self {
        self.failing_calls.insert(index);
        self
    }

    pub fn fail_kind(mut self, kind: CallKind) -> Self {
        self.failing_kinds.insert(kind_str(kind));
        self
    }

    /// Every call answers with one result fewer than records sent.
    pub fn short_results(mut self) -> Self {
        self.short_results = true;
        self
    }

    pub fn on_call(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_call = Some(Box::new(hook));
        self
    }

    pub fn recorded(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    fn respond(
        &self,
        kind: CallKind,
        resource_type: &str,
        external_id_field: Option<&str>,
        records: &[Record],
    ) -> Result<Vec<SaveResult>, AppError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(RemoteCall {
                kind,
                resource_type: resource_type.to_string(),
                external_id_field: external_id_field.map(str::to_string),
                records: records.to_vec(),
            });
            calls.len() - 1
        };

        if let Some(hook) = &self.on_call {
            hook(index);
        }

        if self.failing_calls.contains(&index) || self.failing_kinds.contains(kind_str(kind)) {
            return Err(AppError::ConnectionFailed("connection reset".to_string()));
        }

        let mut results: Vec<SaveResult> = records
            .iter()
            .map(|record| match record.get("Reject") {
                Some(Value::String(message)) => SaveResult::failed(message, message.clone()),
                _ => SaveResult::ok(format!("{}:{}", kind_str(kind), name_of(record))),
            })
            .collect();
        if self.short_results {
            results.pop();
        }
        Ok(results)
    }
}

fn kind_str(kind: CallKind) -> &'static str {
    match kind {
        CallKind::Create => "create",
        CallKind::Update => "update",
        CallKind::Upsert => "upsert",
    }
}

impl RemoteWriteOps for FakeRemote {
    fn create_collection<'a>(
        &'a self,
        resource_type: &'a str,
        records: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SaveResult>, AppError>> + Send + 'a>> {
        Box::pin(async move { self.respond(CallKind::Create, resource_type, None, records) })
    }

    fn update_collection<'a>(
        &'a self,
        resource_type: &'a str,
        records: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SaveResult>, AppError>> + Send + 'a>> {
        Box::pin(async move { self.respond(CallKind::Update, resource_type, None, records) })
    }

    fn upsert_collection<'a>(
        &'a self,
        resource_type: &'a str,
        external_id_field: &'a str,
        records: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SaveResult>, AppError>> + Send + 'a>> {
        Box::pin(async move {
            self.respond(CallKind::Upsert, resource_type, Some(external_id_field), records)
        })
    }
}

/// Shares one [`FakeRemote`] between a test and the code under test.
impl RemoteWriteOps for Arc<FakeRemote> {
    fn create_collection<'a>(
        &'a self,
        resource_type: &'a str,
        records: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SaveResult>, AppError>> + Send + 'a>> {
        self.as_ref().create_collection(resource_type, records)
    }

    fn update_collection<'a>(
        &'a self,
        resource_type: &'a str,
        records: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SaveResult>, AppError>> + Send + 'a>> {
        self.as_ref().update_collection(resource_type, records)
    }

    fn upsert_collection<'a>(
        &'a self,
        resource_type: &'a str,
        external_id_field: &'a str,
        records: &'a [Record],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SaveResult>, AppError>> + Send + 'a>> {
        self.as_ref()
            .upsert_collection(resource_type, external_id_field, records)
    }
}

#[derive(Default)]
struct StoreState {
    jobs: HashMap<String, ImportJob>,
    errors: HashMap<String, Vec<ErrorRow>>,
    /// Every counter write, in order.
    progress_log: Vec<ImportProgress>,
    append_calls: usize,
    progress_calls: usize,
}

/// Job store kept in memory, enforcing the same forward-only transitions as SQLite.
#[derive(Default)]
pub(crate) struct MemoryJobStore {
    state: Mutex<StoreState>,
    failing_appends: HashSet<usize>,
    failing_progress: HashSet<usize>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The zero-based `index`-th `append_errors` call fails without writing.
    pub fn fail_append(mut self, index: usize) -> Self {
        self.failing_appends.insert(index);
        self
    }

    /// The zero-based `index`-th `update_progress` call fails without writing.
    pub fn fail_progress(mut self, index: usize) -> Self {
        self.failing_progress.insert(index);
        self
    }

    pub fn job(&self, job_id: &str) -> Option<ImportJob> {
        self.state.lock().unwrap().jobs.get(job_id).cloned()
    }

    pub fn errors(&self, job_id: &str) -> Vec<ErrorRow> {
        self.state
            .lock()
            .unwrap()
            .errors
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn progress_log(&self) -> Vec<ImportProgress> {
        self.state.lock().unwrap().progress_log.clone()
    }

    fn transition(
        &self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
        apply: impl FnOnce(&mut ImportJob),
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| AppError::NotFound(format!("Import job not found: {job_id}")))?;
        if job.status != from {
            return Err(AppError::InvalidTransition {
                job_id: job_id.to_string(),
                from: job.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        apply(job);
        Ok(())
    }
}

impl JobStoreOps for Arc<MemoryJobStore> {
    fn create_job<'a>(
        &'a self,
        job: &'a ImportJob,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            self.state
                .lock()
                .unwrap()
                .jobs
                .insert(job.id.clone(), job.clone());
            Ok(())
        })
    }

    fn mark_processing<'a>(
        &'a self,
        job_id: &'a str,
        total_records: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            self.transition(job_id, JobStatus::Pending, JobStatus::Processing, |job| {
                job.status = JobStatus::Processing;
                job.total_records = total_records;
            })
        })
    }

    fn append_errors<'a>(
        &'a self,
        job_id: &'a str,
        rows: &'a [ErrorRow],
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.append_calls += 1;
            if self.failing_appends.contains(&(state.append_calls - 1)) {
                return Err(AppError::Internal("database is locked".to_string()));
            }
            let existing = state.errors.entry(job_id.to_string()).or_default();
            if rows
                .iter()
                .any(|row| existing.iter().any(|e| e.row_number == row.row_number))
            {
                return Err(AppError::Internal("duplicate row number".to_string()));
            }
            existing.extend_from_slice(rows);
            Ok(())
        })
    }

    fn update_progress<'a>(
        &'a self,
        job_id: &'a str,
        progress: ImportProgress,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            let call = {
                let mut state = self.state.lock().unwrap();
                state.progress_calls += 1;
                state.progress_calls - 1
            };
            if self.failing_progress.contains(&call) {
                return Err(AppError::Internal("database is locked".to_string()));
            }
            self.transition(job_id, JobStatus::Processing, JobStatus::Processing, |job| {
                job.processed_records = progress.processed;
                job.success_count = progress.success;
                job.error_count = progress.error;
            })?;
            self.state.lock().unwrap().progress_log.push(progress);
            Ok(())
        })
    }

    fn finalize<'a>(
        &'a self,
        job_id: &'a str,
        status: JobStatus,
        progress: ImportProgress,
        completed_at: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            if !status.is_terminal() {
                return Err(AppError::InvalidTransition {
                    job_id: job_id.to_string(),
                    from: JobStatus::Processing.as_str().to_string(),
                    to: status.as_str().to_string(),
                });
            }
            self.transition(job_id, JobStatus::Processing, status, |job| {
                job.status = status;
                job.processed_records = progress.processed;
                job.success_count = progress.success;
                job.error_count = progress.error;
                job.completed_at = Some(completed_at);
            })
        })
    }

    fn get_job<'a>(
        &'a self,
        job_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<JobDetail, AppError>> + Send + 'a>> {
        Box::pin(async move {
            let job = self
                .job(job_id)
                .ok_or_else(|| AppError::NotFound(format!("Import job not found: {job_id}")))?;
            let mut errors = self.errors(job_id);
            errors.sort_by_key(|e| e.row_number);
            Ok(JobDetail { job, errors })
        })
    }

    fn list_jobs<'a>(
        &'a self,
        target_id: &'a str,
        page: usize,
        page_size: usize,
    ) -> Pin<Box<dyn Future<Output = Result<JobPage, AppError>> + Send + 'a>> {
        Box::pin(async move {
            let mut jobs: Vec<ImportJob> = self
                .state
                .lock()
                .unwrap()
                .jobs
                .values()
                .filter(|job| job.target_id == target_id)
                .cloned()
                .collect();
            jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            let total_jobs = jobs.len() as i64;
            let jobs = jobs
                .into_iter()
                .skip(page.saturating_mul(page_size))
                .take(page_size)
                .collect();
            Ok(JobPage {
                jobs,
                page,
                page_size,
                total_jobs,
            })
        })
    }

    fn recent_jobs<'a>(
        &'a self,
        target_id: &'a str,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ImportJob>, AppError>> + Send + 'a>> {
        Box::pin(async move {
            let page = self.list_jobs(target_id, 0, limit).await?;
            Ok(page.jobs)
        })
    }
}
