//! Import job types shared by the orchestrator, dispatcher and storage.

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::salesforce::NATIVE_ID_FIELD;

pub const DEFAULT_SOURCE_LABEL: &str = "upload.csv";
pub const DEFAULT_CREATED_BY: &str = "user";
pub const IMPORT_STARTED_MESSAGE: &str = "Import job started";

/// Write operation requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    #[default]
    Insert,
    Update,
    Upsert,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Upsert => "UPSERT",
        }
    }

    /// Case-insensitive parse of a stored or user-supplied operation name.
    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "UPSERT" => Ok(Operation::Upsert),
            other => Err(AppError::InvalidRequest(format!(
                "Unsupported operation: {}",
                other
            ))),
        }
    }
}

/// How one chunk is written remotely, resolved once per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteMode {
    Insert,
    Update,
    /// Upsert by the native `Id`; split into update and create calls.
    UpsertNative,
    /// Upsert by a custom external-id field in a single call.
    UpsertByField(String),
}

impl WriteMode {
    /// A blank field name, or `Id`, selects the native upsert.
    pub fn resolve(operation: Operation, external_id_field: Option<&str>) -> Self {
        match operation {
            Operation::Insert => WriteMode::Insert,
            Operation::Update => WriteMode::Update,
            Operation::Upsert => match external_id_field.map(str::trim) {
                Some(field) if !field.is_empty() && !field.eq_ignore_ascii_case(NATIVE_ID_FIELD) => {
                    WriteMode::UpsertByField(field.to_string())
                }
                _ => WriteMode::UpsertNative,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    CompletedWithErrors,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::CompletedWithErrors => "COMPLETED_WITH_ERRORS",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "COMPLETED_WITH_ERRORS" => Ok(JobStatus::CompletedWithErrors),
            other => Err(AppError::Internal(format!("Unknown job status: {}", other))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::CompletedWithErrors)
    }

    /// Terminal status for a finished run. Even a run where every record
    /// failed is `CompletedWithErrors`.
    pub fn terminal_for(error_count: i64) -> Self {
        if error_count > 0 {
            JobStatus::CompletedWithErrors
        } else {
            JobStatus::Completed
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied parameters of a new import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub target_id: String,
    pub resource_type: String,
    #[serde(default)]
    pub source_label: Option<String>,
    #[serde(default)]
    pub operation: Option<Operation>,
    #[serde(default)]
    pub external_id_field: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl ImportRequest {
    pub fn new(target_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            resource_type: resource_type.into(),
            ..Self::default()
        }
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_external_id_field(mut self, field: impl Into<String>) -> Self {
        self.external_id_field = Some(field.into());
        self
    }

    pub fn with_source_label(mut self, label: impl Into<String>) -> Self {
        self.source_label = Some(label.into());
        self
    }

    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }
}

/// Persisted job metadata. Record payloads are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub id: String,
    pub target_id: String,
    pub resource_type: String,
    pub status: JobStatus,
    pub total_records: i64,
    pub processed_records: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub source_label: String,
    pub operation: Operation,
    pub external_id_field: Option<String>,
    pub created_by: String,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl ImportJob {
    /// Builds a PENDING job from a request, applying defaults for absent labels.
    pub fn pending(id: String, request: &ImportRequest, created_at: i64) -> Self {
        let non_blank = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            id,
            target_id: request.target_id.trim().to_string(),
            resource_type: request.resource_type.trim().to_string(),
            status: JobStatus::Pending,
            total_records: 0,
            processed_records: 0,
            success_count: 0,
            error_count: 0,
            source_label: non_blank(&request.source_label)
                .unwrap_or_else(|| DEFAULT_SOURCE_LABEL.to_string()),
            operation: request.operation.unwrap_or_default(),
            external_id_field: non_blank(&request.external_id_field),
            created_by: non_blank(&request.created_by)
                .unwrap_or_else(|| DEFAULT_CREATED_BY.to_string()),
            created_at,
            completed_at: None,
        }
    }

    pub fn write_mode(&self) -> WriteMode {
        WriteMode::resolve(self.operation, self.external_id_field.as_deref())
    }
}

/// Diagnostic row for one failed record. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRow {
    /// 1-based position in the submitted record list.
    pub row_number: i64,
    pub error_message: String,
    pub raw_data: String,
}

/// A job with its full error list ordered by row number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    pub job: ImportJob,
    pub errors: Vec<ErrorRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPage {
    pub jobs: Vec<ImportJob>,
    /// Zero-based.
    pub page: usize,
    pub page_size: usize,
    pub total_jobs: i64,
}

/// Returned by the combined submit-and-start entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportStarted {
    pub job: ImportJob,
    pub message: String,
}

/// Running counters of one job, owned by its run task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportProgress {
    pub processed: i64,
    pub success: i64,
    pub error: i64,
}

impl ImportProgress {
    pub fn record(&mut self, succeeded: usize, failed: usize) {
        let succeeded = succeeded as i64;
        let failed = failed as i64;
        self.success += succeeded;
        self.error += failed;
        self.processed += succeeded + failed;
    }
}
