//! Import job persistence for SQLite.
//!
//! Status only moves forward: every transition is a conditional UPDATE on the
//! expected current status, and a miss is reported as `InvalidTransition`.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::AppError;
use crate::import::model::{
    ErrorRow, ImportJob, ImportProgress, JobDetail, JobPage, JobStatus, Operation,
};
use crate::storage::database::{open_connection, Database};

const JOB_COLUMNS: &str = "id, target_id, resource_type, status, total_records, \
     processed_records, success_count, error_count, source_label, operation, \
     external_id_field, created_by, created_at, completed_at";

/// Runs `task` against a fresh connection on the blocking pool.
async fn with_connection<T, F>(db: &Database, task_name: &'static str, task: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, AppError> + Send + 'static,
{
    let db_path = db.db_path().clone();

    tokio::task::spawn_blocking(move || {
        let mut conn = open_connection(&db_path)?;
        task(&mut conn)
    })
    .await
    .map_err(|e| AppError::Internal(format!("{task_name} task failed: {e}")))?
}

fn conversion_error(column: usize, err: AppError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<ImportJob> {
    let status: String = row.get(3)?;
    let operation: String = row.get(9)?;

    Ok(ImportJob {
        id: row.get(0)?,
        target_id: row.get(1)?,
        resource_type: row.get(2)?,
        status: JobStatus::parse(&status).map_err(|e| conversion_error(3, e))?,
        total_records: row.get(4)?,
        processed_records: row.get(5)?,
        success_count: row.get(6)?,
        error_count: row.get(7)?,
        source_label: row.get(8)?,
        operation: Operation::parse(&operation).map_err(|e| conversion_error(9, e))?,
        external_id_field: row.get(10)?,
        created_by: row.get(11)?,
        created_at: row.get(12)?,
        completed_at: row.get(13)?,
    })
}

/// Explains why a conditional status UPDATE touched no row.
fn transition_error(conn: &Connection, job_id: &str, to: JobStatus) -> AppError {
    let current: Result<Option<String>, _> = conn
        .query_row(
            "SELECT status FROM import_jobs WHERE id = ?1",
            params![job_id],
            |row| row.get(0),
        )
        .optional();

    match current {
        Ok(Some(from)) => AppError::InvalidTransition {
            job_id: job_id.to_string(),
            from,
            to: to.as_str().to_string(),
        },
        Ok(None) => AppError::NotFound(format!("Import job not found: {job_id}")),
        Err(e) => AppError::Internal(format!("Failed to read job status: {e}")),
    }
}

/// Inserts a new job row.
pub async fn create_job(db: &Database, job: &ImportJob) -> Result<(), AppError> {
    let job = job.clone();

    with_connection(db, "Create import job", move |conn| {
        conn.execute(
            &format!(
                "INSERT INTO import_jobs ({JOB_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                job.id,
                job.target_id,
                job.resource_type,
                job.status.as_str(),
                job.total_records,
                job.processed_records,
                job.success_count,
                job.error_count,
                job.source_label,
                job.operation.as_str(),
                job.external_id_field,
                job.created_by,
                job.created_at,
                job.completed_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to insert import job: {e}")))?;
        Ok(())
    })
    .await
}

/// Moves a PENDING job to PROCESSING and records its total.
pub async fn mark_processing(
    db: &Database,
    job_id: &str,
    total_records: i64,
) -> Result<(), AppError> {
    let job_id = job_id.to_string();

    with_connection(db, "Mark import processing", move |conn| {
        let updated = conn
            .execute(
                "UPDATE import_jobs SET status = ?1, total_records = ?2 \
                 WHERE id = ?3 AND status = ?4",
                params![
                    JobStatus::Processing.as_str(),
                    total_records,
                    job_id,
                    JobStatus::Pending.as_str(),
                ],
            )
            .map_err(|e| AppError::Internal(format!("Failed to mark job processing: {e}")))?;

        if updated == 0 {
            return Err(transition_error(conn, &job_id, JobStatus::Processing));
        }
        Ok(())
    })
    .await
}

/// Writes error rows in one transaction. Either all rows land or none do.
pub async fn append_errors(db: &Database, job_id: &str, rows: &[ErrorRow]) -> Result<(), AppError> {
    if rows.is_empty() {
        return Ok(());
    }
    let job_id = job_id.to_string();
    let rows = rows.to_vec();

    with_connection(db, "Append import errors", move |conn| {
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to start transaction: {e}")))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO import_errors (job_id, row_number, error_message, raw_data) \
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(|e| AppError::Internal(format!("Failed to prepare insert: {e}")))?;

            for row in &rows {
                stmt.execute(params![job_id, row.row_number, row.error_message, row.raw_data])
                    .map_err(|e| AppError::Internal(format!("Failed to insert error row: {e}")))?;
            }
        }
        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to commit error rows: {e}")))?;
        Ok(())
    })
    .await
}

/// Overwrites the three counters of a PROCESSING job in one statement.
pub async fn update_progress(
    db: &Database,
    job_id: &str,
    progress: ImportProgress,
) -> Result<(), AppError> {
    let job_id = job_id.to_string();

    with_connection(db, "Update import progress", move |conn| {
        let updated = conn
            .execute(
                "UPDATE import_jobs \
                 SET processed_records = ?1, success_count = ?2, error_count = ?3 \
                 WHERE id = ?4 AND status = ?5",
                params![
                    progress.processed,
                    progress.success,
                    progress.error,
                    job_id,
                    JobStatus::Processing.as_str(),
                ],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update progress: {e}")))?;

        if updated == 0 {
            return Err(transition_error(conn, &job_id, JobStatus::Processing));
        }
        Ok(())
    })
    .await
}

/// Moves a PROCESSING job to a terminal status. The final counters are
/// written by the same statement, so a terminal job never carries counters
/// from an earlier chunk.
pub async fn finalize(
    db: &Database,
    job_id: &str,
    status: JobStatus,
    progress: ImportProgress,
    completed_at: i64,
) -> Result<(), AppError> {
    if !status.is_terminal() {
        return Err(AppError::InvalidTransition {
            job_id: job_id.to_string(),
            from: JobStatus::Processing.as_str().to_string(),
            to: status.as_str().to_string(),
        });
    }
    let job_id = job_id.to_string();

    with_connection(db, "Finalize import job", move |conn| {
        let updated = conn
            .execute(
                "UPDATE import_jobs SET status = ?1, completed_at = ?2, \
                 processed_records = ?3, success_count = ?4, error_count = ?5 \
                 WHERE id = ?6 AND status = ?7",
                params![
                    status.as_str(),
                    completed_at,
                    progress.processed,
                    progress.success,
                    progress.error,
                    job_id,
                    JobStatus::Processing.as_str(),
                ],
            )
            .map_err(|e| AppError::Internal(format!("Failed to finalize job: {e}")))?;

        if updated == 0 {
            return Err(transition_error(conn, &job_id, status));
        }
        Ok(())
    })
    .await
}

/// Loads a job and all its error rows, ordered by row number.
pub async fn get_job(db: &Database, job_id: &str) -> Result<JobDetail, AppError> {
    let job_id = job_id.to_string();

    with_connection(db, "Get import job", move |conn| {
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM import_jobs WHERE id = ?1"),
                params![job_id],
                row_to_job,
            )
            .optional()
            .map_err(|e| AppError::Internal(format!("Failed to query import job: {e}")))?
            .ok_or_else(|| AppError::NotFound(format!("Import job not found: {job_id}")))?;

        let mut stmt = conn
            .prepare(
                "SELECT row_number, error_message, raw_data FROM import_errors \
                 WHERE job_id = ?1 ORDER BY row_number ASC",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare error query: {e}")))?;

        let errors = stmt
            .query_map(params![job_id], |row| {
                Ok(ErrorRow {
                    row_number: row.get(0)?,
                    error_message: row.get(1)?,
                    raw_data: row.get(2)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to query error rows: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect error rows: {e}")))?;

        Ok(JobDetail { job, errors })
    })
    .await
}

fn query_jobs(
    conn: &Connection,
    target_id: &str,
    limit: usize,
    offset: usize,
) -> Result<Vec<ImportJob>, AppError> {
    // An offset SQLite cannot represent lies past every row.
    let Ok(offset) = i64::try_from(offset) else {
        return Ok(Vec::new());
    };
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM import_jobs WHERE target_id = ?1 \
             ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3"
        ))
        .map_err(|e| AppError::Internal(format!("Failed to prepare job listing: {e}")))?;

    let jobs = stmt
        .query_map(params![target_id, limit, offset], row_to_job)
        .map_err(|e| AppError::Internal(format!("Failed to list import jobs: {e}")))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Internal(format!("Failed to collect import jobs: {e}")))?;

    Ok(jobs)
}

/// One zero-based page of a target's jobs, newest first.
pub async fn list_jobs(
    db: &Database,
    target_id: &str,
    page: usize,
    page_size: usize,
) -> Result<JobPage, AppError> {
    let target_id = target_id.to_string();
    let page_size = page_size.max(1);

    with_connection(db, "List import jobs", move |conn| {
        let total_jobs: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM import_jobs WHERE target_id = ?1",
                params![target_id],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Internal(format!("Failed to count import jobs: {e}")))?;

        let jobs = match page.checked_mul(page_size) {
            Some(offset) => query_jobs(conn, &target_id, page_size, offset)?,
            None => Vec::new(),
        };

        Ok(JobPage {
            jobs,
            page,
            page_size,
            total_jobs,
        })
    })
    .await
}

/// The `limit` newest jobs of a target.
pub async fn recent_jobs(
    db: &Database,
    target_id: &str,
    limit: usize,
) -> Result<Vec<ImportJob>, AppError> {
    let target_id = target_id.to_string();

    with_connection(db, "Recent import jobs", move |conn| {
        query_jobs(conn, &target_id, limit, 0)
    })
    .await
}
