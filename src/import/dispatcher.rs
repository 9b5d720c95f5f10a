//! Turns one chunk of records into remote write calls.
//!
//! Native-id upsert cannot be addressed by the collection upsert endpoint, so
//! the chunk is split into an update group (records carrying an `Id`) and a
//! create group (the rest). Each group remembers the chunk positions of its
//! members, and the two result arrays are merged back through those
//! positions.

use tracing::{info, warn};

use crate::error::{sanitize_message, AppError};
use crate::import::model::WriteMode;
use crate::import::record::{self, Record};
use crate::import::RemoteWriteOps;
use crate::salesforce::{SaveResult, NATIVE_ID_FIELD};

/// Message for a record the remote did not answer for.
pub const MISSING_RESULT_MESSAGE: &str = "No result returned for record";

const CHUNK_FAILURE_FALLBACK: &str = "Remote write failed";

/// Outcome of one record, in the order the chunk was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub success: bool,
    pub remote_id: Option<String>,
    pub error_message: Option<String>,
}

impl RecordOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            remote_id: None,
            error_message: Some(message.into()),
        }
    }

    fn from_save(result: SaveResult) -> Self {
        if result.success {
            Self {
                success: true,
                remote_id: result.id,
                error_message: None,
            }
        } else {
            Self::failed(result.error_message())
        }
    }
}

/// Text stored for records whose whole call failed. Credentials never survive.
pub(crate) fn failure_message(err: &AppError) -> String {
    sanitize_message(&err.to_string(), CHUNK_FAILURE_FALLBACK)
}

/// Pads or trims `results` to exactly `expected` outcomes.
fn align(results: Vec<SaveResult>, expected: usize) -> Vec<RecordOutcome> {
    if results.len() < expected {
        warn!(
            "[DISPATCH] Remote answered {} of {} records",
            results.len(),
            expected
        );
    }
    let mut results = results.into_iter();
    (0..expected)
        .map(|_| match results.next() {
            Some(result) => RecordOutcome::from_save(result),
            None => RecordOutcome::failed(MISSING_RESULT_MESSAGE),
        })
        .collect()
}

/// Records routed to one sub-call, with their positions in the chunk.
#[derive(Default)]
struct SubGroup {
    indices: Vec<usize>,
    records: Vec<Record>,
}

impl SubGroup {
    fn push(&mut self, index: usize, record: Record) {
        self.indices.push(index);
        self.records.push(record);
    }

    /// Writes this group's outcomes into `ordered` at the remembered positions.
    fn place(
        &self,
        outcome: Result<Vec<SaveResult>, AppError>,
        ordered: &mut [Option<RecordOutcome>],
    ) {
        match outcome {
            Ok(results) => {
                for (&index, result) in self.indices.iter().zip(align(results, self.indices.len())) {
                    ordered[index] = Some(result);
                }
            }
            Err(err) => {
                let message = failure_message(&err);
                for &index in &self.indices {
                    ordered[index] = Some(RecordOutcome::failed(message.clone()));
                }
            }
        }
    }
}

pub struct BatchDispatcher<R> {
    remote: R,
}

impl<R: RemoteWriteOps> BatchDispatcher<R> {
    pub fn new(remote: R) -> Self {
        Self { remote }
    }

    /// Writes `chunk` and returns one outcome per record, in chunk order.
    ///
    /// # Errors
    ///
    /// Single-call modes return the remote error unchanged; the caller owns
    /// converting it into per-record failures. Native upsert never errors:
    /// a failed sub-call fails only its own group.
    pub async fn dispatch(
        &self,
        resource_type: &str,
        mode: &WriteMode,
        chunk: &[Record],
    ) -> Result<Vec<RecordOutcome>, AppError> {
        if chunk.is_empty() {
            return Ok(Vec::new());
        }

        match mode {
            WriteMode::Insert => {
                let records: Vec<Record> = chunk.iter().map(record::for_create).collect();
                let results = self.remote.create_collection(resource_type, &records).await?;
                Ok(align(results, chunk.len()))
            }
            WriteMode::Update => {
                let records: Vec<Record> = chunk.iter().map(record::for_update).collect();
                let results = self.remote.update_collection(resource_type, &records).await?;
                Ok(align(results, chunk.len()))
            }
            WriteMode::UpsertByField(field) => {
                let results = self
                    .remote
                    .upsert_collection(resource_type, field, chunk)
                    .await?;
                Ok(align(results, chunk.len()))
            }
            WriteMode::UpsertNative => Ok(self.upsert_native(resource_type, chunk).await),
        }
    }

    async fn upsert_native(&self, resource_type: &str, chunk: &[Record]) -> Vec<RecordOutcome> {
        let mut updates = SubGroup::default();
        let mut creates = SubGroup::default();

        for (index, rec) in chunk.iter().enumerate() {
            match record::identifier(rec, NATIVE_ID_FIELD) {
                Some(id) => updates.push(index, record::for_native_upsert_update(rec, id)),
                None => creates.push(index, record::for_create(rec)),
            }
        }

        info!(
            "[DISPATCH] Native upsert of {} {}: {} update, {} create",
            chunk.len(),
            resource_type,
            updates.records.len(),
            creates.records.len()
        );

        let mut ordered: Vec<Option<RecordOutcome>> = vec![None; chunk.len()];

        if !updates.records.is_empty() {
            let outcome = self
                .remote
                .update_collection(resource_type, &updates.records)
                .await;
            updates.place(outcome, &mut ordered);
        }
        if !creates.records.is_empty() {
            let outcome = self
                .remote
                .create_collection(resource_type, &creates.records)
                .await;
            creates.place(outcome, &mut ordered);
        }

        ordered
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| RecordOutcome::failed(MISSING_RESULT_MESSAGE)))
            .collect()
    }
}
