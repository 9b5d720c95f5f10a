//! sObject Collections client: create, update and upsert up to 200 records per call.
//!
//! Calls are always sent with `allOrNone: false`, so Salesforce answers with one
//! [`SaveResult`] per input record, in input order, even when some are rejected.

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::MAX_CHUNK_SIZE;
use crate::error::AppError;
use crate::import::record::Record;
use crate::salesforce::client::SalesforceClient;

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Message used when Salesforce rejects a record without saying why.
pub const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CollectionRequest {
    all_or_none: bool,
    records: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSalesforceError {
    message: String,
    error_code: String,
}

/// One error entry attached to a rejected record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveError {
    #[serde(default)]
    pub status_code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Per-record outcome of a collection call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SaveResult {
    #[serde(default)]
    pub id: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<SaveError>,
    /// Only reported by upsert.
    #[serde(default)]
    pub created: Option<bool>,
}

impl SaveResult {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            success: true,
            errors: Vec::new(),
            created: None,
        }
    }

    pub fn failed(status_code: &str, message: impl Into<String>) -> Self {
        Self {
            id: None,
            success: false,
            errors: vec![SaveError {
                status_code: Some(status_code.to_string()),
                message: message.into(),
                fields: Vec::new(),
            }],
            created: None,
        }
    }

    /// First remote error message, or [`UNKNOWN_ERROR`].
    pub fn error_message(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.trim())
            .find(|m| !m.is_empty())
            .unwrap_or(UNKNOWN_ERROR)
            .to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CompositeClient
// ─────────────────────────────────────────────────────────────────────────────

/// Remote-write client over one org connection.
#[derive(Clone)]
pub struct CompositeClient {
    client: SalesforceClient,
}

impl CompositeClient {
    pub fn new(client: SalesforceClient) -> Self {
        Self { client }
    }

    /// Creates `records` as new rows of `resource_type`.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidRequest` - bad resource name or more than 200 records
    /// - `AppError::RateLimited` / `AppError::SalesforceError` - the call was rejected as a whole
    /// - any error of [`SalesforceClient::request_authed`]
    pub async fn create_collection(
        &self,
        resource_type: &str,
        records: &[Record],
    ) -> Result<Vec<SaveResult>, AppError> {
        self.send(Method::POST, resource_type, None, records).await
    }

    /// Updates existing rows; every record must carry its `id`.
    pub async fn update_collection(
        &self,
        resource_type: &str,
        records: &[Record],
    ) -> Result<Vec<SaveResult>, AppError> {
        self.send(Method::PATCH, resource_type, None, records).await
    }

    /// Upserts rows keyed by the custom `external_id_field`.
    ///
    /// # Arguments
    ///
    /// * `resource_type` - sObject API name, e.g. `Account`
    /// * `external_id_field` - External id field API name, e.g. `Legacy_Id__c`
    /// * `records` - At most 200 records, each carrying `external_id_field`
    pub async fn upsert_collection(
        &self,
        resource_type: &str,
        external_id_field: &str,
        records: &[Record],
    ) -> Result<Vec<SaveResult>, AppError> {
        self.send(Method::PATCH, resource_type, Some(external_id_field), records)
            .await
    }

    async fn send(
        &self,
        method: Method,
        resource_type: &str,
        external_id_field: Option<&str>,
        records: &[Record],
    ) -> Result<Vec<SaveResult>, AppError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        if records.len() > MAX_CHUNK_SIZE {
            return Err(AppError::InvalidRequest(format!(
                "At most {} records per collection call, got {}",
                MAX_CHUNK_SIZE,
                records.len()
            )));
        }
        validate_api_name(resource_type)?;

        let api_version = self.client.api_version().await;
        let path = match external_id_field {
            Some(field) => {
                validate_api_name(field)?;
                format!(
                    "/services/data/{}/composite/sobjects/{}/{}",
                    api_version, resource_type, field
                )
            }
            None => format!("/services/data/{}/composite/sobjects", api_version),
        };

        let body = CollectionRequest {
            all_or_none: false,
            records: records
                .iter()
                .map(|record| with_attributes(resource_type, record))
                .collect(),
        };
        let bytes = serde_json::to_vec(&body)
            .map_err(|e| AppError::Internal(format!("Failed to encode records: {}", e)))?;

        info!(
            "[COMPOSITE] {} {} x{}",
            method,
            resource_type,
            records.len()
        );

        let response = self.client.request_authed(method, &path, Some(bytes)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        let results: Vec<SaveResult> = response.json().await.map_err(|e| {
            AppError::SalesforceError(format!("Failed to parse collection response: {}", e))
        })?;

        let failed = results.iter().filter(|r| !r.success).count();
        if failed > 0 {
            warn!(
                "[COMPOSITE] {} of {} {} records rejected",
                failed,
                results.len(),
                resource_type
            );
        }

        Ok(results)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Copies `record` behind an `attributes` header naming its sObject type.
fn with_attributes(resource_type: &str, record: &Record) -> Value {
    let mut out = Map::with_capacity(record.len() + 1);
    out.insert(
        "attributes".to_string(),
        serde_json::json!({ "type": resource_type }),
    );
    for (key, value) in record {
        if key != "attributes" {
            out.insert(key.clone(), value.clone());
        }
    }
    Value::Object(out)
}

/// sObject and field API names are interpolated into the request path.
fn validate_api_name(name: &str) -> Result<(), AppError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidRequest(format!(
            "Invalid API name: {:?}",
            name
        )))
    }
}

async fn parse_error_response(response: reqwest::Response, status: StatusCode) -> AppError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        return AppError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    if status == StatusCode::NOT_FOUND {
        return AppError::NotFound("sObject collection endpoint not found".to_string());
    }

    let body = response.text().await.unwrap_or_default();
    if let Ok(errors) = serde_json::from_str::<Vec<WireSalesforceError>>(&body) {
        if let Some(first) = errors.first() {
            if first.error_code == "REQUEST_LIMIT_EXCEEDED" {
                return AppError::RateLimited {
                    retry_after_secs: None,
                };
            }
            return AppError::SalesforceError(format!("[{}] {}", first.error_code, first.message));
        }
    }

    AppError::SalesforceError(format!(
        "HTTP {} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown error")
    ))
}
