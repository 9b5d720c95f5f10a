//! Flat caller-defined records and the field rewrites applied before a write.

use serde_json::{Map, Value};

use crate::salesforce::NATIVE_ID_FIELD;

/// Field name used by sObject Collections update to address a row.
pub const COLLECTION_ID_FIELD: &str = "id";

/// One submitted record. Field order is kept as submitted.
pub type Record = Map<String, Value>;

/// Returns the identifier stored under `field`, or `None` when it is absent,
/// null, or blank after trimming.
pub fn identifier(record: &Record, field: &str) -> Option<String> {
    let text = match record.get(field)? {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Copy for a create call: both spellings of the native id are dropped.
pub fn for_create(record: &Record) -> Record {
    record
        .iter()
        .filter(|(key, _)| key.as_str() != NATIVE_ID_FIELD && key.as_str() != COLLECTION_ID_FIELD)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Copy for an update call: `Id` is moved to the lower-case `id` the
/// collection endpoint expects. A record already carrying `id` is left as is.
pub fn for_update(record: &Record) -> Record {
    if !record.contains_key(NATIVE_ID_FIELD) || record.contains_key(COLLECTION_ID_FIELD) {
        return record.clone();
    }

    let mut out = Map::with_capacity(record.len());
    if let Some(id) = record.get(NATIVE_ID_FIELD) {
        out.insert(COLLECTION_ID_FIELD.to_string(), id.clone());
    }
    for (key, value) in record {
        if key != NATIVE_ID_FIELD {
            out.insert(key.clone(), value.clone());
        }
    }
    out
}

/// Copy for the update half of a native upsert, addressed by `id`.
pub fn for_native_upsert_update(record: &Record, id: String) -> Record {
    let mut out = Map::with_capacity(record.len());
    out.insert(COLLECTION_ID_FIELD.to_string(), Value::String(id));
    for (key, value) in record {
        if key != NATIVE_ID_FIELD && key != COLLECTION_ID_FIELD {
            out.insert(key.clone(), value.clone());
        }
    }
    out
}

/// JSON snapshot of the record as submitted, stored with each error row.
pub fn raw_snapshot(record: &Record) -> String {
    serde_json::to_string(record).unwrap_or_else(|_| String::from("{}"))
}
