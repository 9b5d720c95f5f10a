//! Local SQLite persistence for import jobs.

mod database;
pub mod imports;

pub use database::Database;

/// Current unix timestamp in seconds.
pub fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
