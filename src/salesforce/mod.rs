//! Salesforce REST plumbing used by the import engine.
//!
//! - `client`: authenticated requests with one transparent token refresh
//! - `refresh`: OAuth refresh-token grant behind the [`TokenRefresher`] seam
//! - `composite`: sObject Collections create/update/upsert

pub mod client;
pub mod composite;
pub mod refresh;

/// REST API version used when credentials do not name one.
pub const API_VERSION: &str = "v60.0";

/// Salesforce's native record identifier field.
pub const NATIVE_ID_FIELD: &str = "Id";

pub use client::{LoggingMode, OrgCredentials, SalesforceClient};
pub use composite::{CompositeClient, SaveError, SaveResult};
pub use refresh::{OAuthRefresher, TokenRefresher};
