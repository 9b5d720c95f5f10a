use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for display or storage.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "refresh_token",
    "access_token",
    "client_secret",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for display or persistence.
/// If sensitive content is detected, returns the fallback instead.
pub(crate) fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation for operator-facing surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Auth ──────────────────────────────────────────────────────────────────
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Session expired")]
    SessionExpired,

    #[error("OAuth error: {0}")]
    OAuthError(String),

    // ── API ───────────────────────────────────────────────────────────────────
    #[error("Salesforce error: {0}")]
    SalesforceError(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("No active connection for target {0}")]
    UnknownConnection(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ── Jobs ──────────────────────────────────────────────────────────────────
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Import job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    // ── Network ───────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Converts the error into a presentation suitable for display.
    /// Never leaks secrets, tokens, or sensitive URL parameters.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Auth ──────────────────────────────────────────────────────────
            AppError::NotAuthenticated => ErrorPresentation {
                title: "Not Logged In".into(),
                message: "The target org has no usable credentials.".into(),
                action: Some("Reconnect the org".into()),
            },

            AppError::SessionExpired => ErrorPresentation {
                title: "Session Expired".into(),
                message: "The Salesforce session expired and could not be refreshed.".into(),
                action: Some("Reconnect the org".into()),
            },

            AppError::OAuthError(_) => ErrorPresentation {
                title: "Authorization Failed".into(),
                message: "Salesforce rejected the token refresh.".into(),
                action: Some("Reconnect the org".into()),
            },

            // ── API ───────────────────────────────────────────────────────────
            AppError::SalesforceError(msg) => ErrorPresentation {
                title: "Salesforce Error".into(),
                message: sanitize_message(msg, "A Salesforce error occurred."),
                action: None,
            },

            AppError::RateLimited { retry_after_secs } => {
                let wait_msg = match retry_after_secs {
                    Some(secs) => format!("Please wait {} seconds before trying again.", secs),
                    None => "Please wait a moment before trying again.".into(),
                };
                ErrorPresentation {
                    title: "Too Many Requests".into(),
                    message: format!("Salesforce is limiting requests. {}", wait_msg),
                    action: Some("Wait and retry".into()),
                }
            }

            // ── Configuration ─────────────────────────────────────────────────
            AppError::UnknownConnection(target) => ErrorPresentation {
                title: "Unknown Org".into(),
                message: format!("No active connection was found for org {}.", target),
                action: Some("Connect the org first".into()),
            },

            AppError::InvalidRequest(msg) => ErrorPresentation {
                title: "Invalid Import Request".into(),
                message: sanitize_message(msg, "The import request is invalid."),
                action: Some("Fix the request and resubmit".into()),
            },

            // ── Jobs ──────────────────────────────────────────────────────────
            AppError::NotFound(msg) => ErrorPresentation {
                title: "Not Found".into(),
                message: sanitize_message(msg, "The requested item was not found."),
                action: None,
            },

            AppError::InvalidTransition { job_id, .. } => ErrorPresentation {
                title: "Import Already Started".into(),
                message: format!("Import job {} has already been started.", job_id),
                action: None,
            },

            // ── Network ───────────────────────────────────────────────────────
            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not connect to Salesforce. Please check your network connection."
                    .into(),
                action: Some("Check network and retry".into()),
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<AppError> {
        vec![
            AppError::NotAuthenticated,
            AppError::SessionExpired,
            AppError::OAuthError("refresh rejected".into()),
            AppError::SalesforceError("[INVALID_FIELD] bad field".into()),
            AppError::RateLimited { retry_after_secs: Some(30) },
            AppError::RateLimited { retry_after_secs: None },
            AppError::UnknownConnection("00Dxx0000000001".into()),
            AppError::InvalidRequest("resource type is required".into()),
            AppError::NotFound("Import job not found".into()),
            AppError::InvalidTransition {
                job_id: "job-1".into(),
                from: "COMPLETED".into(),
                to: "PROCESSING".into(),
            },
            AppError::ConnectionFailed("timeout".into()),
            AppError::Internal("something broke".into()),
        ]
    }

    #[test]
    fn all_variants_have_nonempty_title_and_message() {
        for variant in all_variants() {
            let presentation = variant.to_presentation();
            assert!(!presentation.title.trim().is_empty(), "Empty title for {:?}", variant);
            assert!(
                !presentation.message.trim().is_empty(),
                "Empty message for {:?}",
                variant
            );
        }
    }

    #[test]
    fn rate_limited_mentions_retry_after() {
        let presentation = AppError::RateLimited { retry_after_secs: Some(30) }.to_presentation();
        assert!(presentation.message.contains("30"));
        assert!(presentation.action.is_some());
    }

    #[test]
    fn serialization_produces_presentation_fields() {
        for variant in all_variants() {
            let json = serde_json::to_value(&variant).expect("serializable");
            assert!(json.get("title").is_some());
            assert!(json.get("message").is_some());
            assert!(json.get("action").is_some());
        }
    }

    #[test]
    fn no_secret_leakage_in_presentation() {
        let leaky = vec![
            AppError::SalesforceError("Authorization: Bearer 00D!abc".into()),
            AppError::InvalidRequest("access_token=xyz".into()),
            AppError::NotFound("refresh_token leaked".into()),
            AppError::ConnectionFailed("client_secret=abc".into()),
        ];

        for variant in leaky {
            let presentation = variant.to_presentation();
            let output = format!(
                "{} {} {}",
                presentation.title,
                presentation.message,
                presentation.action.as_deref().unwrap_or("")
            )
            .to_ascii_lowercase();

            for pattern in SENSITIVE_PATTERNS {
                assert!(!output.contains(pattern), "{:?} leaks {}", variant, pattern);
            }
        }
    }

    #[test]
    fn sanitize_message_passes_through_clean_text() {
        assert_eq!(
            sanitize_message("Connection failed: timeout", "fallback"),
            "Connection failed: timeout"
        );
        assert_eq!(sanitize_message("BEARER abc", "fallback"), "fallback");
    }
}
