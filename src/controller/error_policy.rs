//! # Error Policy
//!
//! Classification of Kubernetes API failures into what the reconciliation loop
//! should do about them:
//!
//! - `Expired` (410 Gone): the resume point is too old, do a full resync
//! - `Transient` (429, 5xx, transport errors): back off and retry
//! - `Fatal` (401, 403 and other client errors): stop and exit non-zero

use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("resource version expired: {0}")]
    Expired(String),
    #[error("transient API error: {0}")]
    Transient(String),
    #[error("fatal API error ({code}): {message}")]
    Fatal { code: u16, message: String },
}

impl ApiError {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::Fatal { .. })
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(self, ApiError::Expired(_))
    }
}

/// Classify an HTTP status returned by the API server (also used for watch `ERROR` events)
#[must_use]
pub fn classify_status(code: u16, message: &str) -> ApiError {
    match code {
        410 => ApiError::Expired(message.to_string()),
        // 408 timeout and 429 "storage is (re)initializing" are both retryable
        408 | 429 => ApiError::Transient(format!("{code}: {message}")),
        c if c >= 500 => ApiError::Transient(format!("{code}: {message}")),
        c if c >= 400 => ApiError::Fatal {
            code,
            message: message.to_string(),
        },
        // Anything else reaching us as an error is unexpected but not a reason to die
        _ => ApiError::Transient(format!("{code}: {message}")),
    }
}

/// Classify a `kube` client error
#[must_use]
pub fn classify_kube_error(err: &kube::Error) -> ApiError {
    match err {
        kube::Error::Api(status) => classify_status(status.code, &status.message),
        // Transport, TLS, (de)serialisation hiccups and anything else: retry
        _ => ApiError::Transient(err.to_string()),
    }
}

/// Log operator-facing hints for a fatal error before the process exits
pub fn log_fatal_diagnostics(err: &ApiError, kind: &str, namespace: Option<&str>) {
    let ApiError::Fatal { code, message } = err else {
        return;
    };
    let scope = namespace.map_or_else(|| "--all-namespaces".to_string(), |ns| format!("-n {ns}"));
    let resource = kind.to_lowercase();

    error!(code, kind, message = message.as_str(), "Unrecoverable Kubernetes API error");
    if matches!(code, 401 | 403) {
        error!("The service account cannot list/watch {resource}s. Verify RBAC, for example:");
        error!("   kubectl auth can-i list {resource}s {scope}");
        error!("   kubectl auth can-i watch {resource}s {scope}");
    }
}
