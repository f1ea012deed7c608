//! # Constants
//!
//! Shared constants used throughout the sidecar.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables where applicable.

/// Name reported as the source component of Kubernetes Events
pub const CONTROLLER_NAME: &str = "k8s-file-sidecar";

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before reopening a watch stream that ended (milliseconds)
///
/// Doubles up to the backoff maximum while streams keep ending without any event.
pub const DEFAULT_WATCH_RESTART_DELAY_MS: u64 = 1000;

/// Default client-side watch timeout: seconds without any event before the stream is abandoned
pub const DEFAULT_WATCH_CLIENT_TIMEOUT_SECS: u64 = 660;

/// Default server-side watch timeout requested per watch call (seconds)
pub const DEFAULT_WATCH_SERVER_TIMEOUT_SECS: u32 = 600;

/// Largest server-side watch timeout the API accepts through `kube` (must stay below 295s)
pub const MAX_WATCH_SERVER_TIMEOUT_SECS: u32 = 290;

/// Default permission bits of written files (octal)
pub const DEFAULT_FILE_MODE: &str = "644";

/// Default annotation overriding the output folder of a single resource
pub const DEFAULT_TARGET_DIR_ANNOTATION: &str = "k8s-sidecar-target-directory";
