//! # Sidecar Configuration
//!
//! Command line / environment options and the immutable configuration derived
//! from them. Everything is read once at startup; nothing here is reloaded.

use crate::constants::{
    DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_START_MS, DEFAULT_FILE_MODE,
    DEFAULT_TARGET_DIR_ANNOTATION, DEFAULT_WATCH_CLIENT_TIMEOUT_SECS,
    DEFAULT_WATCH_RESTART_DELAY_MS, DEFAULT_WATCH_SERVER_TIMEOUT_SECS,
    MAX_WATCH_SERVER_TIMEOUT_SECS,
};
use crate::controller::reconciler::LoopSettings;
use crate::controller::scope::{resolve_scope, Scope};
use crate::controller::selection::{parse_desired_names, ResourceKinds, Selector};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Method {
    /// List once, then keep watching until terminated
    Watch,
    /// List once and exit
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Kubernetes sidecar that writes labelled ConfigMaps and Secrets to a folder
#[derive(Debug, Parser)]
#[command(name = "k8s-file-sidecar", version, about, long_about = None)]
pub struct Cli {
    /// WATCH to keep files in sync, LIST for a single pass
    #[arg(long, env = "METHOD", value_enum, ignore_case = true)]
    pub method: Method,

    /// Label key a resource must carry
    #[arg(long, env = "LABEL")]
    pub label: String,

    /// Required value of the label; any value when unset
    #[arg(long, env = "LABEL_VALUE")]
    pub label_value: Option<String>,

    /// Output folder
    #[arg(long, env = "FOLDER")]
    pub folder: PathBuf,

    #[arg(long, env = "RESOURCE", value_enum, ignore_case = true, default_value = "both")]
    pub resource: ResourceKinds,

    /// Comma separated `name` or `namespace/name` entries; empty or `all` for every resource
    #[arg(long, env = "RESOURCE_NAMES", value_delimiter = ',')]
    pub resource_names: Vec<String>,

    /// Comma separated namespaces; empty or `ALL` for the whole cluster
    #[arg(long, env = "NAMESPACE", value_delimiter = ',')]
    pub namespace: Vec<String>,

    /// Seconds without any watch event before the stream is abandoned and reopened
    #[arg(long, env = "WATCH_CLIENT_TIMEOUT", default_value_t = DEFAULT_WATCH_CLIENT_TIMEOUT_SECS)]
    pub watch_client_timeout: u64,

    /// Seconds the API server keeps a watch open
    #[arg(long, env = "WATCH_SERVER_TIMEOUT", default_value_t = DEFAULT_WATCH_SERVER_TIMEOUT_SECS)]
    pub watch_server_timeout: u32,

    #[arg(
        long,
        env = "DEBUG",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        default_value = "false"
    )]
    pub debug: bool,

    /// Debug logging for the Kubernetes client as well
    #[arg(
        long,
        env = "VERBOSE",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        default_value = "false"
    )]
    pub verbose: bool,

    /// Post Kubernetes Events for file operations
    #[arg(
        long,
        env = "EVENT_LOGGING",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        default_value = "false"
    )]
    pub event_logging: bool,

    /// Octal permission bits of written files
    #[arg(long, env = "FILE_MODE", value_parser = parse_file_mode, default_value = DEFAULT_FILE_MODE)]
    pub file_mode: u32,

    /// Annotation overriding the output folder of a single resource
    #[arg(long, env = "TARGET_DIR_ANNOTATION", default_value = DEFAULT_TARGET_DIR_ANNOTATION)]
    pub target_dir_annotation: String,

    /// Pause before reopening a watch that ended
    #[arg(long, env = "WATCH_RESTART_DELAY_MS", default_value_t = DEFAULT_WATCH_RESTART_DELAY_MS)]
    pub watch_restart_delay_ms: u64,

    #[arg(long, env = "BACKOFF_START_MS", default_value_t = DEFAULT_BACKOFF_START_MS)]
    pub backoff_start_ms: u64,

    #[arg(long, env = "BACKOFF_MAX_MS", default_value_t = DEFAULT_BACKOFF_MAX_MS)]
    pub backoff_max_ms: u64,

    /// Consecutive failed API calls tolerated before giving up, 0 for unlimited
    #[arg(long, env = "MAX_RETRIES", default_value_t = 0)]
    pub max_retries: u32,

    #[arg(long, env = "LOG_FORMAT", value_enum, ignore_case = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Serve /healthz, /readyz and /metrics on this port
    #[arg(long, env = "HEALTH_PORT")]
    pub health_port: Option<u16>,
}

fn parse_file_mode(raw: &str) -> Result<u32, String> {
    let digits = raw.trim().trim_start_matches("0o");
    let mode = u32::from_str_radix(digits, 8).map_err(|e| format!("not an octal mode: {e}"))?;
    if mode > 0o7777 {
        return Err(format!("mode {raw} is out of range"));
    }
    Ok(mode)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("LABEL must not be empty")]
    EmptyLabel,
    #[error("FOLDER must not be empty")]
    EmptyFolder,
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
}

/// Immutable configuration passed to the orchestrator and every loop
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    pub method: Method,
    pub selector: Selector,
    pub scope: Scope,
    pub folder: PathBuf,
    pub file_mode: u32,
    pub target_dir_annotation: String,
    pub watch_client_timeout: Duration,
    /// Server timeout as configured
    pub watch_server_timeout_secs: u32,
    pub watch_restart_delay: Duration,
    pub backoff_start: Duration,
    pub backoff_max: Duration,
    pub max_retries: Option<u32>,
    pub debug: bool,
    pub verbose: bool,
    pub event_logging: bool,
    pub log_format: LogFormat,
    pub health_port: Option<u16>,
}

impl TryFrom<Cli> for SidecarConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let label = cli.label.trim().to_string();
        if label.is_empty() {
            return Err(ConfigError::EmptyLabel);
        }
        if cli.folder.as_os_str().is_empty() {
            return Err(ConfigError::EmptyFolder);
        }
        if cli.watch_client_timeout == 0 {
            return Err(ConfigError::Zero {
                name: "WATCH_CLIENT_TIMEOUT",
            });
        }
        if cli.watch_server_timeout == 0 {
            return Err(ConfigError::Zero {
                name: "WATCH_SERVER_TIMEOUT",
            });
        }
        if cli.watch_restart_delay_ms == 0 {
            return Err(ConfigError::Zero {
                name: "WATCH_RESTART_DELAY_MS",
            });
        }
        if cli.backoff_start_ms == 0 {
            return Err(ConfigError::Zero {
                name: "BACKOFF_START_MS",
            });
        }

        let scope = resolve_scope(&cli.namespace);
        let selector = Selector {
            label,
            label_value: cli.label_value.filter(|v| !v.is_empty()),
            kinds: cli.resource,
            namespaces: scope.namespace_filter(),
            names: parse_desired_names(&cli.resource_names),
        };

        Ok(Self {
            method: cli.method,
            selector,
            scope,
            folder: cli.folder,
            file_mode: cli.file_mode,
            target_dir_annotation: cli.target_dir_annotation,
            watch_client_timeout: Duration::from_secs(cli.watch_client_timeout),
            watch_server_timeout_secs: cli.watch_server_timeout,
            watch_restart_delay: Duration::from_millis(cli.watch_restart_delay_ms),
            backoff_start: Duration::from_millis(cli.backoff_start_ms),
            backoff_max: Duration::from_millis(cli.backoff_max_ms),
            max_retries: (cli.max_retries > 0).then_some(cli.max_retries),
            debug: cli.debug,
            verbose: cli.verbose,
            event_logging: cli.event_logging,
            log_format: cli.log_format,
            health_port: cli.health_port,
        })
    }
}

impl SidecarConfig {
    /// Parse from the process arguments and environment.
    ///
    /// Invalid or missing options print a clap error and exit non-zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::try_from(Cli::parse())
    }

    /// Server timeout actually sent with each watch request
    #[must_use]
    pub fn effective_server_timeout_secs(&self) -> u32 {
        self.watch_server_timeout_secs.min(MAX_WATCH_SERVER_TIMEOUT_SECS)
    }

    /// The client gives up on a stream before the server would close it
    #[must_use]
    pub fn client_timeout_shorter_than_server(&self) -> bool {
        self.watch_client_timeout.as_secs() < u64::from(self.watch_server_timeout_secs)
    }

    #[must_use]
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            client_timeout: self.watch_client_timeout,
            restart_delay: self.watch_restart_delay,
            backoff_start: self.backoff_start,
            backoff_max: self.backoff_max,
            max_retries: self.max_retries,
        }
    }

    /// Log the effective configuration and any suspicious combinations
    pub fn log_summary(&self) {
        info!(
            method = ?self.method,
            label = %self.selector.label_selector(),
            resource = ?self.selector.kinds,
            names = self.selector.names.len(),
            namespaces = ?self.scope.targets(),
            folder = %self.folder.display(),
            file_mode = %format!("{:o}", self.file_mode),
            event_logging = self.event_logging,
            "Effective configuration"
        );

        if self.client_timeout_shorter_than_server() {
            warn!(
                client_timeout_secs = self.watch_client_timeout.as_secs(),
                server_timeout_secs = self.watch_server_timeout_secs,
                "WATCH_CLIENT_TIMEOUT is shorter than WATCH_SERVER_TIMEOUT; \
                 idle watches will be abandoned by the client before the server closes them"
            );
        }
        if self.effective_server_timeout_secs() != self.watch_server_timeout_secs {
            info!(
                requested = self.watch_server_timeout_secs,
                effective = self.effective_server_timeout_secs(),
                "Server-side watch timeout capped"
            );
        }
    }
}
